//! Framebuffers and the depth attachment
//!
//! Both are sized to the swapchain extent and rebuilt with it. The depth
//! image itself is an [`Image`] kept in the attachment layout.

use ash::{vk, Device, Instance};

use super::commands::CommandPool;
use super::context::{VulkanError, VulkanResult};
use super::image::Image;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate the device can use as an optimal-tiling depth attachment
pub fn choose_depth_format(
    candidates: &[vk::Format],
    supports_depth_attachment: impl Fn(vk::Format) -> bool,
) -> VulkanResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| supports_depth_attachment(format))
        .ok_or(VulkanError::NoSupportedDepthFormat)
}

/// Query the device for the depth format to use
pub fn find_depth_format(instance: &Instance, physical_device: vk::PhysicalDevice) -> VulkanResult<vk::Format> {
    choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
        let properties = unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a new framebuffer
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let framebuffer_create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.create_framebuffer(&framebuffer_create_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "framebuffer", result })?;

        Ok(Self { device, framebuffer })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// Depth attachment sized to the swapchain
pub struct DepthBuffer {
    image: Image,
}

impl DepthBuffer {
    /// Create a device-local depth image and move it to the attachment layout
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        command_pool: &CommandPool,
        graphics_queue: vk::Queue,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let mut image = Image::new(
            device,
            instance,
            physical_device,
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        image.transition_layout(command_pool, graphics_queue, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)?;

        log::debug!("Created depth buffer {}x{} ({:?})", extent.width, extent.height, format);
        Ok(Self { image })
    }

    /// Get the image view handle
    pub fn image_view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Depth format in use
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_format_prefers_d32() {
        let format = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| true).unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_depth_format_falls_through_candidates() {
        let format =
            choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |f| f == vk::Format::D24_UNORM_S8_UINT).unwrap();
        assert_eq!(format, vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn test_no_depth_format() {
        let result = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| false);
        assert!(matches!(result, Err(VulkanError::NoSupportedDepthFormat)));
    }
}
