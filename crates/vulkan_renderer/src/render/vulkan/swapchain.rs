//! Vulkan swapchain management
//!
//! The choice of format, present mode, extent and image count is made by the
//! pure `choose_*` functions below so it can be tested without a surface.
//! [`Swapchain`] owns the swapchain handle and one view per image; the images
//! themselves belong to the presentation engine.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use super::context::{LogicalDevice, PhysicalDeviceInfo, VulkanError, VulkanResult};
use super::surface::Surface;

/// Surface-format and present-mode predicates consulted when building a swapchain
#[derive(Clone, Copy)]
pub struct SwapchainPreferences<'a> {
    /// Accepts a format / colour space pair
    pub surface_format: &'a dyn Fn(&vk::SurfaceFormatKHR) -> bool,
    /// Accepts a present mode
    pub present_mode: &'a dyn Fn(vk::PresentModeKHR) -> bool,
}

/// First format the predicate accepts, otherwise the first format reported
///
/// Returns `None` only for an empty list.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    accept: &dyn Fn(&vk::SurfaceFormatKHR) -> bool,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|&format| accept(format))
        .or_else(|| formats.first())
        .copied()
}

/// First mode the predicate accepts, otherwise FIFO (always supported)
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    accept: &dyn Fn(vk::PresentModeKHR) -> bool,
) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| accept(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's fixed extent, or the framebuffer size clamped to the surface limits
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 = no maximum)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain sized for `framebuffer_size`, with one view per image
    pub fn new(
        device: &LogicalDevice,
        surface: &Surface,
        physical_device: &PhysicalDeviceInfo,
        framebuffer_size: (u32, u32),
        preferences: SwapchainPreferences<'_>,
    ) -> VulkanResult<Self> {
        let support = surface.support(physical_device.device)?;
        let format = choose_surface_format(&support.formats, preferences.surface_format)
            .ok_or(VulkanError::SwapchainCreation(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;
        let present_mode = choose_present_mode(&support.present_modes, preferences.present_mode);
        let extent = choose_extent(&support.capabilities, framebuffer_size);
        let image_count = choose_image_count(&support.capabilities);

        let queue_families = [physical_device.graphics_family, physical_device.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        create_info = if physical_device.has_separate_present_family() {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain_loader = device.swapchain_loader().clone();
        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(VulkanError::SwapchainCreation)?;

        // Owned from here on, so a failure below still destroys what was created
        let mut this = Self {
            device: device.handle().clone(),
            swapchain_loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(VulkanError::SwapchainCreation)?;

        for &image in &this.images {
            let view = create_color_view(&this.device, image, format.format)?;
            this.image_views.push(view);
        }

        log::info!(
            "Swapchain created: {}x{}, {} images, {:?} / {:?}, {:?}",
            extent.width,
            extent.height,
            this.images.len(),
            format.format,
            format.color_space,
            present_mode
        );

        Ok(this)
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Chosen present mode
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Get image views, in image order
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get swapchain loader
    pub fn loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Number of presentable images actually created
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        log::debug!("Destroyed swapchain ({} views)", self.image_views.len());
    }
}

fn create_color_view(device: &Device, image: vk::Image, format: vk::Format) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }
        .map_err(|result| VulkanError::ResourceCreation { resource: "swapchain image view", result })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn srgb(format: &vk::SurfaceFormatKHR) -> bool {
        format.format == vk::Format::B8G8R8A8_SRGB && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    }

    fn capabilities(min: (u32, u32), max: (u32, u32), current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            ..Default::default()
        }
    }

    #[test]
    fn test_format_prefers_accepted_entry() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats, &srgb).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_format_falls_back_to_first() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats, &srgb).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_format_needs_matching_color_space() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats, &srgb).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_format_empty_list() {
        assert!(choose_surface_format(&[], &srgb).is_none());
    }

    #[test]
    fn test_present_mode_selection() {
        let mailbox = |mode: vk::PresentModeKHR| mode == vk::PresentModeKHR::MAILBOX;

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes, &mailbox), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, &mailbox), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_uses_current_when_fixed() {
        let caps = capabilities((1, 1), (4096, 4096), (1920, 1080));
        let extent = choose_extent(&caps, (800, 600));
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_extent_clamps_each_axis_to_its_own_bounds() {
        let caps = capabilities((100, 50), (1000, 400), (u32::MAX, u32::MAX));

        let extent = choose_extent(&caps, (5000, 10));
        assert_eq!((extent.width, extent.height), (1000, 50));

        let extent = choose_extent(&caps, (10, 5000));
        assert_eq!((extent.width, extent.height), (100, 400));

        let extent = choose_extent(&caps, (640, 300));
        assert_eq!((extent.width, extent.height), (640, 300));
    }

    #[test]
    fn test_image_count() {
        let mut caps = capabilities((1, 1), (1, 1), (1, 1));

        caps.min_image_count = 2;
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);

        caps.min_image_count = 3;
        caps.max_image_count = 3;
        assert_eq!(choose_image_count(&caps), 3);
    }
}
