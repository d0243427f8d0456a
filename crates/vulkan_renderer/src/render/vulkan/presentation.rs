//! Everything sized to the swapchain extent
//!
//! One generation of swapchain, depth buffer and framebuffers. A rebuild
//! drops the whole generation (framebuffers, depth, image views, swapchain)
//! before the next one is created; the device must be idle by then.

use ash::{vk, Instance};

use super::commands::CommandPool;
use super::context::{LogicalDevice, PhysicalDeviceInfo, VulkanResult};
use super::framebuffer::{DepthBuffer, Framebuffer};
use super::surface::Surface;
use super::swapchain::{Swapchain, SwapchainPreferences};

/// Long-lived objects a swapchain generation is built from
#[derive(Clone, Copy)]
pub struct PresentationContext<'a> {
    /// Instance function table
    pub instance: &'a Instance,
    /// Logical device and its queues
    pub device: &'a LogicalDevice,
    /// Selected accelerator and queue families
    pub physical_device: &'a PhysicalDeviceInfo,
    /// Window surface
    pub surface: &'a Surface,
    /// Pool for the one-shot depth transition
    pub command_pool: &'a CommandPool,
    /// Render pass the framebuffers must be compatible with
    pub render_pass: vk::RenderPass,
    /// Depth format chosen at init
    pub depth_format: vk::Format,
}

/// Swapchain plus the depth buffer and framebuffers that match it
///
/// Fields drop top to bottom: framebuffers, then depth, then the swapchain
/// (which destroys its image views before itself).
pub struct SwapchainResources {
    framebuffers: Vec<Framebuffer>,
    depth: DepthBuffer,
    swapchain: Swapchain,
}

impl SwapchainResources {
    /// Create a new swapchain for `framebuffer_size` and everything attached to it
    pub fn create(
        context: &PresentationContext<'_>,
        framebuffer_size: (u32, u32),
        preferences: SwapchainPreferences<'_>,
    ) -> VulkanResult<Self> {
        let swapchain = Swapchain::new(
            context.device,
            context.surface,
            context.physical_device,
            framebuffer_size,
            preferences,
        )?;
        Self::attach(context, swapchain)
    }

    /// Build depth and framebuffers around an existing swapchain
    pub fn attach(context: &PresentationContext<'_>, swapchain: Swapchain) -> VulkanResult<Self> {
        let extent = swapchain.extent();
        let device = context.device.handle();

        let depth = DepthBuffer::new(
            device.clone(),
            context.instance,
            context.physical_device.device,
            context.command_pool,
            context.device.graphics_queue(),
            context.depth_format,
            extent,
        )?;

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&color_view| {
                Framebuffer::new(
                    device.clone(),
                    context.render_pass,
                    &[color_view, depth.image_view()],
                    extent,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!(
            "Created framebuffers for {} swapchain images at {}x{} with {:?} depth",
            swapchain.image_count(),
            extent.width,
            extent.height,
            depth.format()
        );

        Ok(Self {
            framebuffers,
            depth,
            swapchain,
        })
    }

    /// The swapchain of this generation
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Current extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Framebuffer targeting swapchain image `image_index`
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).map(Framebuffer::handle)
    }
}
