//! Vulkan surface management
//!
//! The window layer creates the raw `VkSurfaceKHR`; this wrapper owns it from
//! then on and answers the swapchain support queries.

use ash::extensions::khr::Surface as SurfaceLoader;
use ash::{vk, Entry, Instance};

use super::context::{VulkanError, VulkanResult};
use crate::render::window::PresentationWindow;

/// What a surface supports on one physical device
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Image count and extent limits, current extent
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format / colour space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// A swapchain can be built: at least one format and one present mode
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Vulkan surface wrapper for presentation
pub struct Surface {
    loader: SurfaceLoader,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Ask the window for a surface and take ownership of it
    pub fn new(entry: &Entry, instance: &Instance, window: &dyn PresentationWindow) -> VulkanResult<Self> {
        let surface = window
            .create_surface(instance.handle())
            .map_err(|e| VulkanError::SurfaceCreation(e.to_string()))?;

        Ok(Self {
            loader: SurfaceLoader::new(entry, instance),
            surface,
        })
    }

    /// Get the underlying surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Capabilities, formats and present modes for a physical device
    pub fn support(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
            })
        }
    }

    /// Check if a queue family supports presentation to this surface
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family_index: u32) -> VulkanResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family_index, self.surface)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
        log::debug!("Destroyed surface");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_adequacy() {
        let mut support = SurfaceSupport::default();
        assert!(!support.is_adequate());

        support.formats.push(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
        assert!(!support.is_adequate());

        support.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(support.is_adequate());
    }
}
