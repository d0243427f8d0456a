//! Synchronization primitives
//!
//! RAII wrappers for semaphores and fences, plus [`FrameSlot`], the per
//! frame-in-flight bundle the frame loop rotates through.
//!
//! Each slot pairs:
//! - `image_available`: signaled by acquisition, waited on by the submit
//! - `render_finished`: signaled by the submit, waited on by presentation
//! - `in_flight`: signaled when the slot's submission completes on the GPU
//!
//! Fences start signaled so the first wait on every slot returns at once.

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};

/// Semaphore wrapper with RAII cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { device.create_semaphore(&create_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "semaphore", result })?;

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.create_fence(&create_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "fence", result })?;

        Ok(Self { device, fence })
    }

    /// Block until signaled or `timeout` nanoseconds pass
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, timeout) }.map_err(VulkanError::Api)
    }

    /// Reset to unsignaled
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]) }.map_err(VulkanError::Api)
    }

    /// Non-blocking status check
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe { self.device.get_fence_status(self.fence) }.map_err(VulkanError::Api)
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects and command buffer owned by one frame in flight
///
/// The command buffer is freed with its pool, not here.
pub struct FrameSlot {
    /// Signaled when the acquired swapchain image is ready to be written
    pub image_available: Semaphore,
    /// Signaled when the slot's rendering finished, before presentation
    pub render_finished: Semaphore,
    /// Signaled when the GPU finished the slot's submission
    pub in_flight: Fence,
    /// Primary command buffer recorded every time the slot comes around
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSlot {
    /// Create the slot's semaphores and a signaled fence
    pub fn new(device: &Device, command_buffer: vk::CommandBuffer) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?,
            command_buffer,
        })
    }
}
