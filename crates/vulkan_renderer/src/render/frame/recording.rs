//! Command recording bridge
//!
//! The renderer resets the slot's command buffer and then hands everything a
//! recorder needs to a [`RecordFn`]. What gets drawn is entirely up to the
//! callback; [`clear_only`] is used when none is supplied.

use ash::{vk, Device};

use crate::render::vulkan::commands::CommandRecorder;
use crate::render::vulkan::VulkanResult;

/// Per-frame recording callback
pub type RecordFn = Box<dyn FnMut(&FrameTarget<'_>) -> VulkanResult<()>>;

/// Everything a recording callback may use for one frame
///
/// Handles tied to the swapchain (framebuffer, extent) change when it is
/// rebuilt; read them from here every frame rather than caching them.
pub struct FrameTarget<'a> {
    /// Device the handles belong to
    pub device: &'a Device,
    /// Reset, not yet begun command buffer of the active slot
    pub command_buffer: vk::CommandBuffer,
    /// Framebuffer wrapping the acquired swapchain image
    pub framebuffer: vk::Framebuffer,
    /// Active frame slot
    pub frame_index: usize,
    /// Acquired swapchain image
    pub image_index: u32,
    /// Current swapchain extent
    pub extent: vk::Extent2D,
    /// Forward render pass (colour + depth)
    pub render_pass: vk::RenderPass,
    /// Default pipeline, when shaders were configured
    pub pipeline: Option<vk::Pipeline>,
    /// Layout matching the per-frame descriptor set
    pub pipeline_layout: vk::PipelineLayout,
    /// The slot's descriptor set (uniform buffer at binding 0)
    pub descriptor_set: vk::DescriptorSet,
    /// The slot's uniform buffer
    pub uniform_buffer: vk::Buffer,
    /// Default texture sampler
    pub sampler: vk::Sampler,
    /// Configured clear colour
    pub clear_color: [f32; 4],
}

impl<'a> FrameTarget<'a> {
    /// Recorder over this frame's command buffer
    pub fn recorder(&self) -> CommandRecorder<'a> {
        CommandRecorder::new(self.command_buffer, self.device)
    }

    /// Full-extent render area
    pub fn render_area(&self) -> vk::Rect2D {
        full_render_area(self.extent)
    }

    /// Full-extent viewport with `[0, 1]` depth
    pub fn viewport(&self) -> vk::Viewport {
        full_viewport(self.extent)
    }

    /// Clear values for the colour and depth attachments, in attachment order
    pub fn clear_values(&self) -> [vk::ClearValue; 2] {
        attachment_clear_values(self.clear_color)
    }
}

/// Render area covering the whole extent
pub fn full_render_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Viewport covering the whole extent with `[0, 1]` depth
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Colour clear to `color`, depth clear to the far plane
pub fn attachment_clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
        },
    ]
}

/// Record a render pass that only clears the attachments
pub fn clear_only(target: &FrameTarget<'_>) -> VulkanResult<()> {
    let mut recorder = target.recorder();
    recorder.begin()?;
    {
        let mut pass = recorder.begin_render_pass(
            target.render_pass,
            target.framebuffer,
            target.render_area(),
            &target.clear_values(),
        )?;
        pass.set_viewport(&target.viewport());
        pass.set_scissor(&target.render_area());
    }
    recorder.end()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_viewport_covers_extent() {
        let viewport = full_viewport(vk::Extent2D { width: 1280, height: 720 });
        assert_relative_eq!(viewport.width, 1280.0);
        assert_relative_eq!(viewport.height, 720.0);
        assert_relative_eq!(viewport.min_depth, 0.0);
        assert_relative_eq!(viewport.max_depth, 1.0);
    }

    #[test]
    fn test_render_area_starts_at_origin() {
        let area = full_render_area(vk::Extent2D { width: 800, height: 600 });
        assert_eq!((area.offset.x, area.offset.y), (0, 0));
        assert_eq!((area.extent.width, area.extent.height), (800, 600));
    }

    #[test]
    fn test_clear_values_order() {
        let values = attachment_clear_values([0.1, 0.2, 0.3, 1.0]);
        unsafe {
            assert_eq!(values[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_relative_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }
}
