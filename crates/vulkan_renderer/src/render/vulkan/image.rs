//! Device images and their upload path
//!
//! [`Image`] owns an image, its memory and a 2D view, and remembers the
//! layout it was last transitioned to. Uploads go through a host-visible
//! staging [`Buffer`] and a one-shot command buffer on the graphics queue.

use ash::{vk, Device, Instance};
use bytemuck::Pod;

use super::buffer::{find_memory_type, Buffer};
use super::commands::CommandPool;
use super::context::{VulkanError, VulkanResult};

/// Access masks and pipeline stages for one layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Writes that must be available before the transition
    pub src_access: vk::AccessFlags,
    /// Accesses that wait on the transition
    pub dst_access: vk::AccessFlags,
    /// Stage the transition waits on
    pub src_stage: vk::PipelineStageFlags,
    /// Stage that waits on the transition
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for the layout changes the renderer performs
///
/// Unsupported pairs are an [`VulkanError::InvalidOperation`].
pub fn layout_transition(old: vk::ImageLayout, new: vk::ImageLayout) -> VulkanResult<LayoutTransition> {
    use vk::{AccessFlags as A, ImageLayout as L, PipelineStageFlags as S};

    let transition = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => LayoutTransition {
            src_access: A::empty(),
            dst_access: A::TRANSFER_WRITE,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => LayoutTransition {
            src_access: A::TRANSFER_WRITE,
            dst_access: A::SHADER_READ,
            src_stage: S::TRANSFER,
            dst_stage: S::FRAGMENT_SHADER,
        },
        (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => LayoutTransition {
            src_access: A::SHADER_READ,
            dst_access: A::TRANSFER_WRITE,
            src_stage: S::FRAGMENT_SHADER,
            dst_stage: S::TRANSFER,
        },
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => LayoutTransition {
            src_access: A::empty(),
            dst_access: A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::EARLY_FRAGMENT_TESTS,
        },
        _ => {
            return Err(VulkanError::InvalidOperation {
                reason: format!("unsupported layout transition {old:?} -> {new:?}"),
            })
        }
    };
    Ok(transition)
}

/// Whether a format is one of the depth formats
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Whether a depth format carries a stencil component
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Aspect a sampled or attached view of `format` uses
pub fn view_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_format(format) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Every aspect of `format`, as layout barriers need
pub fn barrier_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil_component(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        view_aspect_mask(format)
    }
}

fn single_level(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Copy region covering the whole of a tightly packed `extent` image
pub fn full_image_copy(extent: vk::Extent2D, aspect_mask: vk::ImageAspectFlags) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    }
}

/// 2D image with bound memory and a view
pub struct Image {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    layout: vk::ImageLayout,
}

impl Image {
    /// Create a single-level optimal-tiling image in `UNDEFINED` layout
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { device.create_image(&image_create_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "image", result })?;

        // Null handles are ignored by the destroy calls in Drop
        let mut this = Self {
            device,
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format,
            extent,
            layout: vk::ImageLayout::UNDEFINED,
        };

        let requirements = unsafe { this.device.get_image_memory_requirements(image) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let memory_type_index = find_memory_type(&memory_properties, requirements.memory_type_bits, properties)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        this.memory = unsafe { this.device.allocate_memory(&alloc_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "image memory", result })?;

        unsafe { this.device.bind_image_memory(image, this.memory, 0) }.map_err(VulkanError::Api)?;

        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(single_level(view_aspect_mask(format)));
        this.view = unsafe { this.device.create_image_view(&view_create_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "image view", result })?;

        log::debug!("Created image {}x{} ({:?})", extent.width, extent.height, format);
        Ok(this)
    }

    /// Create a device-local sampled image and fill it with `pixels`
    ///
    /// `pixels` must be tightly packed rows in `format`. The image ends in
    /// `SHADER_READ_ONLY_OPTIMAL`.
    pub fn from_pixels<T: Pod>(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        command_pool: &CommandPool,
        queue: vk::Queue,
        extent: vk::Extent2D,
        format: vk::Format,
        pixels: &[T],
    ) -> VulkanResult<Self> {
        let mut image = Self::new(
            device.clone(),
            instance,
            physical_device,
            extent,
            format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let staging = Buffer::staging(device, instance, physical_device, pixels)?;
        image.transition_layout(command_pool, queue, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        image.copy_from_buffer(command_pool, queue, &staging)?;
        image.transition_layout(command_pool, queue, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        Ok(image)
    }

    /// Move the image to `new_layout` and wait for the queue
    pub fn transition_layout(
        &mut self,
        command_pool: &CommandPool,
        queue: vk::Queue,
        new_layout: vk::ImageLayout,
    ) -> VulkanResult<()> {
        let transition = layout_transition(self.layout, new_layout)?;

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(self.layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(single_level(barrier_aspect_mask(self.format)))
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access)
            .build();

        command_pool.run_one_time(queue, |device, command_buffer| unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })?;

        self.layout = new_layout;
        Ok(())
    }

    /// Copy the whole of `source` into the image; it must be in `TRANSFER_DST_OPTIMAL`
    pub fn copy_from_buffer(&self, command_pool: &CommandPool, queue: vk::Queue, source: &Buffer) -> VulkanResult<()> {
        if self.layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            return Err(VulkanError::InvalidOperation {
                reason: format!("image copy needs TRANSFER_DST_OPTIMAL, image is {:?}", self.layout),
            });
        }

        let region = full_image_copy(self.extent, view_aspect_mask(self.format));
        command_pool.run_one_time(queue, |device, command_buffer| unsafe {
            device.cmd_copy_buffer_to_image(
                command_buffer,
                source.handle(),
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        })
    }

    /// Get the image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get the view handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Image format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Image size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Layout after the last transition
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transitions() {
        let to_transfer =
            layout_transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(to_transfer.src_access, vk::AccessFlags::empty());
        assert_eq!(to_transfer.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_transfer.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_transfer.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_shader = layout_transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_shader.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_shader.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_shader.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_depth_attachment_transition() {
        let transition = layout_transition(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert!(transition.dst_access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert_eq!(transition.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn test_reupload_transition() {
        let transition = layout_transition(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(transition.src_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(transition.dst_access, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn test_unsupported_transition() {
        let result = layout_transition(vk::ImageLayout::PRESENT_SRC_KHR, vk::ImageLayout::GENERAL);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_aspect_masks() {
        assert_eq!(view_aspect_mask(vk::Format::R8G8B8A8_SRGB), vk::ImageAspectFlags::COLOR);
        assert_eq!(view_aspect_mask(vk::Format::D24_UNORM_S8_UINT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(barrier_aspect_mask(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            barrier_aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(barrier_aspect_mask(vk::Format::B8G8R8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_stencil_component() {
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn test_full_image_copy() {
        let region = full_image_copy(vk::Extent2D { width: 256, height: 128 }, vk::ImageAspectFlags::COLOR);
        assert_eq!(region.buffer_offset, 0);
        assert_eq!(region.buffer_row_length, 0);
        assert_eq!(region.image_extent.width, 256);
        assert_eq!(region.image_extent.height, 128);
        assert_eq!(region.image_extent.depth, 1);
        assert_eq!(region.image_subresource.layer_count, 1);
    }
}
