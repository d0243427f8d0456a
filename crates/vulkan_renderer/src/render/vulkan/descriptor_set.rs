//! Descriptor layouts, pools and writes
//!
//! Every frame slot gets one descriptor set with the same layout:
//! binding 0 is the slot's uniform buffer (vertex stage) and bindings
//! `1..=MAX_TEXTURE_BINDINGS` are combined image samplers (fragment stage).
//! Sets are allocated once and freed with the pool.

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};

/// Number of combined image sampler bindings in the per-frame layout
pub const MAX_TEXTURE_BINDINGS: u32 = 8;

/// Binding of the per-frame uniform buffer
pub const UNIFORM_BINDING: u32 = 0;

/// Descriptor set layout builder for creating reusable layouts
#[derive(Debug, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-frame layout: uniform buffer, then `texture_bindings` samplers
    pub fn frame_layout(texture_bindings: u32) -> Self {
        (1..=texture_bindings).fold(
            Self::new().add_uniform_buffer(UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX),
            |builder, binding| builder.add_combined_image_sampler(binding, vk::ShaderStageFlags::FRAGMENT),
        )
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    fn add(mut self, binding: u32, descriptor_type: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Bindings added so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "descriptor set layout", result })?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Pool sizes for `frames` per-frame sets: one uniform entry and one entry per sampler binding
pub fn frame_pool_sizes(frames: u32, texture_bindings: u32) -> Vec<vk::DescriptorPoolSize> {
    std::iter::once(vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: frames,
    })
    .chain((0..texture_bindings).map(|_| vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: frames,
    }))
    .collect()
}

/// Descriptor pool for allocating descriptor sets
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    /// Pool holding exactly one per-frame set for each of `frames` slots
    pub fn for_frames(device: Device, frames: u32, texture_bindings: u32) -> VulkanResult<Self> {
        let pool_sizes = frame_pool_sizes(frames, texture_bindings);
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(frames)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "descriptor pool", result })?;

        Ok(Self { pool, device })
    }

    /// Allocate one set per layout
    pub fn allocate_descriptor_sets(&self, layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::DescriptorAllocation)
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingWrite {
    Buffer {
        set: vk::DescriptorSet,
        binding: u32,
        info: vk::DescriptorBufferInfo,
    },
    Image {
        set: vk::DescriptorSet,
        binding: u32,
        info: vk::DescriptorImageInfo,
    },
}

/// Batches descriptor writes and applies them in one call
///
/// Infos are kept by value until [`update`](Self::update) so the pointers
/// handed to Vulkan stay valid for the whole call.
#[derive(Debug, Default)]
pub struct DescriptorSetWriter {
    pending: Vec<PendingWrite>,
}

impl DescriptorSetWriter {
    /// Create a new descriptor set writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Point a uniform buffer binding at `range` bytes of `buffer`
    pub fn write_buffer(
        mut self,
        descriptor_set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        self.pending.push(PendingWrite::Buffer {
            set: descriptor_set,
            binding,
            info: vk::DescriptorBufferInfo { buffer, offset, range },
        });
        self
    }

    /// Point a combined image sampler binding at an image view
    pub fn write_image(
        mut self,
        descriptor_set: vk::DescriptorSet,
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Self {
        self.pending.push(PendingWrite::Image {
            set: descriptor_set,
            binding,
            info: vk::DescriptorImageInfo {
                sampler,
                image_view,
                image_layout: layout,
            },
        });
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Nothing queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Execute all write operations
    pub fn update(&self, device: &Device) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .pending
            .iter()
            .map(|pending| match pending {
                PendingWrite::Buffer { set, binding, info } => vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(*binding)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
                    .build(),
                PendingWrite::Image { set, binding, info } => vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(*binding)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info))
                    .build(),
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}
