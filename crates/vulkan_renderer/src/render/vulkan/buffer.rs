//! Buffer management for uploads and per-frame uniforms
//!
//! [`Buffer`] is the plain allocation helper asset code uses for vertex and
//! index data, including staging uploads into device-local memory. Uniforms get one persistently mapped [`UniformBuffer`] per
//! frame slot, collected in [`UniformSlots`].

use ash::{vk, Device, Instance};
use bytemuck::{Pod, Zeroable};
use std::ptr::NonNull;

use super::commands::CommandPool;
use super::context::{VulkanError, VulkanResult};
use crate::foundation::math::Mat4;

/// Find a memory type allowed by `type_filter` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// Region copying all of a `source_size` buffer into one of `destination_size`
pub fn copy_region(source_size: vk::DeviceSize, destination_size: vk::DeviceSize) -> VulkanResult<vk::BufferCopy> {
    if source_size > destination_size {
        return Err(VulkanError::InvalidOperation {
            reason: format!("cannot copy {source_size} bytes into a {destination_size} byte buffer"),
        });
    }
    Ok(vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: source_size,
    })
}

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|result| VulkanError::ResourceCreation { resource: "buffer", result })?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let memory = find_memory_type(&memory_properties, requirements.memory_type_bits, properties).and_then(|index| {
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(index);
            unsafe { device.allocate_memory(&alloc_info, None) }
                .map_err(|result| VulkanError::ResourceCreation { resource: "buffer memory", result })
        });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here Drop cleans up both handles
        let this = Self {
            device,
            buffer,
            memory,
            size,
        };
        unsafe { this.device.bind_buffer_memory(buffer, memory, 0) }.map_err(VulkanError::Api)?;

        Ok(this)
    }

    /// Map the whole allocation
    pub fn map_memory(&self) -> VulkanResult<NonNull<u8>> {
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
        }
        .map_err(VulkanError::Api)?;

        NonNull::new(ptr.cast::<u8>()).ok_or(VulkanError::InvalidOperation {
            reason: "vkMapMemory returned a null pointer".to_string(),
        })
    }

    /// Unmap memory
    pub fn unmap_memory(&self) {
        unsafe {
            self.device.unmap_memory(self.memory);
        }
    }

    /// Copy `data` to the start of a host-visible buffer
    pub fn write_data<T: Pod>(&self, data: &[T]) -> VulkanResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{} bytes do not fit in a {} byte buffer", bytes.len(), self.size),
            });
        }

        let mapped = self.map_memory()?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.as_ptr(), bytes.len());
        }
        self.unmap_memory();
        Ok(())
    }

    /// Host-visible transfer source holding a copy of `data`
    pub fn staging<T: Pod>(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        data: &[T],
    ) -> VulkanResult<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "nothing to upload".to_string(),
            });
        }

        let staging = Self::new(
            device,
            instance,
            physical_device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_data(data)?;
        Ok(staging)
    }

    /// Device-local buffer with `usage`, filled with `data` through a staging buffer
    pub fn device_local<T: Pod>(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        command_pool: &CommandPool,
        queue: vk::Queue,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let staging = Self::staging(device.clone(), instance, physical_device, data)?;
        let buffer = Self::new(
            device,
            instance,
            physical_device,
            staging.size(),
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        staging.copy_to(&buffer, command_pool, queue)?;
        Ok(buffer)
    }

    /// Copy this buffer into the start of `destination` and wait for the queue
    pub fn copy_to(&self, destination: &Self, command_pool: &CommandPool, queue: vk::Queue) -> VulkanResult<()> {
        let region = copy_region(self.size, destination.size)?;
        command_pool.run_one_time(queue, |device, command_buffer| unsafe {
            device.cmd_copy_buffer(command_buffer, self.buffer, destination.buffer, &[region]);
        })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Host-writable byte region backing one uniform slot
pub trait MappedMemory {
    /// The mapped bytes
    fn bytes_mut(&mut self) -> &mut [u8];
}

/// Host-visible, coherent uniform buffer, mapped for its whole lifetime
pub struct UniformBuffer {
    mapped: NonNull<u8>,
    len: usize,
    buffer: Buffer,
}

impl UniformBuffer {
    /// Allocate and map a uniform buffer of `size` bytes
    pub fn new(device: Device, instance: &Instance, physical_device: vk::PhysicalDevice, size: usize) -> VulkanResult<Self> {
        let buffer = Buffer::new(
            device,
            instance,
            physical_device,
            size as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let mapped = buffer.map_memory()?;

        Ok(Self {
            mapped,
            len: size,
            buffer,
        })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.len
    }
}

impl MappedMemory for UniformBuffer {
    fn bytes_mut(&mut self) -> &mut [u8] {
        // Mapping covers `len` bytes and stays valid until drop
        unsafe { std::slice::from_raw_parts_mut(self.mapped.as_ptr(), self.len) }
    }
}

impl Drop for UniformBuffer {
    fn drop(&mut self) {
        self.buffer.unmap_memory();
    }
}

/// One mapped uniform region per frame slot
///
/// Writes are raw byte copies with no synchronization: the caller makes sure
/// the slot's previous submission has completed before overwriting it.
pub struct UniformSlots<M> {
    slots: Vec<M>,
}

impl<M: MappedMemory> UniformSlots<M> {
    /// Wrap one region per frame slot, in slot order
    pub fn new(slots: Vec<M>) -> Self {
        Self { slots }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No slots at all
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Region for a slot
    pub fn get(&self, frame_index: usize) -> Option<&M> {
        self.slots.get(frame_index)
    }

    /// Copy `value`'s bytes to the start of the slot's region
    pub fn update<T: Pod>(&mut self, frame_index: usize, value: &T) -> VulkanResult<()> {
        let frames = self.slots.len();
        let slot = self
            .slots
            .get_mut(frame_index)
            .ok_or(VulkanError::InvalidFrameIndex { index: frame_index, frames })?;

        let bytes = bytemuck::bytes_of(value);
        let target = slot.bytes_mut();
        if bytes.len() > target.len() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{} byte uniform does not fit in a {} byte slot", bytes.len(), target.len()),
            });
        }

        target[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// Model, view and projection matrices, laid out as the shaders expect
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// Object to world
    pub model: [[f32; 4]; 4],
    /// World to camera
    pub view: [[f32; 4]; 4],
    /// Camera to clip space
    pub proj: [[f32; 4]; 4],
}

impl UniformBufferObject {
    /// Build from column-major matrices
    pub fn new(model: &Mat4, view: &Mat4, proj: &Mat4) -> Self {
        Self {
            model: (*model).into(),
            view: (*view).into(),
            proj: (*proj).into(),
        }
    }
}

impl Default for UniformBufferObject {
    fn default() -> Self {
        let identity = Mat4::identity();
        Self::new(&identity, &identity, &identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    impl MappedMemory for Vec<u8> {
        fn bytes_mut(&mut self) -> &mut [u8] {
            self.as_mut_slice()
        }
    }

    fn slots(frames: usize) -> UniformSlots<Vec<u8>> {
        UniformSlots::new(vec![vec![0u8; std::mem::size_of::<UniformBufferObject>()]; frames])
    }

    fn ubo_with_model_scale(scale: f32) -> UniformBufferObject {
        let model = Mat4::new_scaling(scale);
        let identity = Mat4::identity();
        UniformBufferObject::new(&model, &identity, &identity)
    }

    #[test]
    fn test_ubo_layout_is_three_matrices() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 3 * 64);
    }

    #[test]
    fn test_ubo_is_column_major() {
        let translation = Mat4::new_translation(&nalgebra::Vector3::new(1.0, 2.0, 3.0));
        let identity = Mat4::identity();
        let ubo = UniformBufferObject::new(&translation, &identity, &identity);

        assert_relative_eq!(ubo.model[3][0], 1.0);
        assert_relative_eq!(ubo.model[3][1], 2.0);
        assert_relative_eq!(ubo.model[3][2], 3.0);
        assert_relative_eq!(ubo.model[3][3], 1.0);
    }

    #[test]
    fn test_last_update_wins() {
        let mut slots = slots(2);
        let first = ubo_with_model_scale(2.0);
        let second = ubo_with_model_scale(5.0);

        slots.update(0, &first).unwrap();
        slots.update(0, &second).unwrap();

        assert_eq!(slots.get(0).unwrap().as_slice(), bytemuck::bytes_of(&second));
        assert!(slots.get(1).unwrap().iter().all(|&b| b == 0), "other slots untouched");
    }

    #[test]
    fn test_update_out_of_range() {
        let mut slots = slots(2);
        let result = slots.update(2, &UniformBufferObject::default());
        assert!(matches!(result, Err(VulkanError::InvalidFrameIndex { index: 2, frames: 2 })));
    }

    #[test]
    fn test_update_too_large_for_slot() {
        let mut slots = UniformSlots::new(vec![vec![0u8; 16]]);
        let result = slots.update(0, &UniformBufferObject::default());
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
        assert_eq!(slots.get(0).unwrap(), &vec![0u8; 16]);
    }

    #[test]
    fn test_smaller_value_writes_prefix() {
        let mut slots = UniformSlots::new(vec![vec![0xFFu8; 8]]);
        slots.update(0, &0x0102_0304u32).unwrap();
        assert_eq!(&slots.get(0).unwrap()[..4], &0x0102_0304u32.to_ne_bytes());
        assert_eq!(&slots.get(0).unwrap()[4..], &[0xFF; 4]);
    }

    #[test]
    fn test_copy_region_covers_source() {
        let region = copy_region(64, 256).unwrap();
        assert_eq!(region.src_offset, 0);
        assert_eq!(region.dst_offset, 0);
        assert_eq!(region.size, 64);
    }

    #[test]
    fn test_copy_region_rejects_small_destination() {
        let result = copy_region(512, 256);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_find_memory_type() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        props.memory_types[2].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 0);
        assert!(matches!(
            find_memory_type(&props, 0b011, host),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }
}
