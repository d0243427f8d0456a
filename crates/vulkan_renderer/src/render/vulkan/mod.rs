//! Vulkan object wrappers
//!
//! Every wrapper owns its handle and destroys it on drop. Owners keep them in
//! fields ordered so that dependents drop before what they depend on.

/// Instance, physical device selection and logical device
pub mod context;

/// Window surface and its capabilities
pub mod surface;

/// Swapchain and the format/mode/extent choices behind it
pub mod swapchain;

/// Framebuffers and depth buffer
pub mod framebuffer;

/// One swapchain generation with its depth buffer and framebuffers
pub mod presentation;

/// Forward render pass
pub mod render_pass;

/// Command pools and recording helpers
pub mod commands;

/// Fences, semaphores and frame slots
pub mod sync;

/// Buffers, staging uploads and persistently mapped uniform buffers
pub mod buffer;

/// Images, layout transitions and pixel uploads
pub mod image;

/// Descriptor layouts, pools and writes
pub mod descriptor_set;

/// Samplers
pub mod sampler;

/// Shader modules, pipeline layout and graphics pipeline
pub mod shader;

pub use buffer::{
    copy_region, find_memory_type, Buffer, MappedMemory, UniformBuffer, UniformBufferObject, UniformSlots,
};
pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use context::{
    DeviceCandidate, DeviceRejection, LogicalDevice, PhysicalDeviceInfo, QueueFamilyIndices, VulkanError, VulkanInstance,
    VulkanResult,
};
pub use descriptor_set::{
    DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter, MAX_TEXTURE_BINDINGS,
};
pub use framebuffer::{DepthBuffer, Framebuffer};
pub use image::{layout_transition, Image, LayoutTransition};
pub use presentation::{PresentationContext, SwapchainResources};
pub use render_pass::RenderPass;
pub use sampler::{Sampler, SamplerBuilder};
pub use shader::{GraphicsPipeline, PipelineLayout, ShaderModule};
pub use surface::{Surface, SurfaceSupport};
pub use swapchain::{Swapchain, SwapchainPreferences};
pub use sync::{Fence, FrameSlot, Semaphore};
