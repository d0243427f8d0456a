//! Renderer lifecycle
//!
//! [`Renderer`] is an explicitly owned object. `new` only validates the
//! configuration and resolves policies; `init` builds the full Vulkan object
//! tree against a window; `clean` (or drop) tears it down again.
//!
//! Teardown follows field order in `VulkanBackend`: the device is idled,
//! then frame slots, descriptors, uniforms and sampler, pipeline objects,
//! the swapchain generation, the render pass, the command pool, the device,
//! the surface and finally the debug messenger and instance.

use ash::{vk, Device};
use bytemuck::Pod;

use super::frame::{
    AcquireOutcome, FrameBackend, FrameScheduler, FrameStatus, FrameTarget, PresentOutcome, ResizeFlag,
};
use super::policy::{RendererPolicies, ResolvedPolicies};
use super::vulkan::descriptor_set::UNIFORM_BINDING;
use super::vulkan::framebuffer::find_depth_format;
use super::vulkan::swapchain::SwapchainPreferences;
use super::vulkan::{
    CommandPool, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter, FrameSlot,
    GraphicsPipeline, LogicalDevice, PhysicalDeviceInfo, PipelineLayout, PresentationContext, RenderPass, Sampler,
    SamplerBuilder, Surface, Swapchain, SwapchainResources, UniformBuffer, UniformBufferObject, UniformSlots,
    VulkanError, VulkanInstance, VulkanResult, MAX_TEXTURE_BINDINGS,
};
use super::window::{FramebufferState, PresentationWindow};
use crate::config::RendererConfig;

/// Every Vulkan object the renderer owns
///
/// Field order is drop order.
struct VulkanBackend {
    frames: Vec<FrameSlot>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    #[allow(dead_code)] // kept alive for the sets
    descriptor_pool: DescriptorPool,
    uniforms: UniformSlots<UniformBuffer>,
    sampler: Sampler,
    pipeline: Option<GraphicsPipeline>,
    pipeline_layout: PipelineLayout,
    #[allow(dead_code)]
    descriptor_layout: DescriptorSetLayout,
    presentation: Option<SwapchainResources>,
    render_pass: RenderPass,
    command_pool: CommandPool,
    device: LogicalDevice,
    physical_device: PhysicalDeviceInfo,
    surface: Surface,
    instance: VulkanInstance,
    depth_format: vk::Format,
    clear_color: [f32; 4],
}

impl VulkanBackend {
    fn new(window: &dyn PresentationWindow, config: &RendererConfig, policies: &ResolvedPolicies) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, config)?;
        let surface = Surface::new(instance.entry(), instance.instance(), window)?;
        let physical_device =
            PhysicalDeviceInfo::select(instance.instance(), &surface, policies.device_suitability())?;
        let device = LogicalDevice::new(
            instance.instance(),
            &physical_device,
            policies.device_features(),
            instance.validation_enabled(),
        )?;
        let command_pool = CommandPool::new(device.handle().clone(), physical_device.graphics_family)?;
        let depth_format = find_depth_format(instance.instance(), physical_device.device)?;

        let swapchain = Swapchain::new(
            &device,
            &surface,
            &physical_device,
            window.framebuffer_state().size(),
            policies.swapchain_preferences(),
        )?;
        let render_pass = RenderPass::new_forward_pass(device.handle().clone(), swapchain.format().format, depth_format)?;
        let presentation = SwapchainResources::attach(
            &PresentationContext {
                instance: instance.instance(),
                device: &device,
                physical_device: &physical_device,
                surface: &surface,
                command_pool: &command_pool,
                render_pass: render_pass.handle(),
                depth_format,
            },
            swapchain,
        )?;

        let descriptor_layout = DescriptorSetLayoutBuilder::frame_layout(MAX_TEXTURE_BINDINGS).build(device.handle())?;
        let pipeline_layout = PipelineLayout::new(device.handle().clone(), &[descriptor_layout.handle()], &[])?;
        let pipeline = match &config.shaders {
            Some(shaders) => Some(GraphicsPipeline::from_files(
                device.handle(),
                render_pass.handle(),
                &pipeline_layout,
                &shaders.vertex_shader_path,
                &shaders.fragment_shader_path,
            )?),
            None => {
                log::info!("No shaders configured; recording callbacks must supply their own pipeline");
                None
            }
        };
        let sampler = SamplerBuilder::for_device(&physical_device.properties).build(device.handle().clone())?;

        let frame_count = config.frames_in_flight;
        let uniform_buffers = (0..frame_count)
            .map(|_| {
                UniformBuffer::new(
                    device.handle().clone(),
                    instance.instance(),
                    physical_device.device,
                    std::mem::size_of::<UniformBufferObject>(),
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let pool_frames = u32::try_from(frame_count).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{frame_count} frames in flight"),
        })?;
        let descriptor_pool = DescriptorPool::for_frames(device.handle().clone(), pool_frames, MAX_TEXTURE_BINDINGS)?;
        let descriptor_sets = descriptor_pool.allocate_descriptor_sets(&vec![descriptor_layout.handle(); frame_count])?;

        // Binding 0 never changes; samplers are written by the recording callback
        descriptor_sets
            .iter()
            .zip(&uniform_buffers)
            .fold(DescriptorSetWriter::new(), |writer, (&set, uniform)| {
                writer.write_buffer(set, UNIFORM_BINDING, uniform.handle(), 0, uniform.size() as vk::DeviceSize)
            })
            .update(device.handle());

        let frames = command_pool
            .allocate_command_buffers(frame_count)?
            .into_iter()
            .map(|command_buffer| FrameSlot::new(device.handle(), command_buffer))
            .collect::<VulkanResult<Vec<_>>>()?;

        log::info!(
            "Renderer initialized on {} with {} frames in flight",
            physical_device.name(),
            frame_count
        );

        Ok(Self {
            frames,
            descriptor_sets,
            descriptor_pool,
            uniforms: UniformSlots::new(uniform_buffers),
            sampler,
            pipeline,
            pipeline_layout,
            descriptor_layout,
            presentation: Some(presentation),
            render_pass,
            command_pool,
            device,
            physical_device,
            surface,
            instance,
            depth_format,
            clear_color: config.clear_color,
        })
    }

    fn presentation_context(&self) -> PresentationContext<'_> {
        PresentationContext {
            instance: self.instance.instance(),
            device: &self.device,
            physical_device: &self.physical_device,
            surface: &self.surface,
            command_pool: &self.command_pool,
            render_pass: self.render_pass.handle(),
            depth_format: self.depth_format,
        }
    }

    fn recreate_swapchain(&mut self, framebuffer_size: (u32, u32), preferences: SwapchainPreferences<'_>) -> VulkanResult<()> {
        self.device.wait_idle()?;

        // Old generation is gone before the new swapchain is created
        self.presentation = None;
        let resources = SwapchainResources::create(&self.presentation_context(), framebuffer_size, preferences)?;
        self.presentation = Some(resources);
        Ok(())
    }

    fn frame(&self, slot: usize) -> VulkanResult<&FrameSlot> {
        self.frames.get(slot).ok_or(VulkanError::InvalidFrameIndex {
            index: slot,
            frames: self.frames.len(),
        })
    }

    fn presentation(&self) -> VulkanResult<&SwapchainResources> {
        self.presentation.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "no swapchain".to_string(),
        })
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to idle device before teardown: {}", e);
        }
        log::debug!("Destroying renderer resources");
    }
}

/// One frame's view of the backend, handed to the scheduler
struct FrameDriver<'a> {
    backend: &'a mut VulkanBackend,
    policies: &'a mut ResolvedPolicies,
    framebuffer: &'a FramebufferState,
}

impl FrameBackend for FrameDriver<'_> {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer.size()
    }

    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
        self.backend.frame(slot)?.in_flight.wait(u64::MAX)
    }

    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
        // A failed rebuild leaves no swapchain; try again
        let Some(presentation) = &self.backend.presentation else {
            return Ok(AcquireOutcome::OutOfDate);
        };
        let swapchain = presentation.swapchain();
        let semaphore = self.backend.frame(slot)?.image_available.handle();

        let result = unsafe {
            swapchain
                .loader()
                .acquire_next_image(swapchain.handle(), u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(VulkanError::AcquireFailed(e)),
        }
    }

    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
        self.backend.frame(slot)?.in_flight.reset()
    }

    fn record(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        let backend = &*self.backend;
        let frame = backend.frame(slot)?;
        let presentation = backend.presentation()?;
        let framebuffer = presentation.framebuffer(image_index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("no framebuffer for swapchain image {image_index}"),
        })?;
        let uniform_buffer = backend.uniforms.get(slot).map(UniformBuffer::handle).ok_or(
            VulkanError::InvalidFrameIndex {
                index: slot,
                frames: backend.uniforms.len(),
            },
        )?;

        let device = backend.device.handle();
        unsafe { device.reset_command_buffer(frame.command_buffer, vk::CommandBufferResetFlags::empty()) }
            .map_err(VulkanError::Api)?;

        let target = FrameTarget {
            device,
            command_buffer: frame.command_buffer,
            framebuffer,
            frame_index: slot,
            image_index,
            extent: presentation.extent(),
            render_pass: backend.render_pass.handle(),
            pipeline: backend.pipeline.as_ref().map(GraphicsPipeline::handle),
            pipeline_layout: backend.pipeline_layout.handle(),
            descriptor_set: backend.descriptor_sets[slot],
            uniform_buffer,
            sampler: backend.sampler.handle(),
            clear_color: backend.clear_color,
        };
        self.policies.record(&target)
    }

    fn submit(&mut self, slot: usize) -> VulkanResult<()> {
        let frame = self.backend.frame(slot)?;

        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.backend.device.handle().queue_submit(
                self.backend.device.graphics_queue(),
                &[submit_info],
                frame.in_flight.handle(),
            )
        }
        .map_err(VulkanError::SubmitFailed)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
        let frame = self.backend.frame(slot)?;
        let swapchain = self.backend.presentation()?.swapchain();

        let wait_semaphores = [frame.render_finished.handle()];
        let swapchains = [swapchain.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { swapchain.loader().queue_present(self.backend.device.present_queue(), &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(VulkanError::PresentFailed(e)),
        }
    }

    fn recreate_swapchain(&mut self) -> VulkanResult<()> {
        self.backend
            .recreate_swapchain(self.framebuffer.size(), self.policies.swapchain_preferences())
    }
}

struct ActiveRenderer {
    backend: VulkanBackend,
    scheduler: FrameScheduler,
    framebuffer: FramebufferState,
}

/// Owns the Vulkan object tree and drives frames
///
/// # Example
///
/// ```no_run
/// use vulkan_renderer::prelude::*;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RendererConfig::default();
/// let mut window = Window::new(&config.window)?;
/// let mut renderer = Renderer::new(config, RendererPolicies::new())?;
/// renderer.init(&window)?;
///
/// while !window.should_close() {
///     window.poll_events();
///     renderer.render()?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct Renderer {
    config: RendererConfig,
    policies: ResolvedPolicies,
    active: Option<ActiveRenderer>,
}

impl Renderer {
    /// Validate `config` and resolve `policies`; no GPU work happens yet
    pub fn new(config: RendererConfig, policies: RendererPolicies) -> VulkanResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            policies: policies.resolve(),
            active: None,
        })
    }

    /// Build every Vulkan object for `window`
    ///
    /// Calling it again while initialized does nothing. On error nothing
    /// created so far is kept. A minimized window (either framebuffer
    /// dimension zero) is rejected with [`VulkanError::WindowMinimized`]
    /// before any Vulkan object exists; retry once it has been restored.
    pub fn init(&mut self, window: &dyn PresentationWindow) -> VulkanResult<()> {
        if self.active.is_some() {
            log::debug!("Renderer already initialized");
            return Ok(());
        }

        let framebuffer = window.framebuffer_state();
        if framebuffer.is_minimized() {
            let (width, height) = framebuffer.size();
            log::warn!("init() called with a {}x{} framebuffer", width, height);
            return Err(VulkanError::WindowMinimized { width, height });
        }

        let backend = VulkanBackend::new(window, &self.config, &self.policies)?;
        let scheduler = FrameScheduler::new(self.config.frames_in_flight, framebuffer.resize_flag());

        self.active = Some(ActiveRenderer {
            backend,
            scheduler,
            framebuffer,
        });
        Ok(())
    }

    /// Render one frame
    pub fn render(&mut self) -> VulkanResult<FrameStatus> {
        let Some(active) = self.active.as_mut() else {
            log::warn!("render() called before init()");
            return Err(VulkanError::NotInitialized);
        };

        let mut driver = FrameDriver {
            backend: &mut active.backend,
            policies: &mut self.policies,
            framebuffer: &active.framebuffer,
        };
        active.scheduler.render_frame(&mut driver)
    }

    /// Copy `data` into the uniform buffer of `frame_index`
    ///
    /// No synchronization happens here: the slot must not be in flight,
    /// which holds for the slot [`current_frame`](Self::current_frame) names
    /// right after its fence wait, or when the device is idle.
    pub fn update_uniform_buffer<T: Pod>(&mut self, frame_index: usize, data: &T) -> VulkanResult<()> {
        let Some(active) = self.active.as_mut() else {
            log::warn!("update_uniform_buffer() called before init()");
            return Err(VulkanError::NotInitialized);
        };
        active.backend.uniforms.update(frame_index, data)
    }

    /// Block until the GPU has finished the last submission of `frame_index`
    ///
    /// After this returns, that slot's uniform buffer can be overwritten.
    pub fn wait_for_frame(&self, frame_index: usize) -> VulkanResult<()> {
        let Some(active) = self.active.as_ref() else {
            log::warn!("wait_for_frame() called before init()");
            return Err(VulkanError::NotInitialized);
        };
        let fence = &active.backend.frame(frame_index)?.in_flight;
        if !fence.is_signaled()? {
            log::trace!("Waiting for frame slot {}", frame_index);
            fence.wait(u64::MAX)?;
        }
        Ok(())
    }

    /// Destroy every Vulkan object; safe to call more than once
    pub fn clean(&mut self) {
        if let Some(active) = self.active.take() {
            drop(active);
            log::info!("Renderer cleaned up");
        }
    }

    /// Whether `init` has completed
    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    /// Configuration the renderer was built with
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.active
            .as_ref()
            .map_or(self.config.frames_in_flight, |active| active.scheduler.frames_in_flight())
    }

    /// Slot the next frame will use
    pub fn current_frame(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.scheduler.current_frame())
    }

    /// Resize flag shared with the window
    pub fn resize_flag(&self) -> Option<ResizeFlag> {
        self.initialized("resize_flag")
            .map(|active| active.scheduler.resize_flag().clone())
    }

    /// Forward render pass
    pub fn render_pass(&self) -> Option<vk::RenderPass> {
        self.initialized("render_pass").map(|active| active.backend.render_pass.handle())
    }

    /// Pipeline built from the configured shaders, if any
    pub fn pipeline(&self) -> Option<vk::Pipeline> {
        self.initialized("pipeline")
            .and_then(|active| active.backend.pipeline.as_ref().map(GraphicsPipeline::handle))
    }

    /// Layout shared by every pipeline using the per-frame descriptor set
    pub fn pipeline_layout(&self) -> Option<vk::PipelineLayout> {
        self.initialized("pipeline_layout")
            .map(|active| active.backend.pipeline_layout.handle())
    }

    /// Per-frame descriptor set
    pub fn descriptor_set(&self, frame_index: usize) -> Option<vk::DescriptorSet> {
        self.initialized("descriptor_set")
            .and_then(|active| active.backend.descriptor_sets.get(frame_index).copied())
    }

    /// Per-frame uniform buffer
    pub fn uniform_buffer(&self, frame_index: usize) -> Option<vk::Buffer> {
        self.initialized("uniform_buffer")
            .and_then(|active| active.backend.uniforms.get(frame_index).map(UniformBuffer::handle))
    }

    /// Sampler for texture bindings
    pub fn default_sampler(&self) -> Option<vk::Sampler> {
        self.initialized("default_sampler").map(|active| active.backend.sampler.handle())
    }

    /// Current swapchain extent; changes whenever the swapchain is rebuilt
    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.initialized("swapchain_extent")
            .and_then(|active| active.backend.presentation.as_ref().map(SwapchainResources::extent))
    }

    /// Logical device, for creating assets
    pub fn device(&self) -> Option<&Device> {
        self.initialized("device").map(|active| active.backend.device.handle())
    }

    fn initialized(&self, accessor: &str) -> Option<&ActiveRenderer> {
        if self.active.is_none() {
            log::warn!("{}() called before init()", accessor);
        }
        self.active.as_ref()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.clean();
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("application", &self.config.application_name)
            .field("initialized", &self.is_initialized())
            .field("current_frame", &self.current_frame())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::render::window::WindowResult;

    /// Window that only reports a framebuffer size
    struct SizedWindow(FramebufferState);

    impl PresentationWindow for SizedWindow {
        fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
            panic!("no Vulkan work expected for a {:?} window", self.0.size());
        }

        fn create_surface(&self, _instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
            panic!("no Vulkan work expected for a {:?} window", self.0.size());
        }

        fn framebuffer_state(&self) -> FramebufferState {
            self.0.clone()
        }
    }

    fn renderer() -> Renderer {
        Renderer::new(RendererConfig::new("test"), RendererPolicies::new()).unwrap()
    }

    #[test]
    fn test_new_does_not_initialize() {
        let renderer = renderer();
        assert!(!renderer.is_initialized());
        assert_eq!(renderer.current_frame(), 0);
        assert_eq!(renderer.frames_in_flight(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RendererConfig::new("test").with_frames_in_flight(0);
        let result = Renderer::new(config, RendererPolicies::new());
        assert!(matches!(result, Err(VulkanError::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn test_render_before_init() {
        let mut renderer = renderer();
        assert!(matches!(renderer.render(), Err(VulkanError::NotInitialized)));
    }

    #[test]
    fn test_uniform_update_before_init() {
        let mut renderer = renderer();
        let result = renderer.update_uniform_buffer(0, &UniformBufferObject::default());
        assert!(matches!(result, Err(VulkanError::NotInitialized)));
    }

    #[test]
    fn test_accessors_before_init() {
        let renderer = renderer();
        assert!(renderer.render_pass().is_none());
        assert!(renderer.pipeline().is_none());
        assert!(renderer.pipeline_layout().is_none());
        assert!(renderer.descriptor_set(0).is_none());
        assert!(renderer.uniform_buffer(0).is_none());
        assert!(renderer.default_sampler().is_none());
        assert!(renderer.swapchain_extent().is_none());
        assert!(renderer.device().is_none());
        assert!(renderer.resize_flag().is_none());
    }

    #[test]
    fn test_wait_before_init() {
        let renderer = renderer();
        assert!(matches!(renderer.wait_for_frame(0), Err(VulkanError::NotInitialized)));
    }

    #[test]
    fn test_init_rejects_minimized_window() {
        let mut renderer = renderer();
        for size in [(0, 0), (0, 600), (800, 0)] {
            let window = SizedWindow(FramebufferState::new(size.0, size.1));
            let result = renderer.init(&window);
            assert!(matches!(
                result,
                Err(VulkanError::WindowMinimized { width, height }) if (width, height) == size
            ));
            assert!(!renderer.is_initialized());
        }
    }

    #[test]
    fn test_clean_twice_is_noop() {
        let mut renderer = renderer();
        renderer.clean();
        renderer.clean();
        assert!(!renderer.is_initialized());
    }

    #[test]
    fn test_frames_in_flight_from_config() {
        let config = RendererConfig::new("test").with_frames_in_flight(3);
        let renderer = Renderer::new(config, RendererPolicies::new()).unwrap();
        assert_eq!(renderer.frames_in_flight(), 3);
    }
}
