//! Minimal viewer: opens a window and spins a triangle
//!
//! Usage: `viewer [config.toml|config.ron]` (defaults to `viewer.toml`, then
//! built-in defaults). Set `RUST_LOG=debug` for resource lifecycle logs.

use std::time::Instant;

use ash::vk;
use glfw::{Action, Key, WindowEvent};
use nalgebra::{Point3, Vector3};
use thiserror::Error;
use vulkan_renderer::prelude::*;

const DEFAULT_CONFIG: &str = "viewer.toml";
const FPS_LOG_INTERVAL_SECS: f32 = 5.0;

#[derive(Error, Debug)]
enum ViewerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Renderer(#[from] VulkanError),
}

/// Record the configured pipeline drawing three shader-generated vertices
fn record_triangle(target: &FrameTarget<'_>) -> VulkanResult<()> {
    let Some(pipeline) = target.pipeline else {
        return clear_only(target);
    };

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
        pass.bind_pipeline(pipeline);
        pass.bind_descriptor_sets(target.pipeline_layout, &[target.descriptor_set]);
        pass.draw(3, 1, 0, 0);
    }
    recorder.end()?;
    Ok(())
}

fn load_config() -> Result<RendererConfig, ViewerError> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let mut config = RendererConfig::load_or_default(&path)?;
    log::info!("Loaded configuration for '{}'", config.application_name);

    if config.shaders.is_none() {
        let shaders = ShaderConfig::default();
        match shaders.validate() {
            Ok(()) => config.shaders = Some(shaders),
            Err(e) => log::warn!("{}; rendering clear colour only", e),
        }
    }

    Ok(config)
}

// The renderer owns the surface, so it drops before the window
struct ViewerApp {
    renderer: Renderer,
    window: Window,
    start: Instant,
    frames_rendered: u32,
    last_fps_log: Instant,
}

impl ViewerApp {
    fn new() -> Result<Self, ViewerError> {
        let config = load_config()?;
        let window = Window::new(&config.window)?;

        let policies = RendererPolicies::new()
            .with_device_suitability(|candidate| {
                let usable = candidate.properties.device_type != vk::PhysicalDeviceType::CPU;
                if !usable {
                    log::info!("Skipping software device {}", candidate.name());
                }
                usable
            })
            .with_record(record_triangle);

        let mut renderer = Renderer::new(config, policies)?;
        renderer.init(&window)?;

        let now = Instant::now();
        Ok(Self {
            renderer,
            window,
            start: now,
            frames_rendered: 0,
            last_fps_log: now,
        })
    }

    fn run(&mut self) -> Result<(), ViewerError> {
        while !self.window.should_close() {
            let events = self.window.poll_events();
            self.handle_events(&events);

            let frame = self.renderer.current_frame();
            self.renderer.wait_for_frame(frame)?;
            let ubo = self.uniforms();
            self.renderer.update_uniform_buffer(frame, &ubo)?;

            match self.renderer.render()? {
                FrameStatus::Minimized => {
                    // Nothing to draw until the window is restored
                    let events = self.window.wait_events();
                    self.handle_events(&events);
                }
                FrameStatus::SwapchainRebuilt | FrameStatus::PresentedAndRebuilt => {
                    if let Some(extent) = self.renderer.swapchain_extent() {
                        log::info!("Swapchain now {}x{}", extent.width, extent.height);
                    }
                    self.count_frame();
                }
                FrameStatus::Presented => self.count_frame(),
            }
        }

        log::info!("Window closed after {:.1}s", self.start.elapsed().as_secs_f32());
        self.renderer.clean();
        Ok(())
    }

    fn handle_events(&self, events: &[WindowEvent]) {
        for event in events {
            if let WindowEvent::Key(Key::Space, _, Action::Press, _) = event {
                log::info!(
                    "Frame slot {} of {}",
                    self.renderer.current_frame(),
                    self.renderer.frames_in_flight()
                );
            }
        }
    }

    fn uniforms(&self) -> UniformBufferObject {
        let elapsed = self.start.elapsed().as_secs_f32();
        let aspect = self
            .renderer
            .swapchain_extent()
            .map_or(1.0, |extent| aspect_ratio(extent.width, extent.height));

        let model = Mat4::from_axis_angle(&Vector3::z_axis(), elapsed);
        let view = look_at(&Point3::new(0.0, 0.0, 2.5), &Point3::origin(), &Vec3::y());
        let proj = vulkan_perspective(45.0_f32.to_radians(), aspect, 0.1, 10.0);

        UniformBufferObject::new(&model, &view, &proj)
    }

    fn count_frame(&mut self) {
        self.frames_rendered += 1;
        let since = self.last_fps_log.elapsed().as_secs_f32();
        if since >= FPS_LOG_INTERVAL_SECS {
            log::info!("{:.1} fps", self.frames_rendered as f32 / since);
            self.frames_rendered = 0;
            self.last_fps_log = Instant::now();
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC occurred: {panic_info}");
        if let Some(location) = panic_info.location() {
            eprintln!("Panic location: {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    logging::init();
    log::info!("Starting viewer");

    let result = ViewerApp::new().and_then(|mut app| app.run());
    match result {
        Ok(()) => {
            log::info!("Viewer exited cleanly");
            Ok(())
        }
        Err(e) => {
            log::error!("Viewer failed: {}", e);
            Err(e.into())
        }
    }
}
