//! Window management using GLFW
//!
//! The renderer talks to windows only through [`PresentationWindow`]. The
//! GLFW-backed [`Window`] is the implementation used by applications; it
//! feeds framebuffer-size events into a shared [`FramebufferState`] that the
//! frame loop reads.

use ash::vk;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::frame::ResizeFlag;
use crate::config::WindowConfig;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// GLFW cannot report the instance extensions it needs (no Vulkan loader)
    #[error("Vulkan is not supported by the windowing system")]
    VulkanUnsupported,

    /// Surface creation returned an error code
    #[error("Failed to create Vulkan surface: {0:?}")]
    SurfaceCreation(vk::Result),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// What the renderer needs from a window
pub trait PresentationWindow {
    /// Instance extensions the window system needs for presentation
    fn required_instance_extensions(&self) -> WindowResult<Vec<String>>;

    /// Create a surface for this window on `instance`; the caller owns it
    fn create_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR>;

    /// Shared framebuffer size and resize flag
    fn framebuffer_state(&self) -> FramebufferState;
}

#[derive(Debug)]
struct FramebufferSize {
    width: AtomicU32,
    height: AtomicU32,
}

/// Framebuffer size and resize notification shared between window and renderer
///
/// Clones share the same state. The window writes, the renderer reads.
#[derive(Debug, Clone)]
pub struct FramebufferState {
    size: Arc<FramebufferSize>,
    resize: ResizeFlag,
}

impl FramebufferState {
    /// State for a framebuffer of the given size, with no resize pending
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Arc::new(FramebufferSize {
                width: AtomicU32::new(width),
                height: AtomicU32::new(height),
            }),
            resize: ResizeFlag::new(),
        }
    }

    /// Current framebuffer size in pixels
    pub fn size(&self) -> (u32, u32) {
        (
            self.size.width.load(Ordering::Acquire),
            self.size.height.load(Ordering::Acquire),
        )
    }

    /// Either dimension is zero
    pub fn is_minimized(&self) -> bool {
        let (width, height) = self.size();
        width == 0 || height == 0
    }

    /// Record a new size and raise the resize flag
    pub fn notify_resize(&self, width: u32, height: u32) {
        self.size.width.store(width, Ordering::Release);
        self.size.height.store(height, Ordering::Release);
        self.resize.raise();
    }

    /// Handle on the resize flag
    pub fn resize_flag(&self) -> ResizeFlag {
        self.resize.clone()
    }
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    framebuffer: FramebufferState,
}

impl Window {
    /// Create a window with no client API, ready for a Vulkan surface
    pub fn new(config: &WindowConfig) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::VulkanUnsupported);
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(config.resizable));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        let (width, height) = window.get_framebuffer_size();
        let framebuffer = FramebufferState::new(clamp_dimension(width), clamp_dimension(height));

        log::info!("Created window '{}' ({}x{})", config.title, config.width, config.height);

        Ok(Self {
            glfw,
            window,
            events,
            framebuffer,
        })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request (or cancel a request) to close
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Poll GLFW and handle framebuffer resizes and Escape
    ///
    /// Returns every event so the caller can react to input as well.
    pub fn poll_events(&mut self) -> Vec<glfw::WindowEvent> {
        self.glfw.poll_events();
        self.drain_events()
    }

    /// Block until at least one event arrives, then handle it like `poll_events`
    pub fn wait_events(&mut self) -> Vec<glfw::WindowEvent> {
        self.glfw.wait_events();
        self.drain_events()
    }

    fn drain_events(&mut self) -> Vec<glfw::WindowEvent> {
        let events: Vec<glfw::WindowEvent> = glfw::flush_messages(&self.events).map(|(_, event)| event).collect();

        for event in &events {
            match *event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    log::debug!("Framebuffer resized to {}x{}", width, height);
                    self.framebuffer
                        .notify_resize(clamp_dimension(width), clamp_dimension(height));
                }
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                    self.window.set_should_close(true);
                }
                _ => {}
            }
        }

        events
    }

    /// Framebuffer size in pixels as last reported by GLFW
    pub fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer.size()
    }

    /// Seconds since GLFW was initialized
    pub fn time(&self) -> f64 {
        self.glfw.get_time()
    }
}

impl PresentationWindow for Window {
    fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or(WindowError::VulkanUnsupported)
    }

    fn create_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::SurfaceCreation(result))
        }
    }

    fn framebuffer_state(&self) -> FramebufferState {
        self.framebuffer.clone()
    }
}

fn clamp_dimension(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
