//! # Vulkan Renderer
//!
//! The presentation core of a Vulkan renderer: device selection, swapchain
//! management, per-frame resources and the frames-in-flight loop. Drawing is
//! left to the application, which records into the command buffer the
//! renderer hands out each frame.
//!
//! ## Features
//!
//! - **Device selection**: first GPU meeting the queue, extension and surface
//!   requirements, filtered by an injectable policy
//! - **Swapchain**: format, present mode and extent choice, rebuilt on resize
//!   or staleness together with depth buffer and framebuffers
//! - **Frames in flight**: fence and semaphore pairs per slot, persistently
//!   mapped uniform buffers and one descriptor set per slot
//! - **Configuration**: TOML or RON files with validation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vulkan_renderer::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     logging::init();
//!
//!     let config = RendererConfig::load_or_default("renderer.toml")?;
//!     let mut window = Window::new(&config.window)?;
//!
//!     let policies = RendererPolicies::new().with_record(clear_only);
//!     let mut renderer = Renderer::new(config, policies)?;
//!     renderer.init(&window)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         renderer.render()?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

/// Configuration files and validation
pub mod config;

/// Logging setup and math helpers
pub mod foundation;

/// Renderer, frame loop, Vulkan wrappers and window
pub mod render;

/// Common imports for applications
pub mod prelude {
    pub use crate::config::{Config, ConfigError, RendererConfig, ShaderConfig, WindowConfig};
    pub use crate::foundation::logging;
    pub use crate::foundation::math::{aspect_ratio, look_at, vulkan_perspective, Mat4, Vec3};
    pub use crate::render::frame::{clear_only, FrameStatus, FrameTarget, ResizeFlag};
    pub use crate::render::policy::{RendererPolicies, Strategy};
    pub use crate::render::vulkan::{DeviceCandidate, UniformBufferObject, VulkanError, VulkanResult};
    pub use crate::render::window::{FramebufferState, PresentationWindow, Window, WindowError};
    pub use crate::render::Renderer;
}
