//! Rendering
//!
//! The [`Renderer`] owns every Vulkan object and runs frames through the
//! [`frame`] scheduler. Applications customise it through
//! [`RendererPolicies`] and record their own commands via
//! [`FrameTarget`](frame::FrameTarget).

/// Frame pacing, resize flag and the recording bridge
pub mod frame;

/// Injectable device, swapchain and recording policies
pub mod policy;

/// Renderer lifecycle
pub mod renderer;

/// Vulkan object wrappers
pub mod vulkan;

/// Window layer
pub mod window;

pub use frame::{FrameStatus, FrameTarget, RecordFn, ResizeFlag};
pub use policy::{RendererPolicies, Strategy};
pub use renderer::Renderer;
pub use window::{FramebufferState, PresentationWindow, Window, WindowError};
