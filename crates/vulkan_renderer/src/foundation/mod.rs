//! Foundation module - small utilities shared by the renderer and its callers
//!
//! - Logging setup on top of the `log` facade
//! - Matrix helpers for building the per-frame uniform block

pub mod logging;
pub mod math;
