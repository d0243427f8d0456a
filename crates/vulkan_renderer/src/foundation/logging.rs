//! Logging utilities
//!
//! The renderer only emits through the `log` macros; binaries pick the backend.

pub use log::{debug, error, info, trace, warn};

/// Initialize `env_logger` at `Info`, letting `RUST_LOG` override the level.
pub fn init() {
    init_with_level(log::LevelFilter::Info);
}

/// Initialize `env_logger` with a default level filter.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_with_level(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}
