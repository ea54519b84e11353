//! Logging utilities
//!
//! All crate code logs through the `log` facade with a bracketed subsystem tag,
//! e.g. `[UPLOAD]` or `[PYRAMID]`. Applications call [`init`] or
//! [`init_with_default_filter`] once at startup.

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Initialize logging, falling back to `default_filter` when `RUST_LOG` is unset
pub fn init_with_default_filter(default_filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}
