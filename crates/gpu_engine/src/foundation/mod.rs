//! Foundation module - Core utilities and types
//!
//! - Math types and camera conventions
//! - Logging utilities

pub mod math;
pub mod logging;
