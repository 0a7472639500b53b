// src/lib.rs

pub mod config;
pub mod core;
pub mod logging;

/// The crate version, overridable at build time through `FILESEAL_VERSION`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export
pub use crate::core::tasks;
