// src/logging.rs

//! Sets up `tracing` output for applications embedding the engine.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, Registry, prelude::*, reload};

/// A handle to change the active log filter at runtime.
pub type ReloadHandle = reload::Handle<EnvFilter, Registry>;

/// Installs the global subscriber with a reloadable filter and the compact
/// single-line format. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str) -> Result<Arc<ReloadHandle>> {
    let initial_level = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let filter = EnvFilter::try_new(&initial_level)
        .with_context(|| format!("Invalid log filter '{initial_level}'"))?;

    let (filter, reload_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    info!("fileseal v{} logging at '{}'", crate::VERSION, initial_level);
    Ok(Arc::new(reload_handle))
}

/// Replaces the active log filter.
pub fn set_level(handle: &ReloadHandle, level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("Invalid log filter '{level}'"))?;
    handle
        .reload(filter)
        .with_context(|| format!("Failed to apply log filter '{level}'"))
}
