//! Tracing setup driven by [`LoggingSettings`].
//!
//! `RUST_LOG`, when set, replaces the configured filter at startup. Once
//! [`init_tracing`] installed the subscriber, [`apply_logging`] swaps the
//! filter at runtime, e.g. after the settings file was reloaded.

use std::sync::OnceLock;

use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingSettings;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Builds the filter described by `settings`: the base level plus per-target
/// directives such as `schemehub_cache::listener=debug`.
pub fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, String> {
    let level = settings.level.to_ascii_lowercase();
    let mut filter = EnvFilter::try_new(&level)
        .map_err(|e| format!("invalid logging.level {:?}: {e}", settings.level))?;
    for directive in &settings.directives {
        let parsed = directive
            .parse::<Directive>()
            .map_err(|e| format!("invalid logging directive {directive:?}: {e}"))?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

/// Installs the global subscriber.
///
/// Returns `Ok(false)` when another subscriber was installed first; the
/// level can then not be changed through [`apply_logging`].
pub fn init_tracing(settings: &LoggingSettings) -> Result<bool, String> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::try_from_default_env().map_err(|e| format!("invalid RUST_LOG: {e}"))?,
        Err(_) => build_filter(settings)?,
    };

    let (reload_layer, handle) = reload::Layer::new(filter);
    let installed = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(settings.with_target))
        .try_init()
        .is_ok();
    if installed {
        let _ = LOG_RELOAD_HANDLE.set(handle);
    }
    Ok(installed)
}

/// Replaces the active filter with the one described by `settings`.
///
/// Returns `Ok(false)` if tracing was not set up by [`init_tracing`].
pub fn apply_logging(settings: &LoggingSettings) -> Result<bool, String> {
    let filter = build_filter(settings)?;
    let Some(handle) = LOG_RELOAD_HANDLE.get() else {
        return Ok(false);
    };
    handle
        .reload(filter)
        .map_err(|e| format!("failed to reload log filter: {e}"))?;
    tracing::info!(level = %settings.level, "logging level changed");
    Ok(true)
}
