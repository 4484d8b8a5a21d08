//! Logging setup for the pipeline.
//!
//! Installs a global tracing subscriber writing to stdout. The crate is a
//! library embedded in a host UI, so there is no log-file management here;
//! hosts that want files can install their own subscriber instead.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to set the global tracing subscriber.
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(String),
}

/// Initialize tracing output filtered by `RUST_LOG` (default `info`).
///
/// Subsequent calls are no-ops. Failures are returned so callers can degrade
/// gracefully without aborting startup.
pub fn init() -> Result<(), LoggingError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| LoggingError::SetGlobal(err.to_string()))?;
    let _ = INSTALLED.set(());
    Ok(())
}
