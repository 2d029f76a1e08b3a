//! Tracing subscriber initialisation.

use rampart_core::config::LogFormat;
use rampart_core::error::DomainError;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if a global subscriber is already
/// installed.
pub fn init_tracing(format: LogFormat) -> Result<(), DomainError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.map_err(|e| DomainError::Infrastructure(format!("tracing init failed: {e}")))
}
