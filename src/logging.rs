use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, TelemetryError};

/// Default filter when `RUST_LOG` is not set.
pub fn default_directive(debug: bool) -> String {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    format!("{}={}", env!("CARGO_CRATE_NAME"), level)
}

/// Sets up the logging subscriber for the application.
///
/// # Arguments
/// * `role` - `client` or `server`, attached to the startup line
/// * `debug` - log at debug level unless `RUST_LOG` says otherwise
/// * `json` - one JSON object per line instead of the compact format
pub fn init_logger(role: &str, debug: bool, json: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let json_layer = json.then(|| fmt::layer().json().with_current_span(false));
    let compact_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
        .map_err(|e| TelemetryError::Internal(format!("Failed to initialize logger: {}", e)))?;

    tracing::info!(role, version = env!("CARGO_PKG_VERSION"), "Logger initialized");
    Ok(())
}
