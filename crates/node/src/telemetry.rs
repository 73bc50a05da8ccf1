//! Logging initialization.
//!
//! Metrics are exposed as text through [`metrics_text`]; serving them is left
//! to whatever endpoint the embedding binary runs.

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,lightclient=debug";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `filter` is used, falling back to
/// [`DEFAULT_FILTER`].
pub fn init_logging(filter: Option<&str>) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => EnvFilter::try_new(filter.unwrap_or(DEFAULT_FILTER))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Prometheus text rendering of the engine's metrics.
pub fn metrics_text() -> String {
    lightclient_odr::metrics::gather_text()
}
