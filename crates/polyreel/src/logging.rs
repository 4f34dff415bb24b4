//! Process-wide logging setup.
//!
//! Installs a `tracing` subscriber and routes `log` records into it, so the
//! repository layer (`log`) and the pipeline layer (`tracing`) share one
//! output.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::PolyreelError;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Builds the level filter: `RUST_LOG` wins over the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, PolyreelError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| PolyreelError::Logging(format!("invalid level '{}': {}", config.level, e))),
    }
}

/// Installs the global subscriber.
///
/// Returns `Ok(true)` on the first successful call and `Ok(false)` afterwards.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, PolyreelError> {
    if INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(false);
    }

    let result = install(config);
    if result.is_err() {
        INITIALIZED.store(false, Ordering::SeqCst);
    }
    result.map(|()| true)
}

fn install(config: &LoggingConfig) -> Result<(), PolyreelError> {
    let filter = build_filter(config)?;

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    };

    let subscriber = Registry::default().with(fmt_layer).with(filter);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| PolyreelError::Logging(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| PolyreelError::Logging(e.to_string()))?;

    tracing::debug!(level = %config.level, format = ?config.format, "logging initialized");
    Ok(())
}
