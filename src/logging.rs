//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise `LOG_LEVEL` (default `info`) applies.
//! `LOG_FORMAT=json` switches to one JSON object per line.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

pub fn init_tracing() {
    let config = LoggingConfig::from_env().unwrap_or(LoggingConfig {
        level: "info".to_string(),
        format: LogFormat::Plain,
    });
    init_tracing_with(&config);
}

pub fn init_tracing_with(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    // A second init (tests, embedded use) keeps the first subscriber
    let _ = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Plain => registry.with(fmt::layer().with_target(true)).try_init(),
    };
}
