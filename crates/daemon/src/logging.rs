//! Tracing subscriber setup
//!
//! `RUST_LOG` overrides the default `lockstep=info` filter. With a log
//! directory configured, JSON lines are also written to a daily rolling file.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "lockstep=info";
const LOG_FILE_PREFIX: &str = "lockstep.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Keep the returned guard alive until exit
/// or buffered file output is lost.
pub fn init(format: LogFormat, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to create env filter")?;

    let mut layers: Vec<BoxedLayer> = vec![match format {
        // Production: JSON structured logging
        LogFormat::Json => fmt::layer().json().boxed(),
        // Development: pretty formatting with colors
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    }];

    let guard = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
