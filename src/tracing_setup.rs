use std::sync::Arc;

use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::{json_line_sink::JsonLineSink, rotating_file::RotatingFileWriter},
    config::models::{LogConfig, Tier},
    ports::LogSink,
};

/// Filter from `RUST_LOG` when set, otherwise from the configured level.
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Initialize logging for `tier`: pretty console output when running
/// locally, JSON lines into the rotating log file everywhere else.
///
/// Returns the access log sink, writing to the same destination (stdout or
/// the shared rotating file).
pub fn init_tracing(tier: Tier, config: &LogConfig) -> Result<Arc<dyn LogSink>> {
    let filter = env_filter(&config.level)?;

    if tier.logs_to_file() {
        let writer = RotatingFileWriter::from_config(&config.file)
            .wrap_err_with(|| format!("Failed to open log file {}", config.file.path))?;
        Registry::default()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(writer.clone()),
            )
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
        tracing::info!(
            tier = %tier,
            level = %config.level,
            path = %config.file.path,
            "logging initialized"
        );
        Ok(Arc::new(JsonLineSink::new(writer).with_field("tier", tier.to_string())))
    } else {
        Registry::default()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
        tracing::info!(tier = %tier, level = %config.level, "logging initialized");
        Ok(Arc::new(JsonLineSink::new(std::io::stdout).with_field("tier", tier.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_configured_level() {
        assert!(env_filter("debug").is_ok());
    }

    #[test]
    fn test_file_tier_fails_on_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let mut config = LogConfig::default();
        config.file.path = blocker.join("main.log").to_string_lossy().into_owned();
        assert!(init_tracing(Tier::Prod, &config).is_err());
    }
}
