use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Text log written under `log_dir`, rotated daily.
pub const LOG_FILE: &str = "lsm_forward.log";
/// Newline delimited JSON, one line per handled request (`target: "request"`).
pub const EVENT_FILE: &str = "lsm_forward_requests.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
}

impl LogConfig {
    pub fn new(log_level: impl Into<String>, log_dir: Option<PathBuf>, otel_endpoint: Option<String>) -> Self {
        Self {
            log_level: log_level.into(),
            log_dir,
            otel_endpoint,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info", None, None)
    }
}

/// Keeps the OTLP pipeline alive; call [`Telemetry::shutdown`] before exit
/// so batched records get flushed.
pub struct Telemetry {
    logger_provider: Option<SdkLoggerProvider>,
}

impl Telemetry {
    pub fn shutdown(self) -> Result<()> {
        if let Some(provider) = self.logger_provider {
            provider.shutdown().context("flushing OTLP logs")?;
        }
        Ok(())
    }
}

static RESOURCE: OnceLock<Resource> = OnceLock::new();
fn get_resource() -> Resource {
    RESOURCE
        .get_or_init(|| {
            Resource::builder()
                .with_service_name("lsm_forward")
                .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
                .build()
        })
        .clone()
}

fn init_logs(endpoint: &str) -> Result<SdkLoggerProvider> {
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("building OTLP log exporter")?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn rolling(dir: &Path, file: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file)
        .build(dir)
        .with_context(|| format!("creating log file {file} in {}", dir.display()))
}

/// Installs the global subscriber.
///
/// - with `log_dir`: a plain text rolling log plus a JSON request log,
/// - without it: human readable output on stderr (stdout is never written),
/// - with `otel_endpoint`: additionally ships every event over OTLP/gRPC.
///
/// `log_level` filters the text, stderr and OTLP outputs only; the request
/// log always records `request` events at info.
pub fn init_tracing(config: &LogConfig) -> Result<Telemetry> {
    let (subscriber, logger_provider) = subscriber(config)?;
    subscriber.try_init().context("installing tracing subscriber")?;
    Ok(Telemetry { logger_provider })
}

fn subscriber(config: &LogConfig) -> Result<(impl Subscriber + Send + Sync + 'static, Option<SdkLoggerProvider>)> {
    let level_filter =
        EnvFilter::try_new(&config.log_level).with_context(|| format!("invalid log level '{}'", config.log_level))?;

    let logger_provider = config.otel_endpoint.as_deref().map(init_logs).transpose()?;
    let otel_layer = match &logger_provider {
        Some(provider) => {
            // the exporter's own transport must not feed back into itself
            let filter = EnvFilter::try_new(format!("{},hyper=off,tonic=off,h2=off", config.log_level))?;
            Some(OpenTelemetryTracingBridge::new(provider).with_filter(filter))
        }
        None => None,
    };

    let (txt_layer, json_layer, stderr_layer) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating log dir {}", dir.display()))?;
            let txt_layer = fmt::layer()
                .with_writer(rolling(dir, LOG_FILE)?)
                .with_ansi(false)
                .with_filter(level_filter);
            let json_layer = fmt::layer()
                .json()
                .with_writer(rolling(dir, EVENT_FILE)?)
                .with_target(true)
                .with_filter(EnvFilter::new("request=info"));
            (Some(txt_layer), Some(json_layer), None)
        }
        None => {
            let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_filter(level_filter);
            (None, None, Some(stderr_layer))
        }
    };

    let subscriber = Registry::default()
        .with(otel_layer)
        .with(txt_layer)
        .with(json_layer)
        .with(stderr_layer);
    Ok((subscriber, logger_provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_is_rejected_before_anything_is_installed() {
        let config = LogConfig::new("lsm_forward=loud", None, None);
        assert!(init_tracing(&config).is_err());
    }

    fn read_log(dir: &Path, prefix: &str) -> String {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.file_name().unwrap().to_string_lossy().starts_with(prefix))
            .map(|path| std::fs::read_to_string(path).unwrap())
            .collect()
    }

    #[test]
    fn request_log_ignores_the_text_level() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig::new("warn", Some(dir.path().to_path_buf()), None);
        let (subscriber, provider) = subscriber(&config).unwrap();
        assert!(provider.is_none());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "request", method = "systems", latency_us = 12, "handled");
            tracing::info!("chatter");
            tracing::warn!("trouble");
        });

        let requests = read_log(dir.path(), EVENT_FILE);
        assert_eq!(requests.lines().count(), 1);
        assert!(requests.contains("\"method\":\"systems\""));

        let text = read_log(dir.path(), LOG_FILE);
        assert!(text.contains("trouble"));
        assert!(!text.contains("chatter"));
        assert!(!text.contains("systems"));
    }

    #[test]
    fn default_is_info_on_stderr() {
        let config = LogConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(config.log_dir.is_none());
        assert!(config.otel_endpoint.is_none());
    }
}
