use std::os::unix::io::RawFd;
use std::path::PathBuf;

use clap::Parser;
use lsm_plugin::client::{DEFAULT_IPC_DIR, UdsConnector};
use serde::{Deserialize, Serialize};

use crate::logger::LogConfig;

/// Started by the management daemon with the descriptor of an already
/// connected socket as the only positional argument.
#[derive(Parser, Debug)]
#[command(
    name = "lsm_forward",
    about = "Storage management plugin that forwards every call to another plugin",
    version
)]
pub struct Cli {
    /// Descriptor of the daemon connection
    pub fd: RawFd,

    /// Log level or EnvFilter directive (e.g. error, warn, info, debug, trace)
    #[arg(long, env = "LSM_FORWARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Write rolling log files here instead of logging to stderr
    #[arg(long, env = "LSM_FORWARD_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// OpenTelemetry endpoint (e.g. http://localhost:4317)
    #[arg(long, env = "LSM_FORWARD_OTEL_ENDPOINT")]
    pub otel_endpoint: Option<String>,

    /// Directory with the sockets of the other plugins
    #[arg(long, env = "LSM_UDS_PATH", default_value = DEFAULT_IPC_DIR)]
    pub ipc_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardConfig {
    pub ipc_dir: PathBuf,
    pub log: LogConfig,
}

impl ForwardConfig {
    pub fn connector(&self) -> UdsConnector {
        UdsConnector::new(&self.ipc_dir)
    }
}

impl From<&Cli> for ForwardConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            ipc_dir: cli.ipc_dir.clone(),
            log: LogConfig::new(cli.log_level.clone(), cli.log_dir.clone(), cli.otel_endpoint.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_build_the_config() {
        let cli = Cli::try_parse_from([
            "lsm_forward",
            "9",
            "--log-level",
            "debug",
            "--log-dir",
            "/var/log/lsm",
            "--ipc-dir",
            "/tmp/ipc",
        ])
        .unwrap();
        assert_eq!(cli.fd, 9);

        let config = ForwardConfig::from(&cli);
        assert_eq!(config.ipc_dir, PathBuf::from("/tmp/ipc"));
        assert_eq!(config.log.log_level, "debug");
        assert_eq!(config.log.log_dir, Some(PathBuf::from("/var/log/lsm")));
        assert_eq!(config.connector().ipc_dir(), std::path::Path::new("/tmp/ipc"));

        let dumped = serde_json::to_value(&config).unwrap();
        assert_eq!(dumped["log"]["log_level"], "debug");
        assert!(dumped["log"]["otel_endpoint"].is_null());
    }

    #[test]
    fn descriptor_is_required() {
        assert!(Cli::try_parse_from(["lsm_forward"]).is_err());
        assert!(Cli::try_parse_from(["lsm_forward", "not-a-number"]).is_err());
    }
}
