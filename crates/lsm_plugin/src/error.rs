//! Error model shared by the plugin runtime and the IPC client.
//!
//! Every failure that crosses the wire is an [`LsmError`]: a numeric
//! [`ErrorCode`], a human readable message and optional opaque data.
//! Codes that this crate does not know by name are carried through
//! untouched as [`ErrorCode::Other`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::jsonrpc::Method;

pub type Result<T> = std::result::Result<T, LsmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorCode {
    LibBug,
    PluginBug,
    JobStarted,
    Timeout,
    DaemonNotRunning,
    PermissionDenied,
    NameConflict,
    ExistsInitiator,
    InvalidArgument,
    NoStateChange,
    NetworkConnRefused,
    NetworkHostDown,
    NetworkError,
    NoMemory,
    NoSupport,
    IsMasked,
    HasChildDependency,
    NotFoundAccessGroup,
    NotFoundFs,
    NotFoundJob,
    NotFoundPool,
    NotFoundFsSnapshot,
    NotFoundVolume,
    NotFoundNfsExport,
    NotFoundSystem,
    NotFoundDisk,
    NotLicensed,
    NoSupportOnlineChange,
    NoSupportOfflineChange,
    PluginAuthFailed,
    PluginIpcFail,
    PluginSocketPermission,
    PluginNotExist,
    NotEnoughSpace,
    TransportCommunication,
    TransportSerialization,
    TransportInvalidArg,
    LastInitInAccessGroup,
    UnsupportedSearchKey,
    EmptyAccessGroup,
    PoolNotReady,
    DiskNotFree,
    Other(i64),
}

impl ErrorCode {
    pub const fn code(self) -> i64 {
        match self {
            ErrorCode::LibBug => 1,
            ErrorCode::PluginBug => 2,
            ErrorCode::JobStarted => 7,
            ErrorCode::Timeout => 11,
            ErrorCode::DaemonNotRunning => 12,
            ErrorCode::PermissionDenied => 13,
            ErrorCode::NameConflict => 50,
            ErrorCode::ExistsInitiator => 52,
            ErrorCode::InvalidArgument => 101,
            ErrorCode::NoStateChange => 125,
            ErrorCode::NetworkConnRefused => 140,
            ErrorCode::NetworkHostDown => 141,
            ErrorCode::NetworkError => 142,
            ErrorCode::NoMemory => 152,
            ErrorCode::NoSupport => 153,
            ErrorCode::IsMasked => 160,
            ErrorCode::HasChildDependency => 161,
            ErrorCode::NotFoundAccessGroup => 200,
            ErrorCode::NotFoundFs => 201,
            ErrorCode::NotFoundJob => 202,
            ErrorCode::NotFoundPool => 203,
            ErrorCode::NotFoundFsSnapshot => 204,
            ErrorCode::NotFoundVolume => 205,
            ErrorCode::NotFoundNfsExport => 206,
            ErrorCode::NotFoundSystem => 208,
            ErrorCode::NotFoundDisk => 209,
            ErrorCode::NotLicensed => 226,
            ErrorCode::NoSupportOnlineChange => 250,
            ErrorCode::NoSupportOfflineChange => 251,
            ErrorCode::PluginAuthFailed => 300,
            ErrorCode::PluginIpcFail => 301,
            ErrorCode::PluginSocketPermission => 307,
            ErrorCode::PluginNotExist => 311,
            ErrorCode::NotEnoughSpace => 350,
            ErrorCode::TransportCommunication => 400,
            ErrorCode::TransportSerialization => 401,
            ErrorCode::TransportInvalidArg => 402,
            ErrorCode::LastInitInAccessGroup => 502,
            ErrorCode::UnsupportedSearchKey => 510,
            ErrorCode::EmptyAccessGroup => 511,
            ErrorCode::PoolNotReady => 512,
            ErrorCode::DiskNotFree => 513,
            ErrorCode::Other(code) => code,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            1 => ErrorCode::LibBug,
            2 => ErrorCode::PluginBug,
            7 => ErrorCode::JobStarted,
            11 => ErrorCode::Timeout,
            12 => ErrorCode::DaemonNotRunning,
            13 => ErrorCode::PermissionDenied,
            50 => ErrorCode::NameConflict,
            52 => ErrorCode::ExistsInitiator,
            101 => ErrorCode::InvalidArgument,
            125 => ErrorCode::NoStateChange,
            140 => ErrorCode::NetworkConnRefused,
            141 => ErrorCode::NetworkHostDown,
            142 => ErrorCode::NetworkError,
            152 => ErrorCode::NoMemory,
            153 => ErrorCode::NoSupport,
            160 => ErrorCode::IsMasked,
            161 => ErrorCode::HasChildDependency,
            200 => ErrorCode::NotFoundAccessGroup,
            201 => ErrorCode::NotFoundFs,
            202 => ErrorCode::NotFoundJob,
            203 => ErrorCode::NotFoundPool,
            204 => ErrorCode::NotFoundFsSnapshot,
            205 => ErrorCode::NotFoundVolume,
            206 => ErrorCode::NotFoundNfsExport,
            208 => ErrorCode::NotFoundSystem,
            209 => ErrorCode::NotFoundDisk,
            226 => ErrorCode::NotLicensed,
            250 => ErrorCode::NoSupportOnlineChange,
            251 => ErrorCode::NoSupportOfflineChange,
            300 => ErrorCode::PluginAuthFailed,
            301 => ErrorCode::PluginIpcFail,
            307 => ErrorCode::PluginSocketPermission,
            311 => ErrorCode::PluginNotExist,
            350 => ErrorCode::NotEnoughSpace,
            400 => ErrorCode::TransportCommunication,
            401 => ErrorCode::TransportSerialization,
            402 => ErrorCode::TransportInvalidArg,
            502 => ErrorCode::LastInitInAccessGroup,
            510 => ErrorCode::UnsupportedSearchKey,
            511 => ErrorCode::EmptyAccessGroup,
            512 => ErrorCode::PoolNotReady,
            513 => ErrorCode::DiskNotFree,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::Other(code) => write!(f, "Other({code})"),
            named => write!(f, "{named:?}({})", named.code()),
        }
    }
}

/// An error as it travels between daemon, plugin and backend.
///
/// Serialises to the wire error object `{"code", "message", "data"}`.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct LsmError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LsmError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn no_support(method: Method) -> Self {
        Self::new(ErrorCode::NoSupport, format!("method '{method}' is not supported"))
    }

    pub fn not_registered() -> Self {
        Self::new(ErrorCode::LibBug, "plugin is not registered")
    }
}

impl From<std::io::Error> for LsmError {
    fn from(err: std::io::Error) -> Self {
        LsmError::new(ErrorCode::TransportCommunication, err.to_string())
    }
}

impl From<serde_json::Error> for LsmError {
    fn from(err: serde_json::Error) -> Self {
        LsmError::new(ErrorCode::TransportSerialization, err.to_string())
    }
}
