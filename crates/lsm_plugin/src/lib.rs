pub mod client;
pub mod error;
pub mod jsonrpc;
pub mod management;
pub mod message;
pub mod plugin_runtime;

#[cfg(feature = "test-utils")]
pub mod plugin_test_util;
