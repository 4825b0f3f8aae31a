//! Router configuration.
//!
//! [`RpcConfig`] holds the tunables the dispatcher itself reads. [`RouterConfig`]
//! is an opaque bag attached to a router or to one of its paths; the router
//! stores and exposes it but never interprets it.
//!
//! # Example
//! ```rust,ignore
//! use procedure_router::{RpcConfig, RouterConfig};
//!
//! let config = RpcConfig::new()
//!     .with_max_body_size(512 * 1024)
//!     .with_socket_buffer(128);
//! config.validate()?;
//!
//! let router_config = RouterConfig::new().with("name", "users");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Default name of the variable holding the broker endpoint.
pub const DEFAULT_BROKER_URL_VAR: &str = "BROKER_REST_URL";
/// Default name of the variable holding the broker access token.
pub const DEFAULT_BROKER_TOKEN_VAR: &str = "BROKER_REST_TOKEN";

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigValidationError {
    /// max_body_size must be greater than 0
    #[error("max_body_size must be greater than 0")]
    InvalidMaxBodySize,
    /// socket_buffer must be greater than 0
    #[error("socket_buffer must be greater than 0")]
    InvalidSocketBuffer,
    /// broker variable names must not be empty
    #[error("broker variable name for {0} must not be empty")]
    EmptyBrokerVar(&'static str),
}

impl From<ConfigValidationError> for crate::RpcError {
    fn from(err: ConfigValidationError) -> Self {
        crate::RpcError::bad_request(err.to_string())
    }
}

/// Dispatcher configuration.
///
/// * `max_body_size` - Largest accepted write body in bytes. Larger bodies are
///   rejected with `PAYLOAD_TOO_LARGE`. Default: 1 MiB.
/// * `socket_buffer` - Capacity of each realtime session's outbound queue.
///   Default: 64 frames.
/// * `broker_url_var` / `broker_token_var` - Environment variables resolved at
///   connection time for the pub/sub broker. Default: `BROKER_REST_URL` and
///   `BROKER_REST_TOKEN`.
/// * `debug_logging` - Emit a debug event for every realtime frame. Default: false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Maximum write body size in bytes (default: 1MiB)
    pub max_body_size: usize,
    /// Outbound frame queue capacity per realtime session (default: 64)
    pub socket_buffer: usize,
    /// Environment variable naming the broker endpoint
    pub broker_url_var: String,
    /// Environment variable naming the broker token
    pub broker_token_var: String,
    /// Enable per-frame debug logging (default: false)
    pub debug_logging: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024,
            socket_buffer: 64,
            broker_url_var: DEFAULT_BROKER_URL_VAR.to_string(),
            broker_token_var: DEFAULT_BROKER_TOKEN_VAR.to_string(),
            debug_logging: false,
        }
    }
}

impl RpcConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return an error if invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_body_size` is 0
    /// - `socket_buffer` is 0
    /// - either broker variable name is empty
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_body_size == 0 {
            return Err(ConfigValidationError::InvalidMaxBodySize);
        }
        if self.socket_buffer == 0 {
            return Err(ConfigValidationError::InvalidSocketBuffer);
        }
        if self.broker_url_var.trim().is_empty() {
            return Err(ConfigValidationError::EmptyBrokerVar("the endpoint"));
        }
        if self.broker_token_var.trim().is_empty() {
            return Err(ConfigValidationError::EmptyBrokerVar("the token"));
        }
        Ok(())
    }

    /// Set the maximum write body size in bytes.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Set the outbound queue capacity of realtime sessions.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_socket_buffer(mut self, size: usize) -> Self {
        self.socket_buffer = size;
        self
    }

    /// Set the environment variable names holding broker credentials.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_broker_vars(mut self, url_var: impl Into<String>, token_var: impl Into<String>) -> Self {
        self.broker_url_var = url_var.into();
        self.broker_token_var = token_var.into();
        self
    }

    /// Enable or disable per-frame debug logging.
    #[must_use = "This method returns a new RpcConfig and does not modify self"]
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }
}

// =============================================================================
// Router configuration
// =============================================================================

/// Free-form configuration attached to a router or one of its paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouterConfig(Map<String, Value>);

impl RouterConfig {
    /// Empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key
    #[must_use = "This method returns a new RouterConfig and does not modify self"]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Read a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// True when nothing has been set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for RouterConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
