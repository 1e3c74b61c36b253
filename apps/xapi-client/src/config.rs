//! Client Configuration
//!
//! Configuration types for the xAPI client, loaded from environment
//! variables. The command and streaming channels share a host but listen on
//! different ports; both are TLS by default.

use std::time::Duration;

use crate::command::LoginCredentials;
use crate::frame::DEFAULT_MAX_BUFFERED_BYTES;

/// Default xAPI server host.
pub const DEFAULT_HOST: &str = "xapi.xtb.com";

/// Default demo request/response port.
pub const DEFAULT_REQUEST_PORT: u16 = 5124;

/// Default demo streaming port.
pub const DEFAULT_STREAM_PORT: u16 = 5125;

/// One network address for one transport instance.
///
/// Immutable after construction and owned exclusively by the transport that
/// dials it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Server hostname (also used for TLS certificate verification).
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Whether to wrap the connection in TLS.
    pub tls: bool,
}

impl Endpoint {
    /// Create a new endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }

    /// The `host:port` dial address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection and pacing settings shared by both transports.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Maximum connection attempts before giving up.
    pub max_connect_attempts: u32,
    /// Fixed delay between connection attempts.
    pub retry_delay: Duration,
    /// Fixed delay after each outbound message (inter-command pacing
    /// contract with the service, not peer backpressure).
    pub send_pacing: Duration,
    /// Maximum buffered-but-unparsed inbound bytes before the connection
    /// fails with an overflow error.
    pub max_buffered_bytes: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_connect_attempts: 3,
            retry_delay: Duration::from_millis(250),
            send_pacing: Duration::from_millis(100),
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname.
    pub host: String,
    /// Request/response channel port.
    pub request_port: u16,
    /// Streaming channel port.
    pub stream_port: u16,
    /// Whether connections use TLS.
    pub tls: bool,
    /// Transport-level settings.
    pub transport: TransportSettings,
    /// Login credentials.
    pub credentials: LoginCredentials,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// Required: `XAPI_USER_ID`, `XAPI_PASSWORD`.
    ///
    /// Optional: `XAPI_HOST`, `XAPI_REQUEST_PORT`, `XAPI_STREAM_PORT`,
    /// `XAPI_TLS`, `XAPI_APP_NAME`, `XAPI_MAX_CONNECT_ATTEMPTS`,
    /// `XAPI_RETRY_DELAY_MS`, `XAPI_SEND_PACING_MS`,
    /// `XAPI_MAX_BUFFERED_BYTES`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value fails
    /// to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let user_id_raw = std::env::var("XAPI_USER_ID")
            .map_err(|_| ConfigError::MissingEnvVar("XAPI_USER_ID".to_string()))?;
        let user_id: i64 = user_id_raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "XAPI_USER_ID".to_string(),
                value: user_id_raw,
            })?;

        let password = std::env::var("XAPI_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("XAPI_PASSWORD".to_string()))?;
        if password.is_empty() {
            return Err(ConfigError::EmptyValue("XAPI_PASSWORD".to_string()));
        }

        let app_name = std::env::var("XAPI_APP_NAME")
            .unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string());

        let defaults = TransportSettings::default();
        let transport = TransportSettings {
            max_connect_attempts: parse_env_u32(
                "XAPI_MAX_CONNECT_ATTEMPTS",
                defaults.max_connect_attempts,
            ),
            retry_delay: parse_env_duration_millis("XAPI_RETRY_DELAY_MS", defaults.retry_delay),
            send_pacing: parse_env_duration_millis("XAPI_SEND_PACING_MS", defaults.send_pacing),
            max_buffered_bytes: parse_env_usize(
                "XAPI_MAX_BUFFERED_BYTES",
                defaults.max_buffered_bytes,
            ),
        };

        Ok(Self {
            host: std::env::var("XAPI_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            request_port: parse_env_u16("XAPI_REQUEST_PORT", DEFAULT_REQUEST_PORT),
            stream_port: parse_env_u16("XAPI_STREAM_PORT", DEFAULT_STREAM_PORT),
            tls: parse_env_bool("XAPI_TLS", true),
            transport,
            credentials: LoginCredentials::new(user_id, password, app_name),
        })
    }

    /// Endpoint for the request/response channel.
    #[must_use]
    pub fn request_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.request_port, self.tls)
    }

    /// Endpoint for the streaming channel.
    #[must_use]
    pub fn stream_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.stream_port, self.tls)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable failed to parse.
    #[error("environment variable {key} has invalid value: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map_or(default, |v| v.to_lowercase() != "false")
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
