#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::needless_pass_by_value
    )
)]

//! xAPI Trading Platform Client
//!
//! A client for the xAPI trading service, which exposes two logical channels
//! over TCP (optionally TLS): a synchronous request/response command channel
//! and an asynchronous push-notification channel. Both carry newline-free
//! JSON values with no length prefix or delimiter, so message boundaries are
//! inferred from JSON structure itself.
//!
//! # Layers (inside -> outside)
//!
//! - `frame`: structural JSON boundary detection over a raw byte stream
//! - `transport`: connection lifecycle, TLS, framed send/receive, pacing
//! - `command`: synchronous request/response client and login
//! - `stream`: subscribe/unsubscribe directives and handler dispatch
//! - `config` / `telemetry`: environment configuration and logging setup
//!
//! # Typical flow
//!
//! ```ignore
//! let config = ClientConfig::from_env()?;
//!
//! let mut client =
//!     CommandClient::connect(&config.request_endpoint(), &config.transport).await?;
//! let session = client.login(&config.credentials).await?;
//!
//! let handlers = HandlerTable::new()
//!     .on("tickPrices", |msg| tracing::info!(?msg, "tick"));
//! let mut stream = StreamClient::connect(
//!     &config.stream_endpoint(),
//!     &config.transport,
//!     session,
//!     handlers,
//! )
//! .await?;
//!
//! stream.subscribe(Directive::new("getTickPrices").with_param("symbol", "EURUSD")).await?;
//! // ...
//! stream.disconnect().await;
//! client.disconnect().await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Request/response command channel and login.
pub mod command;

/// Configuration types loaded from the environment.
pub mod config;

/// JSON message framing over an undelimited byte stream.
pub mod frame;

/// Streaming push channel and handler dispatch.
pub mod stream;

/// Logging setup.
pub mod telemetry;

/// Framed socket transport (TCP/TLS).
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use command::{Command, CommandClient, CommandError, LoginCredentials, SessionToken};
pub use config::{ClientConfig, ConfigError, Endpoint, TransportSettings};
pub use frame::{DecodeBuffer, FrameError};
pub use stream::{Directive, Handler, HandlerTable, StreamClient, StreamError};
pub use transport::{FramedTransport, TransportError};
