//! Request/Response Command Channel
//!
//! [`CommandClient`] turns one [`FramedTransport`] into a synchronous
//! request/response channel: `execute` sends a command and blocks for exactly
//! the next decoded value. The channel is not multiplexed; at most one
//! outstanding request is supported, and request/response ordering is the
//! caller's responsibility.
//!
//! # Wire format
//!
//! Every command is one JSON object: `{"command": <name>, "arguments": {..}}`.
//!
//! # Login
//!
//! A successful `login` exchange returns an opaque [`SessionToken`]
//! (`streamSessionId`), which the streaming channel requires for every
//! directive.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{Endpoint, TransportSettings};
use crate::transport::{FramedTransport, TransportError};

/// Command channel errors.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Transport-level failure, propagated uninterpreted.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The service rejected the login request.
    #[error("login rejected: code={code:?} description={description:?}")]
    LoginRejected {
        /// Service error code, if present.
        code: Option<String>,
        /// Service error description, if present.
        description: Option<String>,
    },

    /// The login response reported success but carried no session token.
    #[error("login response did not contain a stream session id")]
    MissingSessionToken,
}

// =============================================================================
// Command
// =============================================================================

/// One request on the command channel.
///
/// Transient: constructed per call, serialized verbatim to the wire, then
/// discarded.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    command: String,
    arguments: Map<String, Value>,
}

impl Command {
    /// Create a command with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            command: name.into(),
            arguments: Map::new(),
        }
    }

    /// Add one argument.
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// The command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.command
    }

    /// Build the `login` command for the given credentials.
    #[must_use]
    pub fn login(credentials: &LoginCredentials) -> Self {
        Self::new("login")
            .with_arg("userId", credentials.user_id)
            .with_arg("password", credentials.password.clone())
            .with_arg("appName", credentials.app_name.clone())
    }
}

// =============================================================================
// Credentials and session token
// =============================================================================

/// Account credentials for the `login` command.
///
/// The `Debug` implementation redacts the password for safe logging.
#[derive(Clone)]
pub struct LoginCredentials {
    /// Account number.
    pub user_id: i64,
    /// Account password.
    pub password: String,
    /// Application name reported to the service.
    pub app_name: String,
}

impl LoginCredentials {
    /// Create new credentials.
    #[must_use]
    pub fn new(user_id: i64, password: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            user_id,
            password: password.into(),
            app_name: app_name.into(),
        }
    }
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("user_id", &self.user_id)
            .field("password", &"[REDACTED]")
            .field("app_name", &self.app_name)
            .finish()
    }
}

/// Opaque session token returned by a successful login.
///
/// Carries no meaning to this client; it is passed verbatim into every
/// streaming directive. `Debug` redacts the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a raw token value.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionToken").field(&"[REDACTED]").finish()
    }
}

/// Interpret a login response: check `status`, surface the service's error
/// fields on rejection, extract `streamSessionId` on success.
fn session_from_login_response(response: &Value) -> Result<SessionToken, CommandError> {
    let succeeded = response
        .get("status")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if !succeeded {
        return Err(CommandError::LoginRejected {
            code: response
                .get("errorCode")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            description: response
                .get("errorDescr")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        });
    }

    response
        .get("streamSessionId")
        .and_then(Value::as_str)
        .map(SessionToken::new)
        .ok_or(CommandError::MissingSessionToken)
}

// =============================================================================
// Command client
// =============================================================================

/// Synchronous request/response client over one framed transport.
#[derive(Debug)]
pub struct CommandClient {
    transport: FramedTransport,
}

impl CommandClient {
    /// Connect the command channel.
    ///
    /// # Errors
    ///
    /// Returns the transport's connection error once all attempts are
    /// exhausted.
    pub async fn connect(
        endpoint: &Endpoint,
        settings: &TransportSettings,
    ) -> Result<Self, CommandError> {
        let transport = FramedTransport::connect(endpoint, settings).await?;
        Ok(Self { transport })
    }

    /// Send `command` and return exactly the next decoded value.
    ///
    /// One full round trip on the wire. No retries beyond the transport's
    /// connection-time retries; transport failures propagate uninterpreted.
    ///
    /// # Errors
    ///
    /// Any transport-level failure during send or receive.
    pub async fn execute(&mut self, command: &Command) -> Result<Value, CommandError> {
        tracing::debug!(command = command.name(), "executing command");
        self.transport.send(command).await?;
        Ok(self.transport.receive().await?)
    }

    /// Log in and return the opaque stream session token.
    ///
    /// # Errors
    ///
    /// [`CommandError::LoginRejected`] when the service reports failure,
    /// [`CommandError::MissingSessionToken`] when a success response carries
    /// no token, or any transport failure.
    pub async fn login(
        &mut self,
        credentials: &LoginCredentials,
    ) -> Result<SessionToken, CommandError> {
        let response = self.execute(&Command::login(credentials)).await?;
        let token = session_from_login_response(&response)?;
        tracing::info!(user_id = credentials.user_id, "login succeeded");
        Ok(token)
    }

    /// Close the command channel.
    pub async fn disconnect(mut self) {
        self.transport.close().await;
    }
}
