//! Streaming Push Channel
//!
//! [`StreamClient`] maintains the long-lived push connection: it sends
//! fire-and-forget subscribe/unsubscribe directives on the write half and
//! runs a listener task on the read half that dispatches each inbound
//! message to the [`HandlerTable`] by the message's `command` field.
//!
//! # Lifecycle
//!
//! Connecting -> Running -> Stopped, expressed through ownership:
//! [`StreamClient::connect`] either returns a running client (listener task
//! started) or fails before any listener exists, and
//! [`StreamClient::disconnect`] consumes the client, which is terminal.
//!
//! # Dispatch contract
//!
//! Handlers run inline on the listener task: a slow handler delays every
//! subsequent push. This is an ordering guarantee, not a bug; handlers must
//! be fast or hand work off themselves. A panicking handler is caught and
//! logged so it cannot take the listener down with it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::SessionToken;
use crate::config::{Endpoint, TransportSettings};
use crate::transport::{FramedReader, FramedTransport, FramedWriter, TransportError};

/// Streaming channel errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Transport-level failure, propagated uninterpreted.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Handler table
// =============================================================================

/// Callback invoked with one full decoded push message.
pub type Handler = Box<dyn Fn(&Value) + Send + Sync>;

/// Routing map from inbound `command` key to handler.
///
/// Built once before the streaming client starts and read-only afterwards;
/// keys are unique and insertion order is irrelevant.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Handler>,
}

impl HandlerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one push-message key.
    #[must_use]
    pub fn on(
        mut self,
        key: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(key.into(), Box::new(handler));
        self
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route one inbound message by its `command` field.
    ///
    /// A message without a `command` key, or with a key no handler is
    /// registered for, is logged and dropped; neither case is an error. A
    /// handler panic is caught and logged.
    pub fn dispatch(&self, message: &Value) {
        let Some(key) = message.get("command").and_then(Value::as_str) else {
            tracing::debug!("stream message without a command key dropped");
            return;
        };

        match self.handlers.get(key) {
            Some(handler) => {
                if std::panic::catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                    tracing::error!(command = key, "stream handler panicked");
                }
            }
            None => {
                tracing::debug!(command = key, "no handler registered, message dropped");
            }
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("keys", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Directive
// =============================================================================

/// One fire-and-forget streaming directive.
///
/// Serialized as `{"command": <name>, "streamSessionId": <token>, ..params}`;
/// transient, constructed per call.
#[derive(Debug, Clone)]
pub struct Directive {
    command: String,
    params: Map<String, Value>,
}

impl Directive {
    /// Create a directive with no parameters.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Map::new(),
        }
    }

    /// Add one parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// The directive name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.command
    }

    /// Build the wire object. The session token is inserted into every
    /// directive; explicit parameters win on key collision.
    fn into_message(self, session: &SessionToken) -> Value {
        let mut object = Map::new();
        object.insert("command".to_string(), Value::String(self.command));
        object.insert(
            "streamSessionId".to_string(),
            Value::String(session.as_str().to_string()),
        );
        for (key, value) in self.params {
            object.insert(key, value);
        }
        Value::Object(object)
    }
}

// =============================================================================
// Stream client
// =============================================================================

/// Long-lived push channel with a concurrent listener.
#[derive(Debug)]
pub struct StreamClient {
    writer: FramedWriter,
    session: SessionToken,
    cancel: CancellationToken,
    listener: JoinHandle<()>,
}

impl StreamClient {
    /// Connect the streaming channel and start the listener task.
    ///
    /// On success the client is running; on failure no listener was ever
    /// started.
    ///
    /// # Errors
    ///
    /// Returns the transport's connection error once all attempts are
    /// exhausted.
    pub async fn connect(
        endpoint: &Endpoint,
        settings: &TransportSettings,
        session: SessionToken,
        handlers: HandlerTable,
    ) -> Result<Self, StreamError> {
        let transport = FramedTransport::connect(endpoint, settings).await?;
        let (reader, writer) = transport.into_split();

        let cancel = CancellationToken::new();
        let listener = tokio::spawn(listen(reader, handlers, cancel.clone()));

        Ok(Self {
            writer,
            session,
            cancel,
            listener,
        })
    }

    /// Send a subscribe directive. Fire-and-forget: no acknowledgment is
    /// awaited and no confirmation is surfaced.
    ///
    /// # Errors
    ///
    /// Any transport-level write failure.
    pub async fn subscribe(&mut self, directive: Directive) -> Result<(), StreamError> {
        tracing::debug!(directive = directive.name(), "subscribing");
        self.send_directive(directive).await
    }

    /// Send an unsubscribe directive. Fire-and-forget, like
    /// [`subscribe`](Self::subscribe).
    ///
    /// # Errors
    ///
    /// Any transport-level write failure.
    pub async fn unsubscribe(&mut self, directive: Directive) -> Result<(), StreamError> {
        tracing::debug!(directive = directive.name(), "unsubscribing");
        self.send_directive(directive).await
    }

    /// The session token this client was constructed with.
    #[must_use]
    pub const fn session(&self) -> &SessionToken {
        &self.session
    }

    /// Stop the listener, wait for it to finish, and close the connection.
    ///
    /// Cancellation drops the listener's in-flight read, so this returns
    /// promptly even when no message is arriving.
    pub async fn disconnect(mut self) {
        self.cancel.cancel();
        if let Err(e) = self.listener.await
            && e.is_panic()
        {
            tracing::error!("stream listener panicked");
        }
        self.writer.close().await;
        tracing::info!("stream client stopped");
    }

    async fn send_directive(&mut self, directive: Directive) -> Result<(), StreamError> {
        let message = directive.into_message(&self.session);
        self.writer.send(&message).await?;
        Ok(())
    }
}

/// Listener loop: receive pushes and dispatch them until cancelled or the
/// connection fails.
async fn listen(mut reader: FramedReader, handlers: HandlerTable, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("stream listener cancelled");
                break;
            }
            result = reader.receive() => match result {
                Ok(message) => handlers.dispatch(&message),
                Err(TransportError::PeerClosed) => {
                    tracing::info!("stream connection closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream receive failed");
                    break;
                }
            },
        }
    }
}
