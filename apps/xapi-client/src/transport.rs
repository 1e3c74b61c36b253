//! Framed JSON Socket Transport
//!
//! Owns one TCP (optionally TLS-wrapped) connection and converts between raw
//! byte streams and discrete JSON values using a [`DecodeBuffer`]. Connection
//! establishment retries a bounded number of times with a fixed delay;
//! refusals are logged, not raised per attempt.
//!
//! # TLS
//!
//! TLS uses the platform trust store (`rustls-native-certs`) and verifies the
//! server certificate against the endpoint host.
//!
//! # Pacing
//!
//! The service enforces an inter-command pacing contract, so every outbound
//! message is followed by a fixed delay. This is a primitive rate limit, not
//! a backpressure signal from the peer.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::{Endpoint, TransportSettings};
use crate::frame::{DecodeBuffer, FrameError};

/// Socket read chunk size.
const READ_CHUNK_BYTES: usize = 4096;

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Every connection attempt was refused or failed.
    #[error("connection to {endpoint} failed after {attempts} attempts")]
    ConnectionExhausted {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The endpoint host is not a valid TLS server name.
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// Operation attempted after `close()`.
    #[error("transport is closed")]
    Closed,

    /// The peer closed the connection.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Outbound message failed to serialize.
    #[error("message encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Framing failure on the inbound byte stream.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Stream wrapper
// =============================================================================

/// A TCP stream, optionally wrapped in TLS.
#[derive(Debug)]
pub enum MaybeTlsStream {
    /// Plaintext TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

// =============================================================================
// Frame I/O
// =============================================================================

/// Serialize `value` and write it fully, then apply the pacing delay.
async fn write_frame<W, T>(writer: &mut W, value: &T, pacing: Duration) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_vec(value).map_err(TransportError::Encode)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    tracing::trace!(bytes = encoded.len(), "message sent");

    if !pacing.is_zero() {
        tokio::time::sleep(pacing).await;
    }
    Ok(())
}

/// Read until one complete JSON value can be extracted from `buffer`.
///
/// Values already buffered by a previous read are returned without touching
/// the socket, so several messages delivered in a single read surface as
/// sequential results.
async fn read_frame<R>(reader: &mut R, buffer: &mut DecodeBuffer) -> Result<Value, TransportError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(value) = buffer.extract()? {
            tracing::trace!(buffered = buffer.len(), "message received");
            return Ok(value);
        }

        let mut chunk = [0u8; READ_CHUNK_BYTES];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::PeerClosed);
        }
        buffer.feed(&chunk[..n])?;
    }
}

// =============================================================================
// Framed transport
// =============================================================================

/// One framed JSON connection.
///
/// Owns the socket and its [`DecodeBuffer`] exclusively. Construct with
/// [`connect`](Self::connect); after [`close`](Self::close) every operation
/// fails with [`TransportError::Closed`].
#[derive(Debug)]
pub struct FramedTransport {
    stream: Option<MaybeTlsStream>,
    buffer: DecodeBuffer,
    pacing: Duration,
}

impl FramedTransport {
    /// Establish the connection, retrying up to the configured number of
    /// attempts with a fixed delay between them.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionExhausted`] once all attempts
    /// fail, or [`TransportError::InvalidServerName`] if TLS is requested for
    /// a host that is not a valid server name.
    pub async fn connect(
        endpoint: &Endpoint,
        settings: &TransportSettings,
    ) -> Result<Self, TransportError> {
        let tls = if endpoint.tls {
            let server_name = ServerName::try_from(endpoint.host.clone())
                .map_err(|_| TransportError::InvalidServerName(endpoint.host.clone()))?;
            Some((tls_connector(), server_name))
        } else {
            None
        };

        for attempt in 1..=settings.max_connect_attempts {
            match dial(endpoint, tls.as_ref()).await {
                Ok(stream) => {
                    tracing::info!(%endpoint, attempt, "socket connected");
                    return Ok(Self {
                        stream: Some(stream),
                        buffer: DecodeBuffer::with_limit(settings.max_buffered_bytes),
                        pacing: settings.send_pacing,
                    });
                }
                Err(e) => {
                    tracing::warn!(%endpoint, attempt, error = %e, "connection attempt failed");
                    if attempt < settings.max_connect_attempts {
                        tokio::time::sleep(settings.retry_delay).await;
                    }
                }
            }
        }

        Err(TransportError::ConnectionExhausted {
            endpoint: endpoint.to_string(),
            attempts: settings.max_connect_attempts,
        })
    }

    /// Serialize `value` to JSON and write it to the socket in full.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::Closed`] after `close()`, or with the
    /// underlying I/O error.
    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        write_frame(stream, value, self.pacing).await
    }

    /// Wait for the next complete JSON value.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::Closed`] after `close()`,
    /// [`TransportError::PeerClosed`] on EOF, or a framing error if the peer
    /// sends malformed JSON or overruns the buffer limit.
    pub async fn receive(&mut self) -> Result<Value, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        read_frame(stream, &mut self.buffer).await
    }

    /// Close the connection. Idempotent; later `send`/`receive` calls fail
    /// cleanly with [`TransportError::Closed`].
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(error = %e, "socket shutdown failed");
            }
        }
    }

    /// Split into independently owned read and write halves.
    ///
    /// The read half keeps the decode buffer; the write half keeps the
    /// pacing delay. Used by the streaming client so its listener task and
    /// its directive writer operate on disjoint directions.
    ///
    /// # Panics
    ///
    /// Panics if the transport was already closed.
    #[must_use]
    pub fn into_split(self) -> (FramedReader, FramedWriter) {
        let Some(stream) = self.stream else {
            panic!("into_split called on a closed transport");
        };
        let (read_half, write_half) = tokio::io::split(stream);
        (
            FramedReader {
                half: read_half,
                buffer: self.buffer,
            },
            FramedWriter {
                half: write_half,
                pacing: self.pacing,
            },
        )
    }
}

/// Receiving half of a split [`FramedTransport`].
#[derive(Debug)]
pub struct FramedReader {
    half: ReadHalf<MaybeTlsStream>,
    buffer: DecodeBuffer,
}

impl FramedReader {
    /// Wait for the next complete JSON value.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`FramedTransport::receive`].
    pub async fn receive(&mut self) -> Result<Value, TransportError> {
        read_frame(&mut self.half, &mut self.buffer).await
    }
}

/// Sending half of a split [`FramedTransport`].
#[derive(Debug)]
pub struct FramedWriter {
    half: WriteHalf<MaybeTlsStream>,
    pacing: Duration,
}

impl FramedWriter {
    /// Serialize `value` to JSON and write it to the socket in full.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`FramedTransport::send`].
    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), TransportError> {
        write_frame(&mut self.half, value, self.pacing).await
    }

    /// Shut down the write direction of the socket.
    pub async fn close(&mut self) {
        if let Err(e) = self.half.shutdown().await {
            tracing::debug!(error = %e, "socket shutdown failed");
        }
    }
}

// =============================================================================
// Dialing
// =============================================================================

async fn dial(
    endpoint: &Endpoint,
    tls: Option<&(TlsConnector, ServerName<'static>)>,
) -> Result<MaybeTlsStream, std::io::Error> {
    let tcp = TcpStream::connect(endpoint.addr()).await?;

    match tls {
        Some((connector, server_name)) => {
            let stream = connector.connect(server_name.clone(), tcp).await?;
            Ok(MaybeTlsStream::Tls(Box::new(stream)))
        }
        None => Ok(MaybeTlsStream::Plain(tcp)),
    }
}

/// Build a TLS connector backed by the platform trust store.
fn tls_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::warn!(error = %error, "failed to load a native root certificate");
    }
    for cert in native.certs {
        let _ = roots.add(cert);
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn read_frame_reassembles_split_message() {
        let mut reader = tokio_test::io::Builder::new()
            .read(br#"{"command":"tickPri"#)
            .read(br#"ces","ask":1.25}"#)
            .build();
        let mut buffer = DecodeBuffer::new();

        let value = read_frame(&mut reader, &mut buffer).await.unwrap();
        assert_eq!(value["command"], "tickPrices");
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn read_frame_returns_buffered_message_without_reading() {
        // One socket read carries two messages; the second extraction must
        // come from the buffer alone.
        let mut reader = tokio_test::io::Builder::new()
            .read(br#"{"seq":1}{"seq":2}"#)
            .build();
        let mut buffer = DecodeBuffer::new();

        let first = read_frame(&mut reader, &mut buffer).await.unwrap();
        assert_eq!(first["seq"], 1);

        let second = read_frame(&mut reader, &mut buffer).await.unwrap();
        assert_eq!(second["seq"], 2);
    }

    #[tokio::test]
    async fn read_frame_eof_is_peer_closed() {
        let mut reader = tokio::io::empty();
        let mut buffer = DecodeBuffer::new();

        let result = read_frame(&mut reader, &mut buffer).await;
        assert!(matches!(result, Err(TransportError::PeerClosed)));
    }

    #[tokio::test]
    async fn read_frame_surfaces_malformed_json() {
        let mut reader = tokio_test::io::Builder::new().read(b"{\"a\": nope}").build();
        let mut buffer = DecodeBuffer::new();

        let result = read_frame(&mut reader, &mut buffer).await;
        assert!(matches!(
            result,
            Err(TransportError::Frame(FrameError::Malformed(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn write_frame_writes_canonical_json_and_paces() {
        let mut sink = Vec::new();
        let pacing = Duration::from_millis(100);
        let started = tokio::time::Instant::now();

        write_frame(&mut sink, &json!({"command": "ping"}), pacing)
            .await
            .unwrap();

        assert_eq!(sink, br#"{"command":"ping"}"#);
        assert!(started.elapsed() >= pacing);
    }

    #[tokio::test]
    async fn write_frame_without_pacing_skips_delay() {
        let mut sink = Vec::new();
        write_frame(&mut sink, &json!(null), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(sink, b"null");
    }
}
