//! Core connection type

use super::config::ConnectionConfig;
use super::state::HandshakeState;
use super::tls::{SslMode, TlsConfig};
use super::transport::Transport;
use crate::protocol::constants::ssl_response;
use crate::protocol::{decode_message, encode_message, frame_len, BackendMessage, FrontendMessage};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

// Process-wide source of connection ids, only used for log correlation
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Cancellation key announced by the server in BackendKeyData
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKey {
    /// Backend process ID
    pub process_id: i32,
    /// Secret key for CancelRequest
    pub secret_key: i32,
}

/// Postgres connection
///
/// Owns the byte stream to one backend. The stream may be swapped for a TLS
/// stream during negotiation; `id()` stays the same across the swap.
/// Handshake operations take `&mut self`, so one connection can never run two
/// handshakes at once.
pub struct Connection<S> {
    id: u64,
    transport: Option<Transport<S>>,
    state: HandshakeState,
    read_buf: BytesMut,
    io_timeout: Duration,
    max_message_size: usize,
    server_params: HashMap<String, String>,
    backend_key: Option<BackendKey>,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("transport", &self.transport)
            .field("buffered", &self.read_buf.len())
            .finish()
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a freshly connected stream
    pub fn new(stream: S, config: &ConnectionConfig) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            transport: Some(Transport::Plain(stream)),
            // Having a stream means the socket is open
            state: HandshakeState::TcpOpen,
            read_buf: BytesMut::with_capacity(config.max_message_size.min(8192)),
            io_timeout: config.io_timeout,
            max_message_size: config.max_message_size,
            server_params: HashMap::new(),
            backend_key: None,
        }
    }

    /// Identifier, stable across a TLS upgrade
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get current handshake state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the connection runs over TLS
    pub fn is_encrypted(&self) -> bool {
        self.transport
            .as_ref()
            .map(Transport::is_encrypted)
            .unwrap_or(false)
    }

    /// Run-time parameter reported by the server (ParameterStatus)
    pub fn server_parameter(&self, name: &str) -> Option<&str> {
        self.server_params.get(name).map(String::as_str)
    }

    /// All run-time parameters reported by the server
    pub fn server_parameters(&self) -> &HashMap<String, String> {
        &self.server_params
    }

    /// Cancellation key, if the server sent one
    pub fn backend_key(&self) -> Option<BackendKey> {
        self.backend_key
    }

    /// Remember a ParameterStatus value
    pub fn record_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.server_params.insert(name.into(), value.into());
    }

    /// Remember the BackendKeyData values
    pub fn record_backend_key(&mut self, key: BackendKey) {
        self.backend_key = Some(key);
    }

    pub(crate) fn transition(&mut self, next: HandshakeState) -> Result<()> {
        self.state.transition(next)
    }

    /// Decide on transport encryption.
    ///
    /// With `sslmode=disable` nothing is sent and the state resolves to
    /// `PlainText`. Otherwise the 8-byte SSLRequest is sent and exactly one
    /// response byte is read: `S` upgrades the transport in place, anything
    /// else (including EOF) is a refusal that is fatal only when the mode
    /// requires TLS.
    pub(crate) async fn negotiate_encryption(
        &mut self,
        sslmode: SslMode,
        tls_config: Option<&TlsConfig>,
        hostname: &str,
    ) -> Result<()> {
        if !sslmode.attempts_tls() {
            tracing::debug!("sslmode=disable, skipping SSLRequest");
            crate::metrics::counters::tls_negotiation(crate::metrics::labels::TLS_DISABLED);
            return self.transition(HandshakeState::PlainText);
        }

        tracing::debug!(%sslmode, "sending SSLRequest");
        self.send_message(&FrontendMessage::SslRequest).await?;

        match self.read_ssl_response().await? {
            Some(ssl_response::ACCEPT) => {
                tracing::info!("server accepted SSL, upgrading connection");

                let default_config;
                let tls = match tls_config {
                    Some(tls) => tls,
                    None => {
                        default_config = TlsConfig::for_mode(sslmode)?;
                        &default_config
                    }
                };

                let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
                let upgraded = timeout(self.io_timeout, transport.upgrade_to_tls(tls, hostname))
                    .await
                    .map_err(|_| Error::Timeout {
                        operation: "tls handshake",
                        after: self.io_timeout,
                    })
                    .and_then(|result| result);

                match upgraded {
                    Ok(transport) => {
                        self.transport = Some(transport);
                        self.transition(HandshakeState::Encrypted)?;
                        crate::metrics::counters::tls_negotiation(
                            crate::metrics::labels::TLS_UPGRADED,
                        );
                        tracing::info!("TLS connection established");
                        Ok(())
                    }
                    Err(e) => {
                        crate::metrics::counters::tls_negotiation(
                            crate::metrics::labels::TLS_FAILED,
                        );
                        tracing::error!(error = %e, "TLS upgrade failed");
                        Err(e)
                    }
                }
            }
            other => {
                let observed = match other {
                    Some(ssl_response::REJECT) => "N".to_string(),
                    Some(byte) => format!("0x{:02X}", byte),
                    None => "EOF".to_string(),
                };
                crate::metrics::counters::tls_negotiation(crate::metrics::labels::TLS_REFUSED);

                if sslmode.requires_tls() {
                    tracing::error!(response = %observed, %sslmode, "server refused SSL");
                    return Err(Error::SslRefused(sslmode));
                }

                tracing::warn!(
                    response = %observed,
                    "server refused SSL, continuing without encryption"
                );
                self.transition(HandshakeState::PlainText)
            }
        }
    }

    /// Read the single SSLRequest answer byte without buffering past it;
    /// anything after it belongs to the TLS handshake.
    async fn read_ssl_response(&mut self) -> Result<Option<u8>> {
        let io_timeout = self.io_timeout;
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;

        let mut byte = [0u8; 1];
        let n = timeout(io_timeout, transport.read(&mut byte))
            .await
            .map_err(|_| Error::Timeout {
                operation: "read",
                after: io_timeout,
            })??;

        Ok((n == 1).then_some(byte[0]))
    }

    /// Send a frontend message, writing every byte before returning
    pub async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode_message(msg)?;
        let io_timeout = self.io_timeout;
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;

        timeout(io_timeout, async {
            transport.write_all(&buf).await?;
            transport.flush().await
        })
        .await
        .map_err(|_| Error::Timeout {
            operation: "write",
            after: io_timeout,
        })??;

        Ok(())
    }

    /// Receive exactly one backend message as raw bytes (tag, length, body).
    ///
    /// Keeps reading until the length prefix is satisfied; a single read is
    /// never assumed to return a whole message. Bytes beyond the frame stay
    /// buffered for the next call.
    pub async fn receive_frame(&mut self) -> Result<Bytes> {
        loop {
            let parsed = frame_len(&self.read_buf).map_err(|e| Error::Protocol(e.to_string()))?;
            if let Some(total) = parsed {
                if total > self.max_message_size {
                    return Err(Error::MessageTooLarge {
                        size: total,
                        limit: self.max_message_size,
                    });
                }
                if self.read_buf.len() >= total {
                    return Ok(self.read_buf.split_to(total).freeze());
                }
            }

            // Need more data
            let io_timeout = self.io_timeout;
            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = timeout(io_timeout, transport.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| Error::Timeout {
                    operation: "read",
                    after: io_timeout,
                })??;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Receive and decode one backend message
    pub async fn receive_message(&mut self) -> Result<BackendMessage> {
        let frame = self.receive_frame().await?;
        let (msg, _) = decode_message(&frame).map_err(|e| Error::Protocol(e.to_string()))?;
        Ok(msg)
    }

    /// Close the connection
    ///
    /// Sends Terminate if the handshake completed, then shuts the stream down.
    pub async fn close(mut self) -> Result<()> {
        let authenticated = self.state == HandshakeState::Authenticated;
        self.state.transition(HandshakeState::Closed)?;
        if authenticated {
            let _ = self.send_message(&FrontendMessage::Terminate).await;
        }
        let io_timeout = self.io_timeout;
        if let Some(transport) = self.transport.as_mut() {
            timeout(io_timeout, transport.shutdown())
                .await
                .map_err(|_| Error::Timeout {
                    operation: "shutdown",
                    after: io_timeout,
                })??;
        }
        Ok(())
    }

    /// Shut the stream down after a failed handshake, ignoring errors.
    ///
    /// The stream is dropped on return even if the shutdown stalls.
    pub(crate) async fn abort(mut self) {
        let _ = self.state.transition(HandshakeState::Closed);
        if let Some(mut transport) = self.transport.take() {
            let _ = timeout(self.io_timeout, transport.shutdown()).await;
        }
    }

    /// Take the underlying stream and any bytes already read past the last
    /// handshake message.
    pub fn into_parts(mut self) -> Result<(Transport<S>, BytesMut)> {
        let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
        Ok((transport, self.read_buf))
    }
}
