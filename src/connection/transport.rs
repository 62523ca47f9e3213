//! Transport abstraction (plain or TLS-encrypted stream) and TCP dialing

use super::TlsConfig;
use crate::{Error, Result};
use rustls_pki_types::ServerName;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// Byte stream to the backend: plain or TLS-encrypted.
///
/// Generic over the underlying stream so the handshake can run over a
/// `TcpStream` in production and over in-memory streams in tests. Both
/// variants expose the same `AsyncRead`/`AsyncWrite` contract.
pub enum Transport<S> {
    /// Unencrypted stream
    Plain(S),
    /// TLS-encrypted stream
    Tls(Box<TlsStream<S>>),
}

impl<S> std::fmt::Debug for Transport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain"),
            Transport::Tls(_) => f.write_str("Transport::Tls"),
        }
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Whether the stream is TLS-encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Upgrade a plain transport to TLS after SSLRequest negotiation.
    ///
    /// Consumes `self` and returns a new `Transport` with a TLS-encrypted stream.
    /// Handshake failures are reported as [`Error::EncryptionUpgradeFailed`].
    pub async fn upgrade_to_tls(self, tls_config: &TlsConfig, hostname: &str) -> Result<Self> {
        match self {
            Transport::Plain(stream) => {
                let server_name = match super::parse_server_name(hostname) {
                    Ok(name) => name,
                    // Unverified session: the name is only used for SNI
                    Err(_) if tls_config.danger_accept_invalid_certs() => {
                        ServerName::IpAddress(IpAddr::from(Ipv4Addr::LOCALHOST).into())
                    }
                    Err(e) => return Err(Error::EncryptionUpgradeFailed(e.to_string())),
                };
                let tls_stream = tls_config
                    .connector()
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| Error::EncryptionUpgradeFailed(e.to_string()))?;

                Ok(Transport::Tls(Box::new(tls_stream)))
            }
            Transport::Tls(_) => Err(Error::Config(
                "transport is already TLS-encrypted".into(),
            )),
        }
    }
}

impl<S> AsyncRead for Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<S> AsyncWrite for Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Open a TCP connection, bounded by `connect_timeout`
pub async fn dial(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::Timeout {
            operation: "connect",
            after: connect_timeout,
        })??;

    // Startup messages are small request/response pairs
    stream.set_nodelay(true)?;
    tracing::debug!(host, port, "tcp connection established");
    Ok(stream)
}
