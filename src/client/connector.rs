//! Handshake orchestration

use super::connection_string::ConnectionInfo;
use crate::auth::{AuthVerdict, Authenticator, StandardAuthenticator};
use crate::connection::{dial, Connection, ConnectionConfig, HandshakeState, TlsConfig};
use crate::metrics::{counters, histograms, labels};
use crate::protocol::constants::PROTOCOL_VERSION;
use crate::protocol::FrontendMessage;
use crate::{Error, Result};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::Instrument;

/// Establishes authenticated connections
///
/// A `Connector` is immutable once built and can drive any number of
/// concurrent handshakes; each handshake owns its own [`Connection`].
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> pg_startup::Result<()> {
/// use pg_startup::connection::ConnectionConfig;
/// use pg_startup::Connector;
///
/// let config = ConnectionConfig::builder("app", "alice")
///     .host("db.internal")
///     .password("secret")
///     .encryption(true)
///     .build();
///
/// let conn = Connector::new(config).connect().await?;
/// println!("connected, encrypted: {}", conn.is_encrypted());
/// conn.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Connector<A = StandardAuthenticator> {
    config: ConnectionConfig,
    tls: Option<TlsConfig>,
    authenticator: A,
}

impl Connector {
    /// Connector using [`StandardAuthenticator`] with the configured password
    pub fn new(config: ConnectionConfig) -> Self {
        let authenticator = match config.password {
            Some(ref password) => StandardAuthenticator::with_password(password),
            None => StandardAuthenticator::new(),
        };
        Self {
            config,
            tls: None,
            authenticator,
        }
    }

    /// Build a connector from a `postgres://` URL
    ///
    /// TLS settings (`sslmode`, `sslrootcert`, `sslcert`, `sslkey`) are
    /// turned into a [`TlsConfig`] up front, so certificate problems surface
    /// here rather than mid-handshake.
    pub fn from_connection_string(url: &str) -> Result<Self> {
        let info = ConnectionInfo::parse(url)?;
        let connector = Self::new(info.to_config());
        Ok(match info.to_tls_config()? {
            Some(tls) => connector.with_tls(tls),
            None => connector,
        })
    }
}

impl<A> Connector<A>
where
    A: Authenticator,
{
    /// Use this TLS configuration when the server accepts SSL
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Replace the authentication collaborator
    pub fn with_authenticator<B: Authenticator>(self, authenticator: B) -> Connector<B> {
        Connector {
            config: self.config,
            tls: self.tls,
            authenticator,
        }
    }

    /// Connection configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Dial the configured host and run the handshake
    ///
    /// Parameters are validated before the socket is opened.
    pub async fn connect(&self) -> Result<Connection<TcpStream>> {
        self.config.startup_params().validate()?;

        async {
            let started = Instant::now();
            counters::handshake_started();

            let result = match dial(
                &self.config.host,
                self.config.port,
                self.config.connect_timeout,
            )
            .await
            {
                Ok(stream) => self.establish(stream).await,
                Err(e) => {
                    tracing::error!(error = %e, "connect failed");
                    Err(e)
                }
            };

            record_outcome(&result, started);
            result
        }
        .instrument(self.span())
        .await
    }

    /// Run the handshake over an already connected stream
    ///
    /// Useful when the caller dials itself (proxies, tunnels) and in tests.
    pub async fn handshake<S>(&self, stream: S) -> Result<Connection<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.config.startup_params().validate()?;

        async {
            let started = Instant::now();
            counters::handshake_started();

            let result = self.establish(stream).await;

            record_outcome(&result, started);
            result
        }
        .instrument(self.span())
        .await
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "handshake",
            conn_id = tracing::field::Empty,
            host = %self.config.host,
            port = self.config.port,
            user = %self.config.user,
            database = %self.config.database,
        )
    }

    /// Wrap the stream and drive it to a verdict; the connection is shut
    /// down on every failure path.
    async fn establish<S>(&self, stream: S) -> Result<Connection<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut conn = Connection::new(stream, &self.config);
        tracing::Span::current().record("conn_id", conn.id());

        match self.drive(&mut conn).await {
            Ok(AuthVerdict::Authenticated) => {
                conn.transition(HandshakeState::Authenticated)?;
                tracing::info!(encrypted = conn.is_encrypted(), "connection ready");
                Ok(conn)
            }
            Ok(AuthVerdict::Rejected(reason)) => {
                conn.transition(HandshakeState::Rejected)?;
                tracing::warn!(reason = %reason, "authentication failed");
                conn.abort().await;
                Err(Error::Authentication(reason))
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    category = e.category(),
                    state = %conn.state(),
                    "handshake failed"
                );
                conn.abort().await;
                Err(e)
            }
        }
    }

    async fn drive<S>(&self, conn: &mut Connection<S>) -> Result<AuthVerdict>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        conn.negotiate_encryption(self.config.sslmode, self.tls.as_ref(), &self.config.host)
            .await?;

        let startup = FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: self.config.startup_params().to_pairs(),
        };
        conn.send_message(&startup).await?;
        conn.transition(HandshakeState::StartupSent)?;
        tracing::debug!("startup message sent");

        let first = conn.receive_frame().await?;
        conn.transition(HandshakeState::AwaitingAuthResponse)?;

        self.authenticator.authenticate(conn, first).await
    }
}

fn record_outcome<S>(result: &Result<Connection<S>>, started: Instant) {
    let millis = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => {
            counters::handshake_completed(labels::OUTCOME_READY, "");
            histograms::handshake_duration(labels::OUTCOME_READY, millis);
        }
        Err(e) => {
            counters::handshake_completed(labels::OUTCOME_FAILED, e.category());
            histograms::handshake_duration(labels::OUTCOME_FAILED, millis);
        }
    }
}
