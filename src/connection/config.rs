//! Connection configuration

use super::tls::SslMode;
use crate::protocol::StartupParams;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default Postgres port
pub const DEFAULT_PORT: u16 = 5432;

/// Default TCP connection timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for each read or write during the handshake
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on a single backend message during the handshake
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8192;

/// Connection configuration
///
/// Everything the handshake needs, passed in explicitly; nothing is read from
/// process-wide state. Use `ConnectionConfig::builder()` for timeouts,
/// TLS mode and extra startup options.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or IP address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Username
    pub user: String,
    /// Password (optional)
    pub password: Option<String>,
    /// Additional startup parameters
    pub params: BTreeMap<String, String>,
    /// Application name for Postgres logs
    pub application_name: Option<String>,
    /// SSL/TLS mode
    pub sslmode: SslMode,
    /// TCP connection timeout
    pub connect_timeout: Duration,
    /// Deadline applied to every read and write of the handshake
    pub io_timeout: Duration,
    /// Largest backend message accepted while connecting
    pub max_message_size: usize,
}

impl ConnectionConfig {
    /// Create new configuration with defaults
    ///
    /// # Defaults
    ///
    /// - `host`: "localhost", `port`: 5432
    /// - `sslmode`: disable
    /// - `connect_timeout`: 10s, `io_timeout`: 30s
    /// - `max_message_size`: 8192 bytes
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        Self::builder(database, user).build()
    }

    /// Create a builder for advanced configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use pg_startup::connection::ConnectionConfig;
    /// use std::time::Duration;
    ///
    /// let config = ConnectionConfig::builder("app", "alice")
    ///     .host("db.internal")
    ///     .encryption(true)
    ///     .io_timeout(Duration::from_secs(5))
    ///     .build();
    /// assert!(config.encryption_enabled());
    /// ```
    pub fn builder(
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: database.into(),
            user: user.into(),
            password: None,
            params: BTreeMap::new(),
            application_name: None,
            sslmode: SslMode::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add connection parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Whether an SSLRequest is sent before startup
    pub fn encryption_enabled(&self) -> bool {
        self.sslmode.attempts_tls()
    }

    /// Parameters for the startup message
    pub fn startup_params(&self) -> StartupParams {
        StartupParams {
            user: self.user.clone(),
            database: self.database.clone(),
            application_name: self.application_name.clone(),
            options: self.params.clone(),
        }
    }
}

/// Builder for creating `ConnectionConfig` with advanced options
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    host: String,
    port: u16,
    database: String,
    user: String,
    password: Option<String>,
    params: BTreeMap<String, String>,
    application_name: Option<String>,
    sslmode: SslMode,
    connect_timeout: Duration,
    io_timeout: Duration,
    max_message_size: usize,
}

impl ConnectionConfigBuilder {
    /// Set the server host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a startup parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set application name for Postgres logs
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Set SSL/TLS mode
    pub fn sslmode(mut self, mode: SslMode) -> Self {
        self.sslmode = mode;
        self
    }

    /// Turn transport encryption on (`prefer`) or off (`disable`)
    pub fn encryption(self, enabled: bool) -> Self {
        self.sslmode(if enabled {
            SslMode::Prefer
        } else {
            SslMode::Disable
        })
    }

    /// Set TCP connection timeout
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = duration;
        self
    }

    /// Set the per-operation read/write deadline
    ///
    /// Default: 30 seconds
    pub fn io_timeout(mut self, duration: Duration) -> Self {
        self.io_timeout = duration;
        self
    }

    /// Set the largest backend message accepted during the handshake
    ///
    /// Default: 8192 bytes
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host,
            port: self.port,
            database: self.database,
            user: self.user,
            password: self.password,
            params: self.params,
            application_name: self.application_name,
            sslmode: self.sslmode,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
            max_message_size: self.max_message_size,
        }
    }
}
