//! Connection string parsing
//!
//! Supports the format:
//! * postgres://[user[:password]@][host][:port][/database][?params]
//!
//! Recognized query parameters: `sslmode`, `sslrootcert`, `sslcert`,
//! `sslkey`, `application_name`, `connect_timeout` (seconds) and `options`.

use crate::connection::{ConnectionConfig, SslMode, TlsConfig, DEFAULT_PORT};
use crate::{Error, Result};
use std::time::Duration;

/// Parsed connection info
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Host
    pub host: String,
    /// Port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Username
    pub user: String,
    /// Password
    pub password: Option<String>,
    /// SSL/TLS mode
    pub sslmode: SslMode,
    /// Path to custom CA certificate (from sslrootcert param)
    pub sslrootcert: Option<String>,
    /// Path to client certificate (from sslcert param, for mTLS)
    pub sslcert: Option<String>,
    /// Path to client private key (from sslkey param, for mTLS)
    pub sslkey: Option<String>,
    /// Application name reported to the server
    pub application_name: Option<String>,
    /// TCP connection timeout
    pub connect_timeout: Option<Duration>,
    /// Command-line options passed to the backend
    pub options: Option<String>,
}

/// Extract a query parameter value from a query string
fn parse_query_param(query_string: &str, param: &str) -> Option<String> {
    if query_string.is_empty() {
        return None;
    }

    // Remove leading '?' if present
    let query = query_string.trim_start_matches('?');

    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == param {
                return Some(value.to_string());
            }
        }
    }
    None
}

impl ConnectionInfo {
    /// Parse connection string
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("postgres://")
            .or_else(|| s.strip_prefix("postgresql://"))
            .ok_or_else(|| {
                Error::Config("connection string must start with postgres://".into())
            })?;

        // Format: [user[:password]@]host[:port][/database][?params]
        let (auth, rest) = match rest.rfind('@') {
            Some(pos) => (Some(&rest[..pos]), &rest[pos + 1..]),
            None => (None, rest),
        };

        let (user, password) = match auth {
            Some(auth) => match auth.split_once(':') {
                Some((user, pass)) => (user.to_string(), Some(pass.to_string())),
                None => (auth.to_string(), None),
            },
            None => (whoami::username(), None),
        };

        // Split off query string before parsing host/port/database
        let (rest, query_string) = match rest.find('?') {
            Some(pos) => rest.split_at(pos),
            None => (rest, ""),
        };

        let (host_port, database) = match rest.split_once('/') {
            Some((hp, db)) if !db.is_empty() => (hp, db.to_string()),
            Some((hp, _)) => (hp, user.clone()),
            None => (rest, user.clone()),
        };

        let (host, port) = split_host_port(host_port)?;

        let sslmode = match parse_query_param(query_string, "sslmode") {
            Some(mode) => mode.parse()?,
            None => SslMode::default(),
        };

        let connect_timeout = parse_query_param(query_string, "connect_timeout")
            .map(|secs| {
                secs.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| Error::Config(format!("invalid connect_timeout: {}", secs)))
            })
            .transpose()?;

        Ok(Self {
            host,
            port,
            database,
            user,
            password,
            sslmode,
            sslrootcert: parse_query_param(query_string, "sslrootcert"),
            sslcert: parse_query_param(query_string, "sslcert"),
            sslkey: parse_query_param(query_string, "sslkey"),
            application_name: parse_query_param(query_string, "application_name"),
            connect_timeout,
            options: parse_query_param(query_string, "options"),
        })
    }

    /// Build a `TlsConfig` from parsed connection parameters.
    ///
    /// Returns `None` if `sslmode` is `Disable`.
    /// Returns `Some(TlsConfig)` for all other modes.
    pub fn to_tls_config(&self) -> Result<Option<TlsConfig>> {
        if self.sslmode == SslMode::Disable {
            return Ok(None);
        }

        let mut builder = TlsConfig::builder();

        if let Some(ref ca_path) = self.sslrootcert {
            builder = builder.ca_cert_path(ca_path);
        }

        // prefer/require encrypt without verifying the certificate
        if !self.sslmode.requires_verification() {
            builder = builder.danger_accept_invalid_certs(true);
        }

        // Client certificate for mTLS
        if let Some(ref cert_path) = self.sslcert {
            builder = builder.client_cert_path(cert_path);
        }
        if let Some(ref key_path) = self.sslkey {
            builder = builder.client_key_path(key_path);
        }

        Ok(Some(builder.build()?))
    }

    /// Convert to ConnectionConfig
    pub fn to_config(&self) -> ConnectionConfig {
        let mut builder = ConnectionConfig::builder(&self.database, &self.user)
            .host(&self.host)
            .port(self.port)
            .sslmode(self.sslmode);
        if let Some(ref password) = self.password {
            builder = builder.password(password);
        }
        if let Some(ref name) = self.application_name {
            builder = builder.application_name(name);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(ref options) = self.options {
            builder = builder.param("options", options);
        }
        builder.build()
    }
}

fn split_host_port(host_port: &str) -> Result<(String, u16)> {
    // Bracketed IPv6 literal: [::1]:5432
    if let Some(rest) = host_port.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::Config("unterminated IPv6 address".into()))?;
        let port = match after.strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None if after.is_empty() => DEFAULT_PORT,
            None => return Err(Error::Config("invalid host".into())),
        };
        return Ok((host.to_string(), port));
    }

    let (host, port) = match host_port.split_once(':') {
        Some((host, port)) => (host, parse_port(port)?),
        None => (host_port, DEFAULT_PORT),
    };
    let host = if host.is_empty() { "localhost" } else { host };
    Ok((host.to_string(), port))
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| Error::Config(format!("invalid port: {}", port)))
}
