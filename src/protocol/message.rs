//! Protocol message types

use super::constants::params;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Frontend message (client → server)
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    /// SSLRequest message (TLS negotiation)
    SslRequest,

    /// Startup message
    Startup {
        /// Protocol version
        version: i32,
        /// Connection parameters, in wire order
        params: Vec<(String, String)>,
    },

    /// Password message
    Password(String),

    /// Terminate message
    Terminate,
}

/// Backend message (server → client) that can appear before the first
/// ReadyForQuery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// Authentication request
    Authentication(AuthenticationMessage),

    /// Backend key data (for cancellation)
    BackendKeyData {
        /// Process ID
        process_id: i32,
        /// Secret key
        secret_key: i32,
    },

    /// Error response
    ErrorResponse(ErrorFields),

    /// Notice response
    NoticeResponse(ErrorFields),

    /// Parameter status
    ParameterStatus {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },

    /// Ready for query
    ReadyForQuery {
        /// Transaction status
        status: u8,
    },
}

/// Authentication request from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMessage {
    /// Authentication OK
    Ok,

    /// Cleartext password required
    CleartextPassword,

    /// Any other method; the payload after the code is kept opaque
    Other {
        /// Authentication request code
        code: i32,
        /// Remaining bytes of the request
        data: Vec<u8>,
    },
}

/// Error/notice fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity (ERROR, FATAL, etc.)
    pub severity: Option<String>,
    /// SQLSTATE code
    pub code: Option<String>,
    /// Human-readable message
    pub message: Option<String>,
    /// Additional detail
    pub detail: Option<String>,
    /// Hint
    pub hint: Option<String>,
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref msg) = self.message {
            write!(f, "{}", msg)?;
        }
        if let Some(ref code) = self.code {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
}

/// Parameters carried by the startup message
///
/// Serialized as `user`, `database`, `application_name` (when set), then the
/// extra options in key order, so the same parameters always produce the
/// same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupParams {
    /// Role to connect as
    pub user: String,
    /// Target database; omitted from the message when empty
    pub database: String,
    /// Optional application name
    pub application_name: Option<String>,
    /// Additional run-time parameters (e.g. `search_path`, `options`)
    pub options: BTreeMap<String, String>,
}

impl StartupParams {
    /// Create parameters for a user and database
    pub fn new(user: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            database: database.into(),
            application_name: None,
            options: BTreeMap::new(),
        }
    }

    /// Add a run-time option
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Reject anything that cannot be represented in a startup message
    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() {
            return Err(invalid(params::USER, "must not be empty"));
        }
        check_nul(params::USER, &self.user)?;
        check_nul(params::DATABASE, &self.database)?;
        if let Some(ref app) = self.application_name {
            check_nul(params::APPLICATION_NAME, app)?;
        }

        for (key, value) in &self.options {
            // An empty key would read as the list terminator
            if key.is_empty() {
                return Err(invalid(key, "option name must not be empty"));
            }
            if key.contains('\0') {
                return Err(invalid(key, "option name contains a NUL byte"));
            }
            if matches!(
                key.as_str(),
                params::USER | params::DATABASE | params::APPLICATION_NAME
            ) {
                return Err(invalid(key, "reserved name; set it on the config instead"));
            }
            check_nul(key, value)?;
        }

        Ok(())
    }

    /// Key/value pairs in wire order
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(3 + self.options.len());
        pairs.push((params::USER.to_string(), self.user.clone()));
        if !self.database.is_empty() {
            pairs.push((params::DATABASE.to_string(), self.database.clone()));
        }
        if let Some(ref app) = self.application_name {
            pairs.push((params::APPLICATION_NAME.to_string(), app.clone()));
        }
        for (k, v) in &self.options {
            pairs.push((k.clone(), v.clone()));
        }
        pairs
    }
}

fn check_nul(name: &str, value: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(invalid(name, "contains a NUL byte"));
    }
    Ok(())
}

fn invalid(name: &str, reason: &'static str) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        reason,
    }
}
