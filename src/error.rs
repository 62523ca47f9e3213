//! Error types

use crate::connection::SslMode;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Connection establishment error
#[derive(Debug, Error)]
pub enum Error {
    /// Socket-level failure (dial, read, write)
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// A network operation exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out (e.g. "connect", "read")
        operation: &'static str,
        /// Deadline that was exceeded
        after: Duration,
    },

    /// Server closed the socket mid-handshake
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Backend frame larger than the configured cap
    #[error("backend message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Declared frame size (tag + length field + body)
        size: usize,
        /// Configured cap
        limit: usize,
    },

    /// Server answered the SSLRequest with something other than `S`
    /// while the configured mode requires TLS
    #[error("server does not support TLS (sslmode={0})")]
    SslRefused(SslMode),

    /// TLS handshake after a successful SSLRequest failed
    #[error("TLS upgrade failed: {0}")]
    EncryptionUpgradeFailed(String),

    /// Malformed startup parameter, rejected before any network I/O
    #[error("invalid startup parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Server rejected the credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Unexpected or malformed backend message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Handshake state machine violation
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state description
        expected: String,
        /// Actual state description
        actual: String,
    },
}

impl Error {
    /// Whether the error came from the network transport (dial, read, write,
    /// deadline, framing cap).
    ///
    /// Higher-level callers use this to decide on retries; this crate never
    /// retries on its own.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Timeout { .. }
                | Error::ConnectionClosed
                | Error::MessageTooLarge { .. }
        )
    }

    /// Stable label for logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::ConnectionClosed | Error::MessageTooLarge { .. } => "transport",
            Error::Timeout { .. } => "timeout",
            Error::SslRefused(_) => "ssl_refused",
            Error::EncryptionUpgradeFailed(_) => "tls_upgrade",
            Error::InvalidParameter { .. } => "invalid_parameter",
            Error::Authentication(_) => "authentication",
            Error::Protocol(_) => "protocol",
            Error::Config(_) => "config",
            Error::InvalidState { .. } => "state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(Error::from(io::Error::from(io::ErrorKind::ConnectionReset)).is_transport());
        assert!(Error::ConnectionClosed.is_transport());
        assert!(Error::Timeout {
            operation: "read",
            after: Duration::from_secs(1),
        }
        .is_transport());
        assert!(Error::MessageTooLarge {
            size: 10_000,
            limit: 8192,
        }
        .is_transport());

        assert!(!Error::Authentication("bad password".into()).is_transport());
        assert!(!Error::EncryptionUpgradeFailed("bad cert".into()).is_transport());
        assert!(!Error::SslRefused(SslMode::Require).is_transport());
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(Error::ConnectionClosed.category(), "transport");
        assert_eq!(Error::Authentication("x".into()).category(), "authentication");
        assert_eq!(
            Error::InvalidParameter {
                name: "user".into(),
                reason: "must not be empty",
            }
            .category(),
            "invalid_parameter"
        );
    }

    #[test]
    fn test_display() {
        let err = Error::InvalidParameter {
            name: "search_path".into(),
            reason: "contains a NUL byte",
        };
        assert_eq!(
            err.to_string(),
            "invalid startup parameter 'search_path': contains a NUL byte"
        );
        assert_eq!(
            Error::SslRefused(SslMode::Require).to_string(),
            "server does not support TLS (sslmode=require)"
        );
    }
}
