//! Authentication collaborator
//!
//! The connector hands the server's first reply and the live connection to an
//! [`Authenticator`], which runs whatever exchange the server asked for and
//! returns a verdict. The connector itself never interprets authentication
//! requests.

mod standard;

pub use standard::StandardAuthenticator;

use crate::connection::Connection;
use crate::Result;
use bytes::Bytes;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};

/// Outcome of an authentication exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthVerdict {
    /// The server accepted the session
    Authenticated,
    /// The server (or the authenticator) refused it
    Rejected(String),
}

impl AuthVerdict {
    /// Whether the session was accepted
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthVerdict::Authenticated)
    }
}

impl From<bool> for AuthVerdict {
    fn from(authenticated: bool) -> Self {
        if authenticated {
            AuthVerdict::Authenticated
        } else {
            AuthVerdict::Rejected("rejected by authenticator".into())
        }
    }
}

/// Drives the authentication exchange after the startup message.
///
/// `initial` is the first complete backend message (tag, length and body)
/// received after startup. Implementations may keep exchanging messages over
/// `conn` via [`Connection::send_message`] and
/// [`Connection::receive_message`]. I/O failures are returned as errors; a
/// refusal is an `Ok(AuthVerdict::Rejected(..))`.
pub trait Authenticator: Send + Sync {
    /// Run the exchange and report the verdict
    fn authenticate<S>(
        &self,
        conn: &mut Connection<S>,
        initial: Bytes,
    ) -> impl Future<Output = Result<AuthVerdict>> + Send
    where
        S: AsyncRead + AsyncWrite + Unpin + Send;
}
