//! Handshake state machine

use crate::{Error, Result};

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No socket yet. A [`Connection`](super::Connection) only exists once
    /// the stream is open, so its state starts at `TcpOpen`; this variant
    /// names the step before the dial.
    Disconnected,

    /// TCP connected, SSL decision pending
    TcpOpen,

    /// SSL decision made: continuing without encryption
    PlainText,

    /// SSL decision made: transport upgraded to TLS
    Encrypted,

    /// Startup message written
    StartupSent,

    /// First backend reply received, authenticator running
    AwaitingAuthResponse,

    /// Authenticated (terminal)
    Authenticated,

    /// Rejected by the authenticator (terminal)
    Rejected,

    /// Closed
    Closed,
}

impl HandshakeState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: HandshakeState) -> bool {
        use HandshakeState::*;

        matches!(
            (self, next),
            (Disconnected, TcpOpen)
                | (TcpOpen, PlainText)
                | (TcpOpen, Encrypted)
                | (PlainText, StartupSent)
                | (Encrypted, StartupSent)
                | (StartupSent, AwaitingAuthResponse)
                | (AwaitingAuthResponse, Authenticated)
                | (AwaitingAuthResponse, Rejected)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: HandshakeState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }

}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::TcpOpen => write!(f, "tcp_open"),
            Self::PlainText => write!(f, "plaintext"),
            Self::Encrypted => write!(f, "encrypted"),
            Self::StartupSent => write!(f, "startup_sent"),
            Self::AwaitingAuthResponse => write!(f, "awaiting_auth_response"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Rejected => write!(f, "rejected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
