//! Connection management
//!
//! This module handles:
//! * Transport abstraction (plain stream vs TLS over the same stream)
//! * Handshake configuration
//! * State machine enforcement
//! * TLS configuration and negotiation

mod config;
mod conn;
mod state;
mod tls;
mod transport;

pub use config::{
    ConnectionConfig, ConnectionConfigBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORT,
};
pub use conn::{BackendKey, Connection};
pub use state::HandshakeState;
pub use tls::{parse_server_name, SslMode, TlsConfig, TlsConfigBuilder};
pub use transport::{dial, Transport};
