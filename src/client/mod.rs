//! Client entry points
//!
//! [`Connector`] drives the handshake; [`ConnectionInfo`] parses
//! `postgres://` URLs into configuration.

mod connection_string;
mod connector;

pub use connection_string::ConnectionInfo;
pub use connector::Connector;
