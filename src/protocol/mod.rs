//! Postgres wire protocol, limited to what connection startup needs
//!
//! This module handles:
//! * Length-prefixed message assembly (`MessageBuffer`)
//! * Frontend encoding: SSLRequest, StartupMessage, PasswordMessage, Terminate
//! * Backend decoding of the messages a server sends before ReadyForQuery

pub mod constants;
mod decode;
mod encode;
mod message;

pub use decode::{decode_message, frame_len, HEADER_LEN};
pub use encode::{build_message, encode_message, MessageBuffer};
pub use message::{AuthenticationMessage, BackendMessage, ErrorFields, FrontendMessage, StartupParams};
