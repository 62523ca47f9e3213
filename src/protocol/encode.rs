//! Protocol message encoding

use super::constants::{frontend_tags, SSL_REQUEST_CODE, SSL_REQUEST_LEN};
use super::message::FrontendMessage;
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Growable buffer that assembles one length-prefixed message.
///
/// The 4-byte big-endian length is reserved up front and back-filled by
/// [`MessageBuffer::finish`]. It counts itself and the payload but not the
/// optional tag byte, matching the Postgres framing rules.
#[derive(Debug)]
pub struct MessageBuffer {
    buf: BytesMut,
    len_pos: usize,
}

impl MessageBuffer {
    /// Start an untagged message (SSLRequest, StartupMessage)
    pub fn untagged() -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_i32(0);
        Self { buf, len_pos: 0 }
    }

    /// Start a message with a one-byte type tag
    pub fn tagged(tag: u8) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(tag);
        buf.put_i32(0);
        Self { buf, len_pos: 1 }
    }

    /// Append a big-endian 32-bit integer
    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    /// Append a NUL-terminated string.
    ///
    /// The caller guarantees `s` has no interior NUL byte.
    pub fn put_cstr(&mut self, s: &str) -> &mut Self {
        debug_assert!(!s.contains('\0'), "cstring with interior NUL");
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        self
    }

    /// Append raw bytes
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Append a single byte
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Fill in the length field and return the finished message
    pub fn finish(mut self) -> BytesMut {
        let len = (self.buf.len() - self.len_pos) as i32;
        self.buf[self.len_pos..self.len_pos + 4].copy_from_slice(&len.to_be_bytes());
        self.buf
    }
}

/// Build a message by letting `write` append the payload; the length prefix
/// (and the tag, if any) are handled here.
pub fn build_message<F>(tag: Option<u8>, write: F) -> BytesMut
where
    F: FnOnce(&mut MessageBuffer),
{
    let mut msg = match tag {
        Some(tag) => MessageBuffer::tagged(tag),
        None => MessageBuffer::untagged(),
    };
    write(&mut msg);
    msg.finish()
}

/// Encode a frontend message into bytes
///
/// Fails with [`Error::InvalidParameter`] if a startup parameter or password
/// contains a NUL byte.
pub fn encode_message(msg: &FrontendMessage) -> Result<BytesMut> {
    match msg {
        FrontendMessage::SslRequest => Ok(encode_ssl_request()),
        FrontendMessage::Startup { version, params } => encode_startup(*version, params),
        FrontendMessage::Password(password) => encode_password(password),
        FrontendMessage::Terminate => Ok(build_message(Some(frontend_tags::TERMINATE), |_| {})),
    }
}

fn encode_ssl_request() -> BytesMut {
    let buf = build_message(None, |m| {
        m.put_i32(SSL_REQUEST_CODE);
    });
    debug_assert_eq!(buf.len(), SSL_REQUEST_LEN as usize);
    buf
}

fn encode_startup(version: i32, params: &[(String, String)]) -> Result<BytesMut> {
    for (key, value) in params {
        if key.is_empty() || key.contains('\0') {
            return Err(Error::InvalidParameter {
                name: key.clone(),
                reason: "parameter name must be non-empty and NUL-free",
            });
        }
        if value.contains('\0') {
            return Err(Error::InvalidParameter {
                name: key.clone(),
                reason: "contains a NUL byte",
            });
        }
    }

    // Startup messages don't have a type byte
    Ok(build_message(None, |m| {
        m.put_i32(version);
        for (key, value) in params {
            m.put_cstr(key).put_cstr(value);
        }
        m.put_u8(0);
    }))
}

fn encode_password(password: &str) -> Result<BytesMut> {
    if password.contains('\0') {
        return Err(Error::InvalidParameter {
            name: "password".into(),
            reason: "contains a NUL byte",
        });
    }
    Ok(build_message(Some(frontend_tags::PASSWORD), |m| {
        m.put_cstr(password);
    }))
}
