//! Protocol message decoding

use super::constants::{auth, tags};
use super::message::{AuthenticationMessage, BackendMessage, ErrorFields};
use std::io;

/// Size of the tag byte plus the length field
pub const HEADER_LEN: usize = 5;

/// Maximum message length (1 GB), matching PostgreSQL's own `PQ_LARGE_MESSAGE_LIMIT`.
///
/// Any message whose length field exceeds this value is rejected before allocation
/// to prevent denial-of-service via crafted length headers.
const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// Total size (tag + length field + body) of the frame at the start of `data`.
///
/// Returns `Ok(None)` while fewer than [`HEADER_LEN`] bytes are available.
/// The frame itself may still be incomplete; compare the result with
/// `data.len()`.
pub fn frame_len(data: &[u8]) -> io::Result<Option<usize>> {
    if data.len() < HEADER_LEN {
        return Ok(None);
    }

    let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    if len < 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid message length {} for tag 0x{:02X}", len, data[0]),
        ));
    }

    let len = len as usize;
    if len > MAX_MESSAGE_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "message length {} exceeds maximum allowed {}",
                len, MAX_MESSAGE_LENGTH
            ),
        ));
    }

    Ok(Some(len + 1))
}

/// Decode one backend message from the start of `data`
///
/// # Returns
/// `Ok((msg, consumed))` - Message and number of bytes consumed
/// `Err(e)` - `UnexpectedEof` if the frame is incomplete, `InvalidData` /
/// `Unsupported` if it is malformed or of a type not expected during startup
pub fn decode_message(data: &[u8]) -> io::Result<(BackendMessage, usize)> {
    let total = match frame_len(data)? {
        Some(total) => total,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "incomplete message header",
            ))
        }
    };

    if data.len() < total {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete message body",
        ));
    }

    let tag = data[0];
    let body = &data[HEADER_LEN..total];

    let msg = match tag {
        tags::AUTHENTICATION => decode_authentication(body)?,
        tags::BACKEND_KEY_DATA => decode_backend_key_data(body)?,
        tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(decode_error_fields(body)?),
        tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(decode_error_fields(body)?),
        tags::PARAMETER_STATUS => decode_parameter_status(body)?,
        tags::READY_FOR_QUERY => decode_ready_for_query(body)?,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unexpected message tag during startup: 0x{:02X}", tag),
            ))
        }
    };

    Ok((msg, total))
}

fn decode_authentication(data: &[u8]) -> io::Result<BackendMessage> {
    if data.len() < 4 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "auth type"));
    }
    let code = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);

    let auth_msg = match code {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        _ => AuthenticationMessage::Other {
            code,
            data: data[4..].to_vec(),
        },
    };

    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_backend_key_data(data: &[u8]) -> io::Result<BackendMessage> {
    if data.len() < 8 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "backend key data",
        ));
    }
    let process_id = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let secret_key = i32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    Ok(BackendMessage::BackendKeyData {
        process_id,
        secret_key,
    })
}

fn decode_error_fields(data: &[u8]) -> io::Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut offset = 0;

    loop {
        if offset >= data.len() {
            break;
        }
        let field_type = data[offset];
        offset += 1;
        if field_type == 0 {
            break;
        }

        let value = read_cstr(data, &mut offset, "error field")?;
        match field_type {
            b'S' => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = Some(value),
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            _ => {} // Ignore unknown fields
        }
    }

    Ok(fields)
}

fn decode_parameter_status(data: &[u8]) -> io::Result<BackendMessage> {
    let mut offset = 0;
    let name = read_cstr(data, &mut offset, "parameter name")?;
    let value = read_cstr(data, &mut offset, "parameter value")?;
    Ok(BackendMessage::ParameterStatus { name, value })
}

fn decode_ready_for_query(data: &[u8]) -> io::Result<BackendMessage> {
    if data.is_empty() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "status byte"));
    }
    Ok(BackendMessage::ReadyForQuery { status: data[0] })
}

fn read_cstr(data: &[u8], offset: &mut usize, what: &str) -> io::Result<String> {
    let rest = data.get(*offset..).unwrap_or_default();
    let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("missing null terminator in {}", what),
        )
    })?;
    let value = String::from_utf8_lossy(&rest[..end]).to_string();
    *offset += end + 1;
    Ok(value)
}
