//! Postgres protocol constants

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

/// SSLRequest code (80877103 = 1234 << 16 | 5679)
pub const SSL_REQUEST_CODE: i32 = 0x04D2_162F;

/// Length of the SSLRequest message (length field + code)
pub const SSL_REQUEST_LEN: i32 = 8;

/// Single-byte answers to an SSLRequest
pub mod ssl_response {
    /// Server is willing to perform a TLS handshake
    pub const ACCEPT: u8 = b'S';

    /// Server does not support TLS
    pub const REJECT: u8 = b'N';
}

/// Backend message type tags
pub mod tags {
    /// Authentication request
    pub const AUTHENTICATION: u8 = b'R';

    /// Backend key data
    pub const BACKEND_KEY_DATA: u8 = b'K';

    /// Error response
    pub const ERROR_RESPONSE: u8 = b'E';

    /// Notice response
    pub const NOTICE_RESPONSE: u8 = b'N';

    /// Parameter status
    pub const PARAMETER_STATUS: u8 = b'S';

    /// Ready for query
    pub const READY_FOR_QUERY: u8 = b'Z';
}

/// Frontend message type tags
pub mod frontend_tags {
    /// Password message
    pub const PASSWORD: u8 = b'p';

    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

/// Authentication request codes
pub mod auth {
    /// Authentication successful
    pub const OK: i32 = 0;

    /// Kerberos V5 (no longer supported by servers)
    pub const KERBEROS_V5: i32 = 2;

    /// Cleartext password required
    pub const CLEARTEXT_PASSWORD: i32 = 3;

    /// MD5 password required
    pub const MD5_PASSWORD: i32 = 5;

    /// GSSAPI
    pub const GSS: i32 = 7;

    /// SSPI
    pub const SSPI: i32 = 9;

    /// SASL mechanisms available (Postgres 10+)
    pub const SASL: i32 = 10;

    /// Human-readable name of an authentication request code
    pub fn method_name(code: i32) -> &'static str {
        match code {
            OK => "trust",
            KERBEROS_V5 => "kerberos-v5",
            CLEARTEXT_PASSWORD => "cleartext",
            MD5_PASSWORD => "md5",
            GSS => "gss",
            SSPI => "sspi",
            SASL => "sasl",
            _ => "unknown",
        }
    }
}

/// Startup parameter names the connection sets itself
pub mod params {
    /// Role to connect as
    pub const USER: &str = "user";

    /// Target database
    pub const DATABASE: &str = "database";

    /// Application name reported in `pg_stat_activity`
    pub const APPLICATION_NAME: &str = "application_name";
}
