//! Default authenticator: trust and cleartext password

use super::{AuthVerdict, Authenticator};
use crate::connection::{BackendKey, Connection};
use crate::metrics::{counters, labels};
use crate::protocol::constants::auth;
use crate::protocol::{decode_message, AuthenticationMessage, BackendMessage, FrontendMessage};
use crate::{Error, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

/// Handles `AuthenticationOk` (trust) and `AuthenticationCleartextPassword`.
///
/// Challenge-based methods (MD5, SASL, GSS) are reported as a rejection
/// naming the method. After `AuthenticationOk` the server's ParameterStatus
/// and BackendKeyData messages are recorded on the connection until
/// ReadyForQuery arrives.
#[derive(Clone, Default)]
pub struct StandardAuthenticator {
    password: Option<String>,
}

impl StandardAuthenticator {
    /// Authenticator without a password (trust only)
    pub fn new() -> Self {
        Self::default()
    }

    /// Authenticator answering cleartext password requests
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
        }
    }
}

impl std::fmt::Debug for StandardAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardAuthenticator")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Authenticator for StandardAuthenticator {
    async fn authenticate<S>(&self, conn: &mut Connection<S>, initial: Bytes) -> Result<AuthVerdict>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (mut msg, _) =
            decode_message(&initial).map_err(|e| Error::Protocol(e.to_string()))?;
        let mut mechanism = labels::MECHANISM_TRUST;
        let mut authenticated = false;

        loop {
            match msg {
                BackendMessage::Authentication(AuthenticationMessage::Ok) => {
                    tracing::debug!(mechanism, "authentication successful");
                    authenticated = true;
                    // Keep reading until ReadyForQuery
                }
                BackendMessage::Authentication(AuthenticationMessage::CleartextPassword) => {
                    if authenticated {
                        return Err(Error::Protocol(
                            "password request after AuthenticationOk".into(),
                        ));
                    }
                    mechanism = labels::MECHANISM_CLEARTEXT;
                    let Some(password) = self.password.as_ref() else {
                        counters::auth_rejected(mechanism);
                        return Ok(AuthVerdict::Rejected(
                            "server requested a password but none is configured".into(),
                        ));
                    };
                    conn.send_message(&FrontendMessage::Password(password.clone()))
                        .await?;
                }
                BackendMessage::Authentication(AuthenticationMessage::Other { code, .. }) => {
                    let method = auth::method_name(code);
                    tracing::warn!(method, code, "unsupported authentication method");
                    counters::auth_rejected(method);
                    return Ok(AuthVerdict::Rejected(format!(
                        "unsupported authentication method: {} (code {})",
                        method, code
                    )));
                }
                BackendMessage::ErrorResponse(err) => {
                    counters::auth_rejected(mechanism);
                    return Ok(AuthVerdict::Rejected(err.to_string()));
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::info!(notice = %notice, "server notice during startup");
                }
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::debug!("parameter status: {} = {}", name, value);
                    conn.record_parameter(name, value);
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    conn.record_backend_key(BackendKey {
                        process_id,
                        secret_key,
                    });
                }
                BackendMessage::ReadyForQuery { .. } => {
                    if !authenticated {
                        return Err(Error::Protocol(
                            "ReadyForQuery before AuthenticationOk".into(),
                        ));
                    }
                    break;
                }
            }

            msg = conn.receive_message().await?;
        }

        counters::auth_successful(mechanism);
        Ok(AuthVerdict::Authenticated)
    }
}
