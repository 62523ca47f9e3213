//! Metrics for connection establishment
//!
//! Emitted through the `metrics` facade; nothing is recorded unless the
//! application installs a recorder.

/// Label values
pub mod labels {
    /// TLS not attempted (`sslmode=disable`)
    pub const TLS_DISABLED: &str = "disabled";
    /// Server accepted SSLRequest and the upgrade succeeded
    pub const TLS_UPGRADED: &str = "upgraded";
    /// Server refused SSLRequest
    pub const TLS_REFUSED: &str = "refused";
    /// Server accepted SSLRequest but the TLS handshake failed
    pub const TLS_FAILED: &str = "failed";

    /// Handshake ended authenticated
    pub const OUTCOME_READY: &str = "ready";
    /// Handshake ended with an error
    pub const OUTCOME_FAILED: &str = "failed";

    /// Server accepted without credentials
    pub const MECHANISM_TRUST: &str = "trust";
    /// Cleartext password exchange
    pub const MECHANISM_CLEARTEXT: &str = "cleartext";
}

/// Counters
pub mod counters {
    /// A handshake was started
    pub fn handshake_started() {
        metrics::counter!("pg_startup_handshakes_started_total").increment(1);
    }

    /// A handshake finished; `reason` is the error category or empty on success
    pub fn handshake_completed(outcome: &'static str, reason: &'static str) {
        metrics::counter!(
            "pg_startup_handshakes_completed_total",
            "outcome" => outcome,
            "reason" => reason
        )
        .increment(1);
    }

    /// Result of the SSLRequest exchange
    pub fn tls_negotiation(result: &'static str) {
        metrics::counter!("pg_startup_tls_negotiations_total", "result" => result).increment(1);
    }

    /// Authentication succeeded
    pub fn auth_successful(mechanism: &'static str) {
        metrics::counter!("pg_startup_auth_successful_total", "mechanism" => mechanism)
            .increment(1);
    }

    /// Authentication was rejected
    pub fn auth_rejected(mechanism: &'static str) {
        metrics::counter!("pg_startup_auth_rejected_total", "mechanism" => mechanism)
            .increment(1);
    }
}

/// Histograms
pub mod histograms {
    /// Wall time from dial (or stream hand-over) to the final outcome
    pub fn handshake_duration(outcome: &'static str, millis: u64) {
        metrics::histogram!("pg_startup_handshake_duration_ms", "outcome" => outcome)
            .record(millis as f64);
    }
}
