//! # Metrics Collection
//!
//! Counters and gauges for engine activity. Exporter wiring (Prometheus or
//! otherwise) belongs to the embedding process; these helpers only record.

use metrics::{counter, gauge};

/// Record a secret write (versioned upsert) outcome.
pub fn record_secret_write(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("vaultry_secret_writes_total", &[("status", status.to_string())]).increment(1);
}

/// Record a secret read outcome.
pub fn record_secret_read(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("vaultry_secret_reads_total", &[("status", status.to_string())]).increment(1);
}

/// Record a secret deletion.
pub fn record_secret_deleted() {
    counter!("vaultry_secret_deletes_total").increment(1);
}

/// Record a token issuance.
pub fn record_token_issued() {
    counter!("vaultry_tokens_issued_total").increment(1);
}

/// Record a token revocation.
pub fn record_token_revoked() {
    counter!("vaultry_tokens_revoked_total").increment(1);
}

/// Track the number of active tokens.
pub fn set_active_tokens(count: usize) {
    gauge!("vaultry_tokens_active").set(count as f64);
}

/// Record an authentication failure (unknown, expired, or revoked token).
pub fn record_login_failure(reason: &'static str) {
    counter!("vaultry_login_failures_total", &[("reason", reason.to_string())]).increment(1);
}

/// Record a keyring rotation.
pub fn record_key_rotation() {
    counter!("vaultry_key_rotations_total").increment(1);
}

/// Record an audit record successfully written.
pub fn record_audit_written() {
    counter!("vaultry_audit_records_total").increment(1);
}

/// Record an audit record dropped after exhausting write retries. This is
/// an operational alarm: the trail is incomplete.
pub fn record_audit_dropped() {
    counter!("vaultry_audit_dropped_total").increment(1);
}

/// Record a cryptographic failure (unwrap or decrypt).
pub fn record_crypto_failure() {
    counter!("vaultry_crypto_failures_total").increment(1);
}
