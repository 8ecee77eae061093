//! Queued validation entries.
//!
//! A validation payload is whatever the server expects for a voucher
//! ("bon de sortie") validation. It is kept as an opaque JSON value; the
//! queue only adds bookkeeping around it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a queued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Waiting to be submitted.
    Pending,
    /// Parked after too many failures; skipped until requeued.
    Dead,
}

impl EntryState {
    /// Column value used by the storage layer.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dead => "dead",
        }
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validation payload waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingValidation {
    /// Storage-assigned id; ids grow with insertion order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// The payload sent to the server, verbatim.
    pub payload: Value,

    /// BLAKE3 digest of the payload's JSON text.
    pub fingerprint: String,

    /// When the payload was queued.
    pub queued_at: DateTime<Utc>,

    /// Failed submissions so far.
    pub attempts: u32,

    /// Error text of the last failed submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the last failed submission happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Current lifecycle state.
    pub state: EntryState,
}

impl PendingValidation {
    /// Wrap a payload for queueing.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        let fingerprint = Self::compute_fingerprint(&payload);
        Self {
            id: None,
            payload,
            fingerprint,
            queued_at: Utc::now(),
            attempts: 0,
            last_error: None,
            last_attempt_at: None,
            state: EntryState::Pending,
        }
    }

    /// Compute the fingerprint of a payload.
    ///
    /// `serde_json` keeps object keys sorted, so equal payloads hash equally
    /// regardless of the key order they were written with.
    #[must_use]
    pub fn compute_fingerprint(payload: &Value) -> String {
        blake3::hash(payload.to_string().as_bytes())
            .to_hex()
            .to_string()
    }

    /// Short form of the fingerprint for logs and tables.
    #[must_use]
    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..self.fingerprint.len().min(12)]
    }

    /// Voucher id carried by the payload, if any.
    ///
    /// Used only for display; the queue never interprets payloads.
    #[must_use]
    pub fn voucher_id(&self) -> Option<i64> {
        ["id_bande_sortie", "id_bon", "id"]
            .iter()
            .find_map(|key| self.payload.get(key).and_then(Value::as_i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_state_display() {
        assert_eq!(EntryState::Pending.to_string(), "pending");
        assert_eq!(EntryState::Dead.to_string(), "dead");
    }

    #[test]
    fn test_new_entry() {
        let entry = PendingValidation::new(json!({"id_bande_sortie": 12, "user_cr": 3}));

        assert!(entry.id.is_none());
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.state, EntryState::Pending);
        assert!(entry.last_error.is_none());
        assert_eq!(entry.fingerprint.len(), 64);
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(
            PendingValidation::compute_fingerprint(&a),
            PendingValidation::compute_fingerprint(&b)
        );
    }

    #[test]
    fn test_fingerprint_differs_for_different_payloads() {
        let a = PendingValidation::new(json!({"id_bande_sortie": 1}));
        let b = PendingValidation::new(json!({"id_bande_sortie": 2}));
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_short_fingerprint() {
        let entry = PendingValidation::new(json!({}));
        assert_eq!(entry.short_fingerprint().len(), 12);
        assert!(entry.fingerprint.starts_with(entry.short_fingerprint()));
    }

    #[test]
    fn test_voucher_id() {
        let entry = PendingValidation::new(json!({"id_bande_sortie": 44}));
        assert_eq!(entry.voucher_id(), Some(44));

        let entry = PendingValidation::new(json!({"id": 9}));
        assert_eq!(entry.voucher_id(), Some(9));

        let entry = PendingValidation::new(json!(["not", "an", "object"]));
        assert_eq!(entry.voucher_id(), None);
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let entry = PendingValidation::new(json!({"x": 1}));
        let text = serde_json::to_string(&entry).unwrap();
        assert!(!text.contains("last_error"));
        assert!(!text.contains("\"id\""));
        assert!(text.contains("\"state\":\"pending\""));
    }
}
