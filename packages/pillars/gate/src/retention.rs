//! C11 — Retention & Legal Hold: classifies ledger entries into retention
//! classes and tracks legal holds against deletion/anonymization.
//!
//! No `retention.py` equivalent exists under `original_source/`; the
//! three-class table is grounded directly on SPEC_FULL.md §4.11. The
//! per-type default-duration shape (a slug-keyed table with an override
//! layer) mirrors `evidence.rs`'s `EvidenceArtifactType::default_retention_days`
//! plus its `retention_overrides` map.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::RetentionError;
use crate::ledger::LedgerEntry;
use crate::types::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    HighRisk,
    GdprIntersect,
    Standard,
}

impl RetentionClass {
    pub fn retention_days(self) -> i64 {
        match self {
            RetentionClass::HighRisk => 365 * 10,
            RetentionClass::GdprIntersect => 90,
            RetentionClass::Standard => 180,
        }
    }

    pub fn auto_anonymize(self) -> bool {
        matches!(self, RetentionClass::HighRisk | RetentionClass::GdprIntersect)
    }
}

const PII_MARKER_KEYS: [&str; 5] = ["email", "ssn", "phone", "pii", "personal_data"];

fn contains_pii_markers(data: &JsonValue) -> bool {
    let Some(obj) = data.as_object() else {
        return false;
    };
    obj.keys().any(|k| PII_MARKER_KEYS.iter().any(|marker| k.to_lowercase().contains(marker)))
}

/// Pure classification: the same rule C10 uses to tag entries for export
/// statistics without touching the retention store.
pub fn classify_entry(entry: &LedgerEntry) -> RetentionClass {
    let data = &entry.data;
    let risk_level = data.get("risk_level").and_then(JsonValue::as_u64).unwrap_or(0);
    let is_deny = data.get("decision").and_then(JsonValue::as_str) == Some("deny");
    let requires_oversight = data
        .get("review_required")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);

    if entry.event_type == "policy_load"
        || risk_level >= 4
        || is_deny
        || requires_oversight
        || contains_pii_markers(data)
    {
        return RetentionClass::HighRisk;
    }

    if contains_pii_markers(data) {
        return RetentionClass::GdprIntersect;
    }

    RetentionClass::Standard
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalHold {
    pub hold_id: String,
    pub reason: String,
    pub requester: String,
    pub entry_ids: Option<Vec<String>>,
    /// Number of specific entries this hold freezes (§6.1's `ApplyLegalHold`
    /// contract). Zero for a blanket hold with no `entry_ids` given.
    pub frozen_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_by: Option<String>,
}

impl LegalHold {
    fn covers(&self, entry_id: &str) -> bool {
        self.released_at.is_none()
            && self.entry_ids.as_ref().map_or(true, |ids| ids.iter().any(|id| id == entry_id))
    }
}

#[derive(Default)]
pub struct RetentionService {
    holds: RwLock<Vec<LegalHold>>,
}

impl RetentionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_legal_hold(
        &self,
        hold_id: &str,
        reason: &str,
        entry_ids: Option<Vec<String>>,
        requester: &str,
    ) -> LegalHold {
        let frozen_count = entry_ids.as_ref().map_or(0, |ids| ids.len());
        let hold = LegalHold {
            hold_id: hold_id.to_string(),
            reason: reason.to_string(),
            requester: requester.to_string(),
            entry_ids,
            frozen_count,
            created_at: Utc::now(),
            released_at: None,
            released_by: None,
        };
        self.holds.write().push(hold.clone());
        hold
    }

    pub fn release_legal_hold(&self, hold_id: &str, requester: &str) -> Result<LegalHold, RetentionError> {
        let mut holds = self.holds.write();
        let hold = holds
            .iter_mut()
            .find(|h| h.hold_id == hold_id)
            .ok_or_else(|| RetentionError::HoldNotFound(hold_id.to_string()))?;
        hold.released_at = Some(Utc::now());
        hold.released_by = Some(requester.to_string());
        Ok(hold.clone())
    }

    pub fn is_under_hold(&self, entry_id: &str) -> bool {
        self.holds.read().iter().any(|h| h.covers(entry_id))
    }

    fn active_hold_ids(&self) -> HashSet<String> {
        self.holds
            .read()
            .iter()
            .filter(|h| h.released_at.is_none())
            .map(|h| h.hold_id.clone())
            .collect()
    }

    /// Entries past their retention window and not frozen by a legal hold,
    /// paired with whether they are eligible for anonymization (vs outright
    /// deletion, which this service leaves to the caller's storage layer).
    pub fn eligible_for_disposal<'a>(
        &self,
        entries: &'a [LedgerEntry],
        now: DateTime<Utc>,
    ) -> Vec<(&'a LedgerEntry, RetentionClass)> {
        entries
            .iter()
            .filter(|entry| !self.is_under_hold(&entry.entry_id))
            .filter_map(|entry| {
                let class = classify_entry(entry);
                let expires_at = entry.timestamp + Duration::days(class.retention_days());
                (now >= expires_at).then_some((entry, class))
            })
            .collect()
    }

    /// Redacts `actor`/`user_intent`/`request_id` and obvious PII keys while
    /// preserving decision metadata (event type, timestamps, hashes).
    pub fn anonymize(&self, entry: &mut LedgerEntry) -> Result<(), RetentionError> {
        if self.is_under_hold(&entry.entry_id) {
            return Err(RetentionError::UnderLegalHold(entry.entry_id.clone()));
        }
        if let Some(obj) = entry.data.as_object_mut() {
            for key in ["actor", "user_intent", "request_id"] {
                if obj.contains_key(key) {
                    obj.insert(key.to_string(), JsonValue::String("[redacted]".to_string()));
                }
            }
            let pii_keys: Vec<String> = obj
                .keys()
                .filter(|k| PII_MARKER_KEYS.iter().any(|marker| k.to_lowercase().contains(marker)))
                .cloned()
                .collect();
            for key in pii_keys {
                obj.insert(key, JsonValue::String("[redacted]".to_string()));
            }
        }
        Ok(())
    }

    pub fn active_holds(&self) -> Vec<LegalHold> {
        self.holds
            .read()
            .iter()
            .filter(|h| h.released_at.is_none())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(event_type: &str, data: JsonValue, timestamp: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            entry_id: format!("ledg_{}", Uuid::new_v4()),
            event_type: event_type.to_string(),
            timestamp,
            data,
            previous_hash: "0".repeat(64),
            entry_hash: "1".repeat(64),
            signature: None,
        }
    }

    #[test]
    fn high_risk_classification_covers_denies_and_high_risk_level() {
        let deny = entry("decision", serde_json::json!({"decision": "deny"}), Utc::now());
        assert_eq!(classify_entry(&deny), RetentionClass::HighRisk);

        let risky = entry("decision", serde_json::json!({"decision": "permit", "risk_level": 5}), Utc::now());
        assert_eq!(classify_entry(&risky), RetentionClass::HighRisk);

        let policy_load = entry("policy_load", serde_json::json!({}), Utc::now());
        assert_eq!(classify_entry(&policy_load), RetentionClass::HighRisk);
    }

    #[test]
    fn gdpr_intersect_classification_flags_pii_markers() {
        let with_email = entry("decision", serde_json::json!({"decision": "permit", "email": "a@b.com"}), Utc::now());
        assert_eq!(classify_entry(&with_email), RetentionClass::GdprIntersect);
    }

    #[test]
    fn standard_classification_is_the_fallback() {
        let plain = entry("decision", serde_json::json!({"decision": "permit", "risk_level": 1}), Utc::now());
        assert_eq!(classify_entry(&plain), RetentionClass::Standard);
    }

    #[test]
    fn legal_hold_prevents_disposal_and_release_restores_eligibility() {
        let svc = RetentionService::new();
        let old_entry = entry(
            "decision",
            serde_json::json!({"decision": "permit", "risk_level": 1}),
            Utc::now() - Duration::days(200),
        );
        let held = svc.apply_legal_hold("hold_1", "investigation", Some(vec![old_entry.entry_id.clone()]), "dpo");
        assert!(svc.eligible_for_disposal(&[old_entry.clone()], Utc::now()).is_empty());

        svc.release_legal_hold(&held.hold_id, "dpo").unwrap();
        assert_eq!(svc.eligible_for_disposal(&[old_entry], Utc::now()).len(), 1);
    }

    #[test]
    fn anonymize_redacts_actor_and_intent_but_keeps_event_type() {
        let svc = RetentionService::new();
        let mut record = entry(
            "decision",
            serde_json::json!({"actor": "user_1", "user_intent": "delete records", "decision": "deny"}),
            Utc::now(),
        );
        svc.anonymize(&mut record).unwrap();
        assert_eq!(record.data["actor"], "[redacted]");
        assert_eq!(record.event_type, "decision");
    }

    #[test]
    fn apply_legal_hold_reports_frozen_count() {
        let svc = RetentionService::new();
        let specific = svc.apply_legal_hold("hold_1", "investigation", Some(vec!["ledg_a".to_string(), "ledg_b".to_string()]), "dpo");
        assert_eq!(specific.frozen_count, 2);

        let blanket = svc.apply_legal_hold("hold_2", "litigation", None, "dpo");
        assert_eq!(blanket.frozen_count, 0);
    }

    #[test]
    fn anonymize_fails_while_entry_is_under_legal_hold() {
        let svc = RetentionService::new();
        let mut record = entry("decision", serde_json::json!({"actor": "user_1"}), Utc::now());
        svc.apply_legal_hold("hold_1", "investigation", Some(vec![record.entry_id.clone()]), "dpo");
        assert!(svc.anonymize(&mut record).is_err());
    }
}
