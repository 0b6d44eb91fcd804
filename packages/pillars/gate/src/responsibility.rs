//! C9 — Responsibility Tracker: who is accountable for each decision.
//!
//! Directly adapted from `original_source/src/lexecon/responsibility/tracker.py`.
//! The source's record id (`resp_{len+1}`, a counter over the in-process
//! list length) is not safe under concurrent access or persistence, so this
//! port uses a UUID-suffixed id instead — a deliberate deviation recorded in
//! DESIGN.md, consistent with §9's re-architecture note against stable
//! global counters.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::types::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMaker {
    AiSystem,
    HumanOperator,
    HumanSupervisor,
    HumanExecutive,
    Delegated,
    EmergencyOverride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsibilityLevel {
    Full,
    Shared,
    Supervised,
    Automated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsibilityRecord {
    pub record_id: String,
    pub decision_id: String,
    pub timestamp: DateTime<Utc>,
    pub decision_maker: DecisionMaker,
    pub responsible_party: String,
    pub role: String,
    pub reasoning: String,
    pub confidence: f64,
    pub responsibility_level: ResponsibilityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_to: Option<String>,
    #[serde(default)]
    pub override_ai: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_recommendation: Option<JsonValue>,
    #[serde(default)]
    pub review_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub liability_accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liability_signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountabilityReport {
    pub total_decisions: usize,
    pub override_rate: f64,
    pub pending_reviews: usize,
    pub top_responsible_parties: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalExportEntry {
    pub record: ResponsibilityRecord,
    pub human_in_loop: bool,
    pub liability_accepted: bool,
}

#[derive(Default)]
pub struct ResponsibilityTracker {
    records: RwLock<Vec<ResponsibilityRecord>>,
}

#[allow(clippy::too_many_arguments)]
impl ResponsibilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_responsibility(
        &self,
        decision_id: &str,
        decision_maker: DecisionMaker,
        responsible_party: &str,
        role: &str,
        reasoning: &str,
        confidence: f64,
        responsibility_level: ResponsibilityLevel,
        ai_recommendation: Option<JsonValue>,
        review_required: bool,
        override_ai: bool,
    ) -> ResponsibilityRecord {
        let record = ResponsibilityRecord {
            record_id: format!("resp_{}", Uuid::new_v4()),
            decision_id: decision_id.to_string(),
            timestamp: Utc::now(),
            decision_maker,
            responsible_party: responsible_party.to_string(),
            role: role.to_string(),
            reasoning: reasoning.to_string(),
            confidence,
            responsibility_level,
            delegated_from: None,
            escalated_to: None,
            override_ai,
            ai_recommendation,
            review_required,
            reviewed_by: None,
            reviewed_at: None,
            liability_accepted: false,
            liability_signature: None,
        };
        self.records.write().push(record.clone());
        record
    }

    /// The sole permitted mutation on an existing record: sets only
    /// `reviewed_by`/`reviewed_at`.
    pub fn mark_reviewed(&self, record_id: &str, reviewed_by: &str) -> Result<ResponsibilityRecord, ValidationError> {
        let mut records = self.records.write();
        let record = records
            .iter_mut()
            .find(|r| r.record_id == record_id)
            .ok_or_else(|| ValidationError::Field {
                field: "record_id".to_string(),
                reason: format!("no responsibility record '{record_id}'"),
            })?;
        record.reviewed_by = Some(reviewed_by.to_string());
        record.reviewed_at = Some(Utc::now());
        Ok(record.clone())
    }

    pub fn chain_for_decision(&self, decision_id: &str) -> Vec<ResponsibilityRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.decision_id == decision_id)
            .cloned()
            .collect()
    }

    pub fn by_party(&self, responsible_party: &str) -> Vec<ResponsibilityRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.responsible_party == responsible_party)
            .cloned()
            .collect()
    }

    pub fn ai_overrides(&self) -> Vec<ResponsibilityRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.override_ai)
            .cloned()
            .collect()
    }

    pub fn pending_reviews(&self) -> Vec<ResponsibilityRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.review_required && r.reviewed_at.is_none())
            .cloned()
            .collect()
    }

    /// All records for a decision, with a `human_in_loop`/`liability_accepted`
    /// attestation summary per record, for legal/regulator handoff.
    pub fn export_for_legal(&self, decision_id: &str) -> Vec<LegalExportEntry> {
        self.chain_for_decision(decision_id)
            .into_iter()
            .map(|record| LegalExportEntry {
                human_in_loop: !matches!(record.decision_maker, DecisionMaker::AiSystem),
                liability_accepted: record.liability_accepted,
                record,
            })
            .collect()
    }

    pub fn generate_accountability_report(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> AccountabilityReport {
        let records = self.records.read();
        let in_range: Vec<&ResponsibilityRecord> = records
            .iter()
            .filter(|r| start.map_or(true, |s| r.timestamp >= s))
            .filter(|r| end.map_or(true, |e| r.timestamp <= e))
            .collect();

        let total_decisions = in_range.len();
        let overrides = in_range.iter().filter(|r| r.override_ai).count();
        let override_rate = if total_decisions > 0 {
            overrides as f64 / total_decisions as f64 * 100.0
        } else {
            0.0
        };
        let pending_reviews = in_range
            .iter()
            .filter(|r| r.review_required && r.reviewed_at.is_none())
            .count();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for record in &in_range {
            *counts.entry(record.responsible_party.clone()).or_insert(0) += 1;
        }
        let mut top_responsible_parties: Vec<(String, usize)> = counts.into_iter().collect();
        top_responsible_parties.sort_by(|a, b| b.1.cmp(&a.1));
        top_responsible_parties.truncate(10);

        AccountabilityReport {
            total_decisions,
            override_rate,
            pending_reviews,
            top_responsible_parties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_reviewed_only_touches_review_fields() {
        let tracker = ResponsibilityTracker::new();
        let record = tracker.record_responsibility(
            "dec_1",
            DecisionMaker::AiSystem,
            "gatekeeper",
            "automated-policy",
            "permitted by policy",
            0.9,
            ResponsibilityLevel::Automated,
            None,
            true,
            false,
        );
        let reviewed = tracker.mark_reviewed(&record.record_id, "compliance-officer").unwrap();
        assert_eq!(reviewed.reviewed_by.as_deref(), Some("compliance-officer"));
        assert_eq!(reviewed.reasoning, record.reasoning);
    }

    #[test]
    fn chain_for_decision_returns_all_records() {
        let tracker = ResponsibilityTracker::new();
        tracker.record_responsibility(
            "dec_1", DecisionMaker::AiSystem, "gatekeeper", "automated-policy",
            "r1", 0.9, ResponsibilityLevel::Automated, None, false, false,
        );
        tracker.record_responsibility(
            "dec_1", DecisionMaker::HumanSupervisor, "jane", "reviewer",
            "r2", 1.0, ResponsibilityLevel::Shared, None, false, false,
        );
        assert_eq!(tracker.chain_for_decision("dec_1").len(), 2);
    }

    #[test]
    fn pending_reviews_excludes_reviewed_records() {
        let tracker = ResponsibilityTracker::new();
        let record = tracker.record_responsibility(
            "dec_1", DecisionMaker::AiSystem, "gatekeeper", "automated-policy",
            "r1", 0.9, ResponsibilityLevel::Automated, None, true, false,
        );
        assert_eq!(tracker.pending_reviews().len(), 1);
        tracker.mark_reviewed(&record.record_id, "someone").unwrap();
        assert_eq!(tracker.pending_reviews().len(), 0);
    }

    #[test]
    fn accountability_report_computes_override_rate() {
        let tracker = ResponsibilityTracker::new();
        tracker.record_responsibility(
            "dec_1", DecisionMaker::HumanSupervisor, "jane", "reviewer",
            "overrode AI", 1.0, ResponsibilityLevel::Full, None, false, true,
        );
        tracker.record_responsibility(
            "dec_2", DecisionMaker::AiSystem, "gatekeeper", "automated-policy",
            "auto", 0.9, ResponsibilityLevel::Automated, None, false, false,
        );
        let report = tracker.generate_accountability_report(None, None);
        assert_eq!(report.total_decisions, 2);
        assert!((report.override_rate - 50.0).abs() < 0.001);
    }

    #[test]
    fn legal_export_marks_ai_only_records_as_not_human_in_loop() {
        let tracker = ResponsibilityTracker::new();
        tracker.record_responsibility(
            "dec_1", DecisionMaker::AiSystem, "gatekeeper", "automated-policy",
            "r1", 0.9, ResponsibilityLevel::Automated, None, false, false,
        );
        let export = tracker.export_for_legal("dec_1");
        assert_eq!(export.len(), 1);
        assert!(!export[0].human_in_loop);
    }
}
