//! C7 — Override Service: append-only record of human overrides of AI decisions.
//!
//! Directly adapted from `original_source/src/lexecon/override/service.py`
//! (`OverrideConfig`, `is_authorized`, `OverrideValidator`) with field names
//! from `model_governance_pack/models/override.py`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::OverrideError;
use crate::evidence::{ArtifactType, EvidenceService};
use crate::ids::new_override_id;
use crate::types::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideType {
    EmergencyBypass,
    ExecutiveOverride,
    TimeLimitedException,
    RiskAccepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginalOutcome {
    Denied,
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewOutcome {
    Approved,
    Conditional,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_one_time: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to_actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Override {
    pub override_id: String,
    pub decision_id: String,
    pub override_type: OverrideType,
    pub authorized_by: String,
    pub justification: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_outcome: Option<OriginalOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_outcome: Option<NewOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<OverrideScope>,
    pub review_required_by: DateTime<Utc>,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, JsonValue>>,
}

/// Roles permitted to author an override at all. Executive-only override
/// types additionally require membership in `EXECUTIVE_ROLES`.
const AUTHORIZED_ROLES: &[&str] = &[
    "compliance_officer",
    "security_lead",
    "legal_counsel",
    "risk_manager",
    "executive",
];
const EXECUTIVE_ROLES: &[&str] = &["executive"];

const GENERIC_JUSTIFICATIONS: &[&str] = &[
    "approved",
    "ok",
    "fine",
    "looks good",
    "lgtm",
    "approved as requested",
    "sounds good",
    "yes",
    "no issue",
];

fn is_authorized(role: &str) -> bool {
    AUTHORIZED_ROLES.contains(&role)
}

fn requires_executive(override_type: OverrideType) -> bool {
    matches!(
        override_type,
        OverrideType::EmergencyBypass | OverrideType::ExecutiveOverride
    )
}

/// Mirrors the source's `OverrideValidator`: the length floor is a schema
/// concern, but a justification can clear it and still be governance-free
/// filler ("approved", "ok", ...).
fn validate_justification(justification: &str) -> Result<(), OverrideError> {
    if justification.trim().chars().count() < 20 {
        return Err(OverrideError::JustificationTooShort);
    }
    let normalized = justification.trim().to_lowercase();
    if GENERIC_JUSTIFICATIONS.contains(&normalized.as_str()) {
        return Err(OverrideError::JustificationTooGeneric);
    }
    Ok(())
}

fn validate_time_limit(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), OverrideError> {
    if expires_at <= now {
        return Err(OverrideError::ExpiryInPast);
    }
    if expires_at > now + Duration::days(90) {
        return Err(OverrideError::ExpiryTooFar);
    }
    Ok(())
}

fn validate_scope(
    override_type: OverrideType,
    scope: &Option<OverrideScope>,
) -> Result<(), OverrideError> {
    if override_type == OverrideType::EmergencyBypass {
        let one_time = scope.as_ref().and_then(|s| s.is_one_time).unwrap_or(false);
        if !one_time {
            return Err(OverrideError::EmergencyBypassMustBeOneTime);
        }
    }
    Ok(())
}

pub struct OverrideService {
    overrides: RwLock<Vec<Override>>,
    by_decision: RwLock<HashMap<String, Vec<String>>>,
    evidence: Arc<EvidenceService>,
}

impl OverrideService {
    pub fn new(evidence: Arc<EvidenceService>) -> Self {
        Self {
            overrides: RwLock::new(Vec::new()),
            by_decision: RwLock::new(HashMap::new()),
            evidence,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_override(
        &self,
        decision_id: &str,
        override_type: OverrideType,
        authorized_by: &str,
        authorized_by_role: &str,
        justification: &str,
        original_outcome: Option<OriginalOutcome>,
        new_outcome: Option<NewOutcome>,
        expires_at: Option<DateTime<Utc>>,
        scope: Option<OverrideScope>,
    ) -> Result<Override, OverrideError> {
        if !is_authorized(authorized_by_role) {
            return Err(OverrideError::NotAuthorized(authorized_by_role.to_string()));
        }
        if requires_executive(override_type) && !EXECUTIVE_ROLES.contains(&authorized_by_role) {
            return Err(OverrideError::RequiresExecutive {
                override_type: format!("{override_type:?}"),
                actor: authorized_by_role.to_string(),
            });
        }

        validate_justification(justification)?;
        validate_scope(override_type, &scope)?;

        let now = Utc::now();
        let expires_at = match override_type {
            OverrideType::TimeLimitedException => {
                let expiry = expires_at.unwrap_or(now + Duration::hours(24));
                validate_time_limit(expiry, now)?;
                Some(expiry)
            }
            _ => {
                if let Some(expiry) = expires_at {
                    validate_time_limit(expiry, now)?;
                }
                expires_at
            }
        };

        let mut override_record = Override {
            override_id: new_override_id(decision_id),
            decision_id: decision_id.to_string(),
            override_type,
            authorized_by: authorized_by.to_string(),
            justification: justification.to_string(),
            timestamp: now,
            original_outcome,
            new_outcome,
            expires_at,
            scope,
            review_required_by: now + Duration::days(30),
            evidence_ids: Vec::new(),
            metadata: None,
        };

        self.overrides.write().push(override_record.clone());
        self.by_decision
            .write()
            .entry(decision_id.to_string())
            .or_default()
            .push(override_record.override_id.clone());

        // §4.7 step 6: every override is attested to evidence. Storage
        // failure doesn't unwind the override itself.
        let content = serde_json::to_vec(&override_record).unwrap_or_default();
        match self.evidence.store_artifact(
            ArtifactType::Attestation,
            &content,
            "override-service",
            Some("application/json".to_string()),
            vec![decision_id.to_string()],
            vec![],
            None,
        ) {
            Ok(artifact) => {
                if let Err(err) = self.attach_evidence(&override_record.override_id, &artifact.artifact_id) {
                    tracing::warn!(
                        override_id = %override_record.override_id,
                        error = %err,
                        "failed to attach ATTESTATION evidence id to override record"
                    );
                } else {
                    override_record.evidence_ids.push(artifact.artifact_id);
                }
            }
            Err(err) => {
                tracing::warn!(
                    override_id = %override_record.override_id,
                    error = %err,
                    "failed to emit ATTESTATION evidence artifact for override"
                );
            }
        }

        Ok(override_record)
    }

    /// Append an evidence artifact id produced for this override (the
    /// `ATTESTATION` artifact emitted by the caller in §4.7 step 6).
    pub fn attach_evidence(&self, override_id: &str, evidence_id: &str) -> Result<(), OverrideError> {
        let mut overrides = self.overrides.write();
        let record = overrides
            .iter_mut()
            .find(|o| o.override_id == override_id)
            .ok_or_else(|| OverrideError::NotFound(override_id.to_string()))?;
        record.evidence_ids.push(evidence_id.to_string());
        Ok(())
    }

    pub fn get_active_override(&self, decision_id: &str) -> Option<Override> {
        let now = Utc::now();
        let overrides = self.overrides.read();
        self.by_decision
            .read()
            .get(decision_id)?
            .iter()
            .filter_map(|id| overrides.iter().find(|o| &o.override_id == id))
            .filter(|o| o.expires_at.map_or(true, |exp| exp > now))
            .max_by_key(|o| o.timestamp)
            .cloned()
    }

    /// Returns a **copy** of `original` augmented with an `override_status`
    /// block; `original` is never mutated (§4.7).
    pub fn get_decision_with_override_status(
        &self,
        decision_id: &str,
        original: &JsonValue,
    ) -> JsonValue {
        let mut enriched = original.clone();
        let status = match self.get_active_override(decision_id) {
            Some(o) => serde_json::json!({
                "has_active_override": true,
                "override_id": o.override_id,
                "override_type": o.override_type,
                "authorized_by": o.authorized_by,
            }),
            None => serde_json::json!({ "has_active_override": false }),
        };
        if let Some(obj) = enriched.as_object_mut() {
            obj.insert("override_status".to_string(), status);
        }
        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_JUSTIFICATION: &str = "verified with the on-call security lead before approving";

    fn service() -> OverrideService {
        OverrideService::new(Arc::new(EvidenceService::new(1024 * 1024, Default::default())))
    }

    #[test]
    fn rejects_unauthorized_role() {
        let svc = service();
        let result = svc.create_override(
            "dec_1",
            OverrideType::RiskAccepted,
            "alice",
            "intern",
            GOOD_JUSTIFICATION,
            None,
            None,
            None,
            None,
        );
        assert!(matches!(result, Err(OverrideError::NotAuthorized(_))));
    }

    #[test]
    fn emergency_bypass_requires_executive() {
        let svc = service();
        let result = svc.create_override(
            "dec_1",
            OverrideType::EmergencyBypass,
            "bob",
            "security_lead",
            GOOD_JUSTIFICATION,
            None,
            None,
            None,
            Some(OverrideScope { is_one_time: Some(true), ..Default::default() }),
        );
        assert!(matches!(result, Err(OverrideError::RequiresExecutive { .. })));
    }

    #[test]
    fn emergency_bypass_must_be_one_time() {
        let svc = service();
        let result = svc.create_override(
            "dec_1",
            OverrideType::EmergencyBypass,
            "carol",
            "executive",
            GOOD_JUSTIFICATION,
            None,
            None,
            None,
            None,
        );
        assert!(matches!(result, Err(OverrideError::EmergencyBypassMustBeOneTime)));
    }

    #[test]
    fn rejects_generic_justification() {
        let svc = service();
        let result = svc.create_override(
            "dec_1",
            OverrideType::RiskAccepted,
            "dave",
            "risk_manager",
            "approved as requested",
            None,
            None,
            None,
            None,
        );
        assert!(matches!(result, Err(OverrideError::JustificationTooGeneric)));
    }

    #[test]
    fn time_limited_exception_defaults_to_24h_and_caps_at_90d() {
        let svc = service();
        let over_limit = Utc::now() + Duration::days(91);
        let result = svc.create_override(
            "dec_1",
            OverrideType::TimeLimitedException,
            "erin",
            "compliance_officer",
            GOOD_JUSTIFICATION,
            None,
            None,
            Some(over_limit),
            None,
        );
        assert!(matches!(result, Err(OverrideError::ExpiryTooFar)));

        let ok = svc.create_override(
            "dec_2",
            OverrideType::TimeLimitedException,
            "erin",
            "compliance_officer",
            GOOD_JUSTIFICATION,
            None,
            None,
            None,
            None,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn get_decision_with_override_status_does_not_mutate_original() {
        let svc = service();
        svc.create_override(
            "dec_1",
            OverrideType::RiskAccepted,
            "frank",
            "risk_manager",
            GOOD_JUSTIFICATION,
            None,
            None,
            None,
            None,
        )
        .unwrap();

        let original = serde_json::json!({"decision_id": "dec_1", "decision": "deny"});
        let enriched = svc.get_decision_with_override_status("dec_1", &original);

        assert!(!original.as_object().unwrap().contains_key("override_status"));
        assert!(enriched.as_object().unwrap().contains_key("override_status"));
    }

    #[test]
    fn create_override_attaches_attestation_evidence() {
        let evidence = Arc::new(EvidenceService::new(1024 * 1024, Default::default()));
        let svc = OverrideService::new(evidence.clone());
        let record = svc
            .create_override(
                "dec_evidence",
                OverrideType::RiskAccepted,
                "gina",
                "risk_manager",
                GOOD_JUSTIFICATION,
                None,
                None,
                None,
                None,
            )
            .unwrap();

        assert_eq!(record.evidence_ids.len(), 1);
        let lineage = evidence.export_artifact_lineage("dec_evidence");
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].artifact_type, ArtifactType::Attestation);
    }
}
