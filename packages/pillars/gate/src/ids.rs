//! Entity identifier generation and validation.
//!
//! Each entity prefix gets a `regex::Regex` compiled once (via `once_cell`)
//! and a `new_*`/`validate_*` pair. Mirrors the `generate_risk_id`/
//! `generate_evidence_id` helpers in the risk and evidence services this
//! crate was ported from: a short prefix, an anchor (usually the owning
//! decision id), and a random suffix where the source used one.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::error::ValidationError;

macro_rules! id_pattern {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("static regex"));
    };
}

id_pattern!(ACTOR_RE, r"^act_[a-z_]+:.+$");
id_pattern!(ACTION_RE, r"^axn_[a-z_]+:.+$");
id_pattern!(RESOURCE_RE, r"^res_[a-z_]+:.+$");
id_pattern!(POLICY_RE, r"^pol_[a-z0-9_]+_v[0-9]+$");
id_pattern!(DECISION_RE, r"^dec_[0-9A-Z]{26}$");
id_pattern!(RISK_RE, r"^rsk_dec_.+$");
id_pattern!(ESCALATION_RE, r"^esc_dec_.+_[a-f0-9]{8}$");
id_pattern!(OVERRIDE_RE, r"^ovr_dec_.+_[a-f0-9]{8}$");
id_pattern!(EVIDENCE_RE, r"^evd_[a-z]+_[a-f0-9]{8}$");
id_pattern!(CONTROL_RE, r"^ctl_[a-z0-9_]+:.+$");
id_pattern!(CONTEXT_RE, r"^ctx_.+$");

fn check(re: &Regex, field: &str, value: &str) -> Result<(), ValidationError> {
    if re.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::Field {
            field: field.to_string(),
            reason: format!("'{value}' does not match the required id pattern"),
        })
    }
}

pub fn validate_actor_id(id: &str) -> Result<(), ValidationError> {
    check(&ACTOR_RE, "actor_id", id)
}

pub fn validate_action_id(id: &str) -> Result<(), ValidationError> {
    check(&ACTION_RE, "action_id", id)
}

pub fn validate_resource_id(id: &str) -> Result<(), ValidationError> {
    check(&RESOURCE_RE, "resource_id", id)
}

pub fn validate_policy_id(id: &str) -> Result<(), ValidationError> {
    check(&POLICY_RE, "policy_id", id)
}

pub fn validate_decision_id(id: &str) -> Result<(), ValidationError> {
    check(&DECISION_RE, "decision_id", id)
}

pub fn validate_risk_id(id: &str) -> Result<(), ValidationError> {
    check(&RISK_RE, "risk_id", id)
}

pub fn validate_escalation_id(id: &str) -> Result<(), ValidationError> {
    check(&ESCALATION_RE, "escalation_id", id)
}

pub fn validate_override_id(id: &str) -> Result<(), ValidationError> {
    check(&OVERRIDE_RE, "override_id", id)
}

pub fn validate_evidence_id(id: &str) -> Result<(), ValidationError> {
    check(&EVIDENCE_RE, "artifact_id", id)
}

pub fn validate_control_id(id: &str) -> Result<(), ValidationError> {
    check(&CONTROL_RE, "control_id", id)
}

pub fn validate_context_id(id: &str) -> Result<(), ValidationError> {
    check(&CONTEXT_RE, "context_id", id)
}

/// `dec_<26-char uppercase ULID>`, used as the correlation anchor for a
/// decision and every record that references it.
pub fn new_decision_id() -> String {
    format!("dec_{}", ulid::Ulid::new())
}

fn random_hex8() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    hex::encode(&bytes[..4])
}

/// `rsk_dec_<decision-local>` — exactly one per decision, so the id is
/// derived deterministically from the decision id with no random suffix.
pub fn new_risk_id(decision_id: &str) -> String {
    format!("rsk_{decision_id}")
}

/// `esc_dec_<decision-local>_<8hex>`. Re-escalation of the same decision
/// gets a fresh random suffix, so the many-to-one relationship is
/// representable.
pub fn new_escalation_id(decision_id: &str) -> String {
    format!("esc_{decision_id}_{}", random_hex8())
}

/// `ovr_dec_<decision-local>_<8hex>`.
pub fn new_override_id(decision_id: &str) -> String {
    format!("ovr_{decision_id}_{}", random_hex8())
}

/// `evd_<type>_<8 hex chars>`. `artifact_type` must already be lowercase
/// snake_case (enforced by the `ArtifactType` serde representation).
pub fn new_evidence_id(artifact_type: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("evd_{artifact_type}_{}", &suffix[..8])
}

/// `ctx_<uuid v4>`.
pub fn new_context_id() -> String {
    format!("ctx_{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_id_round_trips() {
        let id = new_decision_id();
        assert!(validate_decision_id(&id).is_ok());
    }

    #[test]
    fn risk_id_anchors_to_decision() {
        let dec = new_decision_id();
        let risk = new_risk_id(&dec);
        assert!(validate_risk_id(&risk).is_ok());
        assert!(risk.ends_with(&dec));
    }

    #[test]
    fn evidence_id_has_eight_hex_suffix() {
        let id = new_evidence_id("decision_log");
        assert!(validate_evidence_id(&id).is_ok());
    }

    #[test]
    fn policy_id_requires_version_suffix() {
        assert!(validate_policy_id("pol_default_v1").is_ok());
        assert!(validate_policy_id("pol_default").is_err());
    }

    #[test]
    fn actor_id_requires_namespace_colon() {
        assert!(validate_actor_id("act_ai_agent:claude").is_ok());
        assert!(validate_actor_id("act_claude").is_err());
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!(validate_evidence_id("rsk_decision_log_abcdef01").is_err());
    }

    #[test]
    fn escalation_id_has_decision_anchor_and_hex_suffix() {
        let dec = new_decision_id();
        let esc = new_escalation_id(&dec);
        assert!(validate_escalation_id(&esc).is_ok());
        assert!(esc.starts_with(&format!("esc_{dec}_")));
    }

    #[test]
    fn reescalation_yields_distinct_ids() {
        let dec = new_decision_id();
        assert_ne!(new_escalation_id(&dec), new_escalation_id(&dec));
    }
}
