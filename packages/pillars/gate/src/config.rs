//! Core configuration.
//!
//! Deserialized from YAML at startup (`serde_yaml`, matching the teacher's
//! config layer) with a `validate()` pass that runs once at `Core`
//! construction, the same "fail fast at construction, not at first use"
//! shape the risk engine's dimension-weight check uses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, RiskError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskWeights {
    #[serde(default = "default_security_weight")]
    pub security: f64,
    #[serde(default = "default_privacy_weight")]
    pub privacy: f64,
    #[serde(default = "default_compliance_weight")]
    pub compliance: f64,
    #[serde(default = "default_operational_weight")]
    pub operational: f64,
    #[serde(default = "default_reputational_weight")]
    pub reputational: f64,
    #[serde(default = "default_financial_weight")]
    pub financial: f64,
}

fn default_security_weight() -> f64 {
    0.25
}
fn default_privacy_weight() -> f64 {
    0.20
}
fn default_compliance_weight() -> f64 {
    0.20
}
fn default_operational_weight() -> f64 {
    0.15
}
fn default_reputational_weight() -> f64 {
    0.10
}
fn default_financial_weight() -> f64 {
    0.10
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            security: default_security_weight(),
            privacy: default_privacy_weight(),
            compliance: default_compliance_weight(),
            operational: default_operational_weight(),
            reputational: default_reputational_weight(),
            financial: default_financial_weight(),
        }
    }
}

impl RiskWeights {
    pub fn sum(&self) -> f64 {
        self.security
            + self.privacy
            + self.compliance
            + self.operational
            + self.reputational
            + self.financial
    }
}

/// SLA deadlines by escalation priority, in minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationSla {
    #[serde(default = "default_critical_sla")]
    pub critical_minutes: i64,
    #[serde(default = "default_high_sla")]
    pub high_minutes: i64,
    #[serde(default = "default_medium_sla")]
    pub medium_minutes: i64,
    #[serde(default = "default_low_sla")]
    pub low_minutes: i64,
}

fn default_critical_sla() -> i64 {
    120
}
fn default_high_sla() -> i64 {
    480
}
fn default_medium_sla() -> i64 {
    1440
}
fn default_low_sla() -> i64 {
    4320
}

impl Default for EscalationSla {
    fn default() -> Self {
        Self {
            critical_minutes: default_critical_sla(),
            high_minutes: default_high_sla(),
            medium_minutes: default_medium_sla(),
            low_minutes: default_low_sla(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Default policy mode used when a policy document omits `mode`.
    #[serde(default)]
    pub default_policy_mode: Option<String>,

    #[serde(default)]
    pub risk_weights: RiskWeights,

    #[serde(default)]
    pub escalation_sla: EscalationSla,

    /// Resolves Open Question #1: when `true` (the default), the core
    /// refuses to start unless `default_escalation_recipients` is
    /// non-empty. When `false`, an escalation raised with no explicit
    /// recipients is rejected at the call site instead of falling back to
    /// a silent, unconfigured notification target.
    #[serde(default = "default_require_explicit_recipients")]
    pub require_explicit_recipients: bool,

    #[serde(default)]
    pub default_escalation_recipients: Vec<String>,

    /// Maximum evidence artifact content size, in bytes.
    #[serde(default = "default_max_evidence_bytes")]
    pub max_evidence_content_bytes: usize,

    /// Retention period, in days, applied to evidence artifacts whose type
    /// has no more specific override in `evidence_retention_days_by_type`.
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,

    #[serde(default)]
    pub evidence_retention_days_by_type: HashMap<String, u32>,

    /// Response-time compliance target, in seconds, used by the oversight
    /// effectiveness report (§4.12).
    #[serde(default = "default_oversight_response_target")]
    pub oversight_response_time_target_seconds: i64,

    #[serde(default)]
    pub sql_database_url: Option<String>,

    /// Path to a 32-byte raw Ed25519 seed used for decision/ledger/oversight
    /// signing. When absent, `Core::new` generates an ephemeral key —
    /// signatures remain internally consistent for the process lifetime but
    /// cannot be verified against a previous run.
    #[serde(default)]
    pub signing_key_path: Option<String>,
}

fn default_require_explicit_recipients() -> bool {
    true
}

fn default_max_evidence_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_retention_days() -> u32 {
    365 * 7
}

fn default_oversight_response_target() -> i64 {
    60
}

impl GateConfig {
    /// Parse and validate a YAML configuration document.
    pub fn from_yaml(source: &str) -> Result<Self, PolicyError> {
        let config: GateConfig = serde_yaml::from_str(source)
            .map_err(|e| PolicyError::InvalidDocument(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        let sum = self.risk_weights.sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(PolicyError::InvalidDocument(format!(
                "risk_weights must sum to 1.0 (+/- 0.01), got {sum}"
            )));
        }
        if self.require_explicit_recipients && self.default_escalation_recipients.is_empty() {
            return Err(PolicyError::InvalidDocument(
                "require_explicit_recipients is true but default_escalation_recipients is empty"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Same weight-sum check as `validate`, surfaced as a `RiskError` for
    /// callers inside the risk-scoring path that never touch `PolicyError`.
    pub fn validate_risk_weights(&self) -> Result<(), RiskError> {
        let sum = self.risk_weights.sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(RiskError::InvalidWeights(sum));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let cfg = GateConfig::default();
        assert!((cfg.risk_weights.sum() - 1.0).abs() < 0.001);
    }

    #[test]
    fn requires_recipients_when_flag_set() {
        let cfg = GateConfig {
            require_explicit_recipients: true,
            default_escalation_recipients: vec![],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn allows_empty_recipients_when_flag_unset() {
        let cfg = GateConfig {
            require_explicit_recipients: false,
            default_escalation_recipients: vec![],
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_weight_sum() {
        let mut cfg = GateConfig {
            default_escalation_recipients: vec!["security-team".to_string()],
            ..Default::default()
        };
        cfg.risk_weights.security = 0.9;
        assert!(cfg.validate().is_err());
    }
}
