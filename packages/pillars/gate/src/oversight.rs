//! C12 — Oversight Evidence: the signed human-intervention log and the
//! effectiveness/escalation-path reporting built on top of it.
//!
//! Directly adapted from
//! `original_source/src/lexecon/compliance/eu_ai_act/article_14_oversight.py`
//! (`HumanIntervention`, `InterventionType`, `OversightRole`, the default
//! escalation paths, the override-rate interpretation bands and compliance
//! thresholds). Signing goes through this crate's C1 `IdentityKey` over a
//! canonical JSON payload rather than the source's bespoke `KeyManager`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GateError, ValidationError};
use crate::identity::IdentityKey;
use crate::types::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionType {
    Approval,
    Override,
    Escalation,
    EmergencyStop,
    PolicyException,
    ManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversightRole {
    ComplianceOfficer,
    SecurityLead,
    LegalCounsel,
    RiskManager,
    Executive,
    SocAnalyst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanIntervention {
    pub intervention_id: String,
    pub timestamp: DateTime<Utc>,
    pub intervention_type: InterventionType,
    pub ai_recommendation: JsonValue,
    pub ai_confidence: f64,
    pub human_decision: JsonValue,
    pub human_role: OversightRole,
    pub request_context: JsonValue,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct SignablePayload<'a> {
    intervention_id: &'a str,
    timestamp: DateTime<Utc>,
    intervention_type: InterventionType,
    ai_recommendation: &'a JsonValue,
    human_decision: &'a JsonValue,
    human_role: OversightRole,
    reason: &'a str,
}

impl HumanIntervention {
    fn signable(&self) -> SignablePayload<'_> {
        SignablePayload {
            intervention_id: &self.intervention_id,
            timestamp: self.timestamp,
            intervention_type: self.intervention_type,
            ai_recommendation: &self.ai_recommendation,
            human_decision: &self.human_decision,
            human_role: self.human_role,
            reason: &self.reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPath {
    pub decision_class: String,
    pub roles: Vec<OversightRole>,
    pub max_response_time_minutes: u32,
    pub requires_approval_from: OversightRole,
}

#[derive(Debug, Clone, Serialize)]
pub struct EscalationSimulation {
    pub decision_class: String,
    pub current_role: OversightRole,
    pub can_approve: bool,
    pub requires_approval_from: OversightRole,
    pub next_escalation: Option<OversightRole>,
    pub max_response_time_minutes: u32,
    pub full_escalation_chain: Vec<OversightRole>,
}

fn default_escalation_paths() -> HashMap<String, EscalationPath> {
    let mut paths = HashMap::new();
    paths.insert(
        "high_risk".to_string(),
        EscalationPath {
            decision_class: "high_risk".to_string(),
            roles: vec![OversightRole::SocAnalyst, OversightRole::SecurityLead, OversightRole::Executive],
            max_response_time_minutes: 15,
            requires_approval_from: OversightRole::SecurityLead,
        },
    );
    paths.insert(
        "financial".to_string(),
        EscalationPath {
            decision_class: "financial".to_string(),
            roles: vec![OversightRole::RiskManager, OversightRole::ComplianceOfficer, OversightRole::Executive],
            max_response_time_minutes: 30,
            requires_approval_from: OversightRole::RiskManager,
        },
    );
    paths.insert(
        "legal".to_string(),
        EscalationPath {
            decision_class: "legal".to_string(),
            roles: vec![OversightRole::ComplianceOfficer, OversightRole::LegalCounsel, OversightRole::Executive],
            max_response_time_minutes: 60,
            requires_approval_from: OversightRole::LegalCounsel,
        },
    );
    paths.insert(
        "operational".to_string(),
        EscalationPath {
            decision_class: "operational".to_string(),
            roles: vec![OversightRole::SocAnalyst, OversightRole::SecurityLead],
            max_response_time_minutes: 5,
            requires_approval_from: OversightRole::SocAnalyst,
        },
    );
    paths
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseTimeMetrics {
    pub average_ms: f64,
    pub minimum_ms: u64,
    pub maximum_ms: u64,
    pub average_seconds: f64,
    pub compliance_target_seconds: u64,
    pub meets_target: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceAssessment {
    pub compliant: bool,
    pub status: String,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectivenessReport {
    pub period_days: i64,
    pub total_interventions: usize,
    pub by_type: HashMap<String, usize>,
    pub by_role: HashMap<String, usize>,
    pub total_overrides: usize,
    pub total_approvals: usize,
    pub override_rate_percent: f64,
    pub interpretation: String,
    pub response_time: Option<ResponseTimeMetrics>,
    pub compliance_assessment: ComplianceAssessment,
    pub all_signed: bool,
    pub signatures_verified: usize,
    pub verification_rate_percent: f64,
}

const COMPLIANCE_TARGET_SECONDS: u64 = 60;

fn interpret_override_rate(rate: f64) -> String {
    if rate < 5.0 {
        "low - possible rubber-stamping, humans may not be actively reviewing".to_string()
    } else if rate < 15.0 {
        "moderate - acceptable but monitor for genuine engagement".to_string()
    } else if rate < 40.0 {
        "healthy - clear evidence of active human judgment".to_string()
    } else {
        "high - frequent overrides may indicate AI recommendations need improvement".to_string()
    }
}

fn assess_compliance(override_rate: f64, avg_response_ms: f64) -> ComplianceAssessment {
    let mut compliant = true;
    let mut issues = Vec::new();

    if override_rate < 5.0 {
        compliant = false;
        issues.push("override rate too low - possible rubber-stamping".to_string());
    } else if override_rate > 50.0 {
        issues.push("override rate very high - AI recommendations may need improvement".to_string());
    }

    if avg_response_ms / 1000.0 > COMPLIANCE_TARGET_SECONDS as f64 {
        compliant = false;
        issues.push("average response time exceeds 60 second target".to_string());
    }

    if issues.is_empty() {
        issues.push("none - oversight is effective".to_string());
    }

    ComplianceAssessment {
        status: if compliant { "compliant".to_string() } else { "needs_attention".to_string() },
        compliant,
        issues,
    }
}

pub struct OversightService {
    signing_key: Option<IdentityKey>,
    interventions: RwLock<Vec<HumanIntervention>>,
    escalation_paths: RwLock<HashMap<String, EscalationPath>>,
}

impl OversightService {
    pub fn new(signing_key: Option<IdentityKey>) -> Self {
        Self {
            signing_key,
            interventions: RwLock::new(Vec::new()),
            escalation_paths: RwLock::new(default_escalation_paths()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_intervention(
        &self,
        intervention_type: InterventionType,
        ai_recommendation: JsonValue,
        human_decision: JsonValue,
        human_role: OversightRole,
        reason: &str,
        request_context: Option<JsonValue>,
        response_time_ms: Option<u64>,
    ) -> Result<HumanIntervention, GateError> {
        let ai_confidence = ai_recommendation.get("confidence").and_then(JsonValue::as_f64).unwrap_or(0.0);

        let mut intervention = HumanIntervention {
            intervention_id: format!("oversight_{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            intervention_type,
            ai_recommendation,
            ai_confidence,
            human_decision,
            human_role,
            request_context: request_context.unwrap_or(JsonValue::Null),
            reason: reason.to_string(),
            signature: None,
            response_time_ms,
            escalated_from: None,
            escalated_to: None,
        };

        if let Some(key) = &self.signing_key {
            let payload = intervention.signable();
            intervention.signature = Some(key.sign(&payload).map_err(GateError::from)?);
        }

        self.interventions.write().push(intervention.clone());
        Ok(intervention)
    }

    pub fn verify_intervention(&self, intervention: &HumanIntervention) -> bool {
        let Some(signature) = &intervention.signature else {
            return false;
        };
        let Some(key) = &self.signing_key else {
            return false;
        };
        crate::identity::verify(&intervention.signable(), signature, &key.verifying_key_b64()).is_ok()
    }

    pub fn generate_effectiveness_report(&self, period_days: i64) -> EffectivenessReport {
        let cutoff = Utc::now() - Duration::days(period_days);
        let interventions = self.interventions.read();
        let recent: Vec<&HumanIntervention> = interventions.iter().filter(|i| i.timestamp >= cutoff).collect();

        let total = recent.len();
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_role: HashMap<String, usize> = HashMap::new();
        let mut overrides = 0usize;
        let mut approvals = 0usize;
        let mut response_times: Vec<u64> = Vec::new();

        for intervention in &recent {
            *by_type.entry(format!("{:?}", intervention.intervention_type)).or_insert(0) += 1;
            *by_role.entry(format!("{:?}", intervention.human_role)).or_insert(0) += 1;

            let ai_decision = intervention.ai_recommendation.get("decision").and_then(JsonValue::as_str);
            let human_decision = intervention.human_decision.get("decision").and_then(JsonValue::as_str);
            if let (Some(ai), Some(human)) = (ai_decision, human_decision) {
                if ai != human {
                    overrides += 1;
                } else {
                    approvals += 1;
                }
            }

            if let Some(ms) = intervention.response_time_ms {
                response_times.push(ms);
            }
        }

        let override_rate = if overrides + approvals > 0 {
            overrides as f64 / (overrides + approvals) as f64 * 100.0
        } else {
            0.0
        };

        let response_time = if response_times.is_empty() {
            None
        } else {
            let sum: u64 = response_times.iter().sum();
            let average_ms = sum as f64 / response_times.len() as f64;
            Some(ResponseTimeMetrics {
                average_ms,
                minimum_ms: *response_times.iter().min().unwrap(),
                maximum_ms: *response_times.iter().max().unwrap(),
                average_seconds: average_ms / 1000.0,
                compliance_target_seconds: COMPLIANCE_TARGET_SECONDS,
                meets_target: average_ms / 1000.0 < COMPLIANCE_TARGET_SECONDS as f64,
            })
        };

        let avg_response_ms = response_time.as_ref().map_or(0.0, |r| r.average_ms);
        let signatures_verified = recent.iter().filter(|i| self.verify_intervention(i)).count();

        EffectivenessReport {
            period_days,
            total_interventions: total,
            by_type,
            by_role,
            total_overrides: overrides,
            total_approvals: approvals,
            override_rate_percent: override_rate,
            interpretation: interpret_override_rate(override_rate),
            response_time,
            compliance_assessment: assess_compliance(override_rate, avg_response_ms),
            all_signed: total > 0 && recent.iter().all(|i| i.signature.is_some()),
            signatures_verified,
            verification_rate_percent: if total > 0 { signatures_verified as f64 / total as f64 * 100.0 } else { 0.0 },
        }
    }

    pub fn simulate_escalation(
        &self,
        decision_class: &str,
        current_role: OversightRole,
    ) -> Result<EscalationSimulation, ValidationError> {
        let paths = self.escalation_paths.read();
        let path = paths.get(decision_class).ok_or_else(|| ValidationError::Field {
            field: "decision_class".to_string(),
            reason: format!("no escalation path defined for '{decision_class}'"),
        })?;

        let current_index = path.roles.iter().position(|r| *r == current_role).ok_or_else(|| ValidationError::Field {
            field: "current_role".to_string(),
            reason: format!("role not in escalation chain for '{decision_class}'"),
        })?;

        Ok(EscalationSimulation {
            decision_class: decision_class.to_string(),
            current_role,
            can_approve: current_role == path.requires_approval_from,
            requires_approval_from: path.requires_approval_from,
            next_escalation: path.roles.get(current_index + 1).copied(),
            max_response_time_minutes: path.max_response_time_minutes,
            full_escalation_chain: path.roles.clone(),
        })
    }

    pub fn interventions_in_range(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Vec<HumanIntervention> {
        self.interventions
            .read()
            .iter()
            .filter(|i| start.map_or(true, |s| i.timestamp >= s))
            .filter(|i| end.map_or(true, |e| i.timestamp <= e))
            .cloned()
            .collect()
    }
}
