//! C5 — Risk Service: deterministic weighted risk scoring.
//!
//! Directly adapted from `original_source/src/lexecon/risk/service.py`:
//! same six dimensions and default weights, same threshold bands, same
//! one-risk-per-decision enforcement via a decision→risk index.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::RiskWeights;
use crate::error::RiskError;
use crate::evidence::{ArtifactType, EvidenceService};
use crate::ids::new_risk_id;
use crate::types::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskDimensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operational: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reputational: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial: Option<f64>,
}

impl RiskDimensions {
    fn populated_with_weights(&self, weights: &RiskWeights) -> Vec<(f64, f64)> {
        let pairs = [
            (self.security, weights.security),
            (self.privacy, weights.privacy),
            (self.compliance, weights.compliance),
            (self.operational, weights.operational),
            (self.reputational, weights.reputational),
            (self.financial, weights.financial),
        ];
        pairs
            .into_iter()
            .filter_map(|(v, w)| v.map(|v| (v, w)))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub weight: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub risk_id: String,
    pub decision_id: String,
    pub overall_score: u8,
    pub risk_level: RiskLevel,
    pub dimensions: RiskDimensions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<u8>,
    #[serde(default)]
    pub factors: Vec<RiskFactor>,
    #[serde(default)]
    pub mitigations_applied: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, JsonValue>>,
}

pub fn determine_risk_level(score: u8) -> RiskLevel {
    match score {
        0..=29 => RiskLevel::Low,
        30..=59 => RiskLevel::Medium,
        60..=79 => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

fn calculate_overall_score(dimensions: &RiskDimensions, weights: &RiskWeights) -> Option<u8> {
    let populated = dimensions.populated_with_weights(weights);
    if populated.is_empty() {
        return None;
    }
    let weight_sum: f64 = populated.iter().map(|(_, w)| w).sum();
    if weight_sum <= 0.0 {
        return None;
    }
    let weighted: f64 = populated.iter().map(|(v, w)| v * w).sum();
    Some((weighted / weight_sum).round().clamp(0.0, 100.0) as u8)
}

pub struct RiskService {
    weights: RiskWeights,
    risks: RwLock<HashMap<String, Risk>>,
    by_decision: RwLock<HashMap<String, String>>,
    evidence: Arc<EvidenceService>,
}

impl RiskService {
    pub fn new(weights: RiskWeights, evidence: Arc<EvidenceService>) -> Result<Self, RiskError> {
        let sum = weights.sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(RiskError::InvalidWeights(sum));
        }
        Ok(Self {
            weights,
            risks: RwLock::new(HashMap::new()),
            by_decision: RwLock::new(HashMap::new()),
            evidence,
        })
    }

    pub fn assess_risk(
        &self,
        decision_id: &str,
        dimensions: RiskDimensions,
        likelihood: Option<f64>,
        impact: Option<u8>,
        factors: Vec<RiskFactor>,
        mitigations_applied: Vec<String>,
    ) -> Result<Risk, RiskError> {
        if self.by_decision.read().contains_key(decision_id) {
            return Err(RiskError::AlreadyAssessed(decision_id.to_string()));
        }

        let overall_score = calculate_overall_score(&dimensions, &self.weights).unwrap_or(0);
        let risk_level = determine_risk_level(overall_score);
        let risk = Risk {
            risk_id: new_risk_id(decision_id),
            decision_id: decision_id.to_string(),
            overall_score,
            risk_level,
            dimensions,
            likelihood,
            impact,
            factors,
            mitigations_applied,
            timestamp: Utc::now(),
            metadata: None,
        };

        self.risks.write().insert(risk.risk_id.clone(), risk.clone());
        self.by_decision
            .write()
            .insert(decision_id.to_string(), risk.risk_id.clone());

        // §4.5: every assessment emits a DECISION_LOG artifact linked back to
        // the decision. Storage failure doesn't unwind the assessment.
        let content = serde_json::to_vec(&risk).unwrap_or_default();
        if let Err(err) = self.evidence.store_artifact(
            ArtifactType::DecisionLog,
            &content,
            "risk-service",
            Some("application/json".to_string()),
            vec![decision_id.to_string()],
            vec![],
            None,
        ) {
            tracing::warn!(decision_id, error = %err, "failed to emit DECISION_LOG evidence artifact for risk assessment");
        }

        Ok(risk)
    }

    pub fn get_risk(&self, risk_id: &str) -> Result<Risk, RiskError> {
        self.risks
            .read()
            .get(risk_id)
            .cloned()
            .ok_or_else(|| RiskError::NotFound(risk_id.to_string()))
    }

    pub fn get_risk_for_decision(&self, decision_id: &str) -> Option<Risk> {
        let risk_id = self.by_decision.read().get(decision_id).cloned()?;
        self.risks.read().get(&risk_id).cloned()
    }

    /// Sorted by `overall_score` descending, per §4.5.
    pub fn list_risks(&self, min_score: Option<u8>, risk_level: Option<RiskLevel>, limit: usize) -> Vec<Risk> {
        let mut risks: Vec<Risk> = self
            .risks
            .read()
            .values()
            .filter(|r| min_score.map_or(true, |min| r.overall_score >= min))
            .filter(|r| risk_level.map_or(true, |lvl| r.risk_level == lvl))
            .cloned()
            .collect();
        risks.sort_by(|a, b| b.overall_score.cmp(&a.overall_score));
        risks.truncate(limit.max(1));
        risks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> RiskService {
        RiskService::new(RiskWeights::default(), Arc::new(EvidenceService::new(1024 * 1024, Default::default()))).unwrap()
    }

    #[test]
    fn weighted_score_matches_default_weights() {
        let svc = service();
        let dims = RiskDimensions {
            security: Some(80.0),
            privacy: Some(40.0),
            ..Default::default()
        };
        let risk = svc
            .assess_risk("dec_1", dims, None, None, vec![], vec![])
            .unwrap();
        // (80*.25 + 40*.20) / (.25+.20) = 36/0.45 = 62.22 -> 62
        assert_eq!(risk.overall_score, 62);
        assert_eq!(risk.risk_level, RiskLevel::High);
    }

    #[test]
    fn empty_dimensions_score_zero_low() {
        let svc = service();
        let risk = svc
            .assess_risk("dec_1", RiskDimensions::default(), None, None, vec![], vec![])
            .unwrap();
        assert_eq!(risk.overall_score, 0);
        assert_eq!(risk.risk_level, RiskLevel::Low);
    }

    #[test]
    fn one_risk_per_decision_enforced() {
        let svc = service();
        svc.assess_risk("dec_1", RiskDimensions::default(), None, None, vec![], vec![])
            .unwrap();
        let second = svc.assess_risk("dec_1", RiskDimensions::default(), None, None, vec![], vec![]);
        assert!(matches!(second, Err(RiskError::AlreadyAssessed(_))));
    }

    #[test]
    fn thresholds_at_boundaries() {
        assert_eq!(determine_risk_level(29), RiskLevel::Low);
        assert_eq!(determine_risk_level(30), RiskLevel::Medium);
        assert_eq!(determine_risk_level(59), RiskLevel::Medium);
        assert_eq!(determine_risk_level(60), RiskLevel::High);
        assert_eq!(determine_risk_level(79), RiskLevel::High);
        assert_eq!(determine_risk_level(80), RiskLevel::Critical);
    }

    #[test]
    fn list_risks_sorted_descending_and_limited() {
        let svc = service();
        svc.assess_risk(
            "dec_1",
            RiskDimensions {
                security: Some(10.0),
                ..Default::default()
            },
            None,
            None,
            vec![],
            vec![],
        )
        .unwrap();
        svc.assess_risk(
            "dec_2",
            RiskDimensions {
                security: Some(90.0),
                ..Default::default()
            },
            None,
            None,
            vec![],
            vec![],
        )
        .unwrap();
        let risks = svc.list_risks(None, None, 1);
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].decision_id, "dec_2");
    }

    #[test]
    fn rejects_invalid_weights_at_construction() {
        let mut weights = RiskWeights::default();
        weights.security = 0.9;
        let evidence = Arc::new(EvidenceService::new(1024 * 1024, Default::default()));
        assert!(RiskService::new(weights, evidence).is_err());
    }

    #[test]
    fn assess_risk_emits_decision_log_evidence_artifact() {
        let evidence = Arc::new(EvidenceService::new(1024 * 1024, Default::default()));
        let svc = RiskService::new(RiskWeights::default(), evidence.clone()).unwrap();
        svc.assess_risk("dec_evidence", RiskDimensions::default(), None, None, vec![], vec![])
            .unwrap();
        let lineage = evidence.export_artifact_lineage("dec_evidence");
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].artifact_type, ArtifactType::DecisionLog);
    }
}
