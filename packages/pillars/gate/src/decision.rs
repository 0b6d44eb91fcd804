//! C4 — Decision Service: orchestrates C1/C2/C3/C9 into a single governed
//! decision.
//!
//! No `decision_service.py` exists in the source this crate was ported
//! from (only `models/decision.py` and its test suite reference one), so
//! the orchestration shape — accumulate intermediate state, compute a
//! latency breakdown, emit one structured `tracing::info!` line at the
//! end — follows `engine.rs::GateEngine::verify`, generalized from its
//! symbolic/neural two-phase evaluation to the policy/ledger/signature
//! pipeline this spec calls for.

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::identity::{hex_sha256, IdentityKey};
use crate::ids::new_decision_id;
use crate::ledger::{Ledger, LedgerEntry};
use crate::policy::PolicyEngine;
use crate::responsibility::{DecisionMaker, ResponsibilityLevel, ResponsibilityTracker};
use crate::types::JsonValue;

/// Upper bound on the serialized size of `DecisionRequest.context`, beyond
/// which a request is rejected before policy evaluation ever runs.
const MAX_CONTEXT_BYTES: usize = 64 * 1024;

/// Capability tokens never outlive this, regardless of what a caller asks
/// for (§4.4 step 4: "bounded ≤ 1h").
const MAX_TOKEN_TTL_SECONDS: i64 = 3600;
const DEFAULT_TOKEN_TTL_SECONDS: i64 = 900;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub actor: String,
    pub action: String,
    pub tool: String,
    pub user_intent: String,
    #[serde(default)]
    pub data_classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_token_ttl_seconds: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionVerdict {
    Permit,
    Deny,
}

/// A time-bounded, scope-frozen permission minted on `permit`. Carries no
/// more authority than the request it was minted from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub token_id: String,
    pub actor: String,
    pub action: String,
    pub tool: String,
    pub data_classes: Vec<String>,
    pub granted_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub request_id: String,
    pub decision: DecisionVerdict,
    pub reasoning: String,
    pub policy_version_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_token: Option<CapabilityToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_entry_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// `decision_hash = SHA256(request_id || decision || policy_version_hash ||
/// timestamp)` (§4.4 step 6) — the exact preimage signed via C1 and the one
/// `verify_decision` recomputes.
fn decision_hash(
    request_id: &str,
    decision: DecisionVerdict,
    policy_version_hash: &str,
    timestamp: &DateTime<Utc>,
) -> String {
    let decision_str = match decision {
        DecisionVerdict::Permit => "permit",
        DecisionVerdict::Deny => "deny",
    };
    let preimage = format!("{request_id}{decision_str}{policy_version_hash}{}", timestamp.to_rfc3339());
    hex_sha256(preimage.as_bytes())
}

/// Result of `VerifyDecision` (§6.1): whether the signature over a
/// decision's `decision_hash` checks out, alongside the ledger entry it was
/// recomputed against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<LedgerEntry>,
}

fn validate_request(req: &DecisionRequest) -> Result<(), GateError> {
    if req.actor.trim().is_empty() {
        return Err(GateError::Validation(crate::error::ValidationError::Field {
            field: "actor".to_string(),
            reason: "must not be empty".to_string(),
        }));
    }
    if req.action.trim().is_empty() {
        return Err(GateError::Validation(crate::error::ValidationError::Field {
            field: "action".to_string(),
            reason: "must not be empty".to_string(),
        }));
    }
    if req.tool.trim().is_empty() {
        return Err(GateError::Validation(crate::error::ValidationError::Field {
            field: "tool".to_string(),
            reason: "must not be empty".to_string(),
        }));
    }
    if req.user_intent.trim().is_empty() {
        return Err(GateError::Validation(crate::error::ValidationError::Field {
            field: "user_intent".to_string(),
            reason: "must not be empty".to_string(),
        }));
    }
    if let Some(level) = req.risk_level {
        if !(1..=5).contains(&level) {
            return Err(GateError::Validation(crate::error::ValidationError::Field {
                field: "risk_level".to_string(),
                reason: format!("must be in [1,5], got {level}"),
            }));
        }
    }
    if req.data_classes.iter().any(|c| c.trim().is_empty()) {
        return Err(GateError::Validation(crate::error::ValidationError::Field {
            field: "data_classes".to_string(),
            reason: "entries must not be empty strings".to_string(),
        }));
    }
    if let Some(context) = &req.context {
        let size = serde_json::to_vec(context)
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX);
        if size > MAX_CONTEXT_BYTES {
            return Err(GateError::Validation(crate::error::ValidationError::Field {
                field: "context".to_string(),
                reason: format!("serialized context is {size} bytes, exceeds {MAX_CONTEXT_BYTES}"),
            }));
        }
    }
    Ok(())
}

fn token_ttl(requested: Option<i64>) -> Duration {
    let seconds = requested
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_TOKEN_TTL_SECONDS)
        .min(MAX_TOKEN_TTL_SECONDS);
    Duration::seconds(seconds)
}

/// Wires C1 (identity), C2 (ledger), C3 (policy), C9 (responsibility) into
/// the single `evaluate_request` operation every other component's output
/// (risk, escalation, override, evidence) is ultimately anchored to by
/// `decision_id`.
pub struct DecisionService {
    policy: std::sync::Arc<PolicyEngine>,
    ledger: std::sync::Arc<Ledger>,
    responsibility: std::sync::Arc<ResponsibilityTracker>,
    signing_key: Option<IdentityKey>,
}

impl DecisionService {
    pub fn new(
        policy: std::sync::Arc<PolicyEngine>,
        ledger: std::sync::Arc<Ledger>,
        responsibility: std::sync::Arc<ResponsibilityTracker>,
        signing_key: Option<IdentityKey>,
    ) -> Self {
        Self {
            policy,
            ledger,
            responsibility,
            signing_key,
        }
    }

    /// §4.4's eight-step algorithm. Ledger-append failure is fatal and
    /// propagates (no token is minted, nothing is returned to the caller).
    /// Signing failure downgrades the response to unsigned; the absence of
    /// `signature` is the caller-visible signal, not a hidden retry.
    pub async fn evaluate_request(&self, req: DecisionRequest) -> Result<DecisionResponse, GateError> {
        let start = Instant::now();
        validate_request(&req)?;

        let request_id = new_decision_id();
        let policy_version_hash = self
            .policy
            .policy_hash()
            .ok_or(crate::error::PolicyError::NoActivePolicy)?;

        let policy_decision = self
            .policy
            .evaluate(&req.actor, &req.action, &req.data_classes, req.risk_level);

        let verdict = if policy_decision.allowed {
            DecisionVerdict::Permit
        } else {
            DecisionVerdict::Deny
        };

        let capability_token = if verdict == DecisionVerdict::Permit {
            let granted_at = Utc::now();
            Some(CapabilityToken {
                token_id: format!("cap_{}", uuid::Uuid::new_v4()),
                actor: req.actor.clone(),
                action: req.action.clone(),
                tool: req.tool.clone(),
                data_classes: req.data_classes.clone(),
                granted_at,
                expiry: granted_at + token_ttl(req.requested_token_ttl_seconds),
            })
        } else {
            None
        };

        let ledger_data = serde_json::json!({
            "request_id": request_id,
            "decision_id": request_id,
            "decision": match verdict { DecisionVerdict::Permit => "permit", DecisionVerdict::Deny => "deny" },
            "actor": req.actor,
            "action": req.action,
            "policy_version_hash": policy_version_hash,
            "risk_level": req.risk_level,
        });
        // Ledger-append failure is fatal: propagate with `?`, nothing below runs.
        let ledger_entry = self.ledger.append("decision", ledger_data, None).await?;

        let timestamp = Utc::now();
        let hash = decision_hash(&request_id, verdict, &policy_version_hash, &timestamp);
        let signature = match &self.signing_key {
            Some(key) => match key.sign(&hash) {
                Ok(sig) => Some(sig),
                Err(err) => {
                    tracing::warn!(request_id = %request_id, error = %err, "decision signing failed; returning unsigned");
                    None
                }
            },
            None => None,
        };

        let confidence = if policy_decision.allowed { 0.9 } else { 0.95 };
        self.responsibility.record_responsibility(
            &request_id,
            DecisionMaker::AiSystem,
            "gate-decision-service",
            "automated-policy-evaluation",
            &policy_decision.reason,
            confidence,
            ResponsibilityLevel::Automated,
            None,
            false,
            false,
        );

        let response = DecisionResponse {
            request_id: request_id.clone(),
            decision: verdict,
            reasoning: policy_decision.reason,
            policy_version_hash,
            capability_token,
            ledger_entry_hash: Some(ledger_entry.entry_hash),
            signature,
            timestamp,
        };

        tracing::info!(
            request_id = %response.request_id,
            actor = %req.actor,
            action = %req.action,
            decision = ?response.decision,
            signed = response.signature.is_some(),
            latency_us = start.elapsed().as_micros() as u64,
            "decision evaluated"
        );

        Ok(response)
    }

    /// `VerifyDecision` (§6.1): recompute `decision_hash` from the response
    /// and check it against the configured signer, looking up the ledger
    /// entry it was appended as.
    pub async fn verify_decision(&self, response: &DecisionResponse) -> Result<VerifyResult, GateError> {
        let entry = self.ledger.get_decision_entry(&response.request_id).await?;

        let signature = match &response.signature {
            Some(sig) => sig,
            None => return Ok(VerifyResult { verified: false, entry: Some(entry) }),
        };
        let key = match &self.signing_key {
            Some(key) => key,
            None => return Ok(VerifyResult { verified: false, entry: Some(entry) }),
        };

        let hash = decision_hash(&response.request_id, response.decision, &response.policy_version_hash, &response.timestamp);
        let verified = crate::identity::verify(&hash, signature, &key.verifying_key_b64()).is_ok();
        Ok(VerifyResult { verified, entry: Some(entry) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Policy, PolicyMode, Relation, RelationType, Term, TermType};
    use std::sync::Arc;

    fn term(id: &str, term_type: TermType) -> Term {
        Term {
            id: id.to_string(),
            term_type,
            name: id.to_string(),
            description: None,
            attributes: None,
        }
    }

    async fn service_with_policy(mode: PolicyMode, permit: bool) -> DecisionService {
        let policy = Arc::new(PolicyEngine::new());
        let relations = if permit {
            vec![Relation {
                relation_type: RelationType::Permits,
                subject: "act_ai_agent:claude".to_string(),
                action: "axn_execute:search".to_string(),
                object: None,
                conditions: None,
                justification: None,
            }]
        } else {
            vec![]
        };
        policy
            .load_policy(Policy {
                policy_id: "pol_default_v1".to_string(),
                name: "default".to_string(),
                version: "1.0.0".to_string(),
                mode,
                terms: vec![
                    term("act_ai_agent:claude", TermType::Actor),
                    term("axn_execute:search", TermType::Action),
                ],
                relations,
                description: None,
                compliance_frameworks: None,
                constraints: None,
                effective_from: None,
                effective_until: None,
                metadata: None,
            })
            .unwrap();

        let ledger = Arc::new(Ledger::new(Arc::new(crate::ledger::InMemoryLedgerStore::default())));
        let responsibility = Arc::new(ResponsibilityTracker::new());
        DecisionService::new(policy, ledger, responsibility, Some(IdentityKey::generate().unwrap()))
    }

    fn request() -> DecisionRequest {
        DecisionRequest {
            actor: "act_ai_agent:claude".to_string(),
            action: "axn_execute:search".to_string(),
            tool: "web_search".to_string(),
            user_intent: "research".to_string(),
            data_classes: vec![],
            risk_level: Some(1),
            context: None,
            requested_token_ttl_seconds: None,
        }
    }

    #[tokio::test]
    async fn permit_mints_capability_token_and_signs() {
        let svc = service_with_policy(PolicyMode::Strict, true).await;
        let resp = svc.evaluate_request(request()).await.unwrap();
        assert_eq!(resp.decision, DecisionVerdict::Permit);
        assert!(resp.capability_token.is_some());
        assert!(resp.signature.is_some());
        assert!(resp.ledger_entry_hash.is_some());
    }

    #[tokio::test]
    async fn deny_mints_no_token_but_still_ledgers() {
        let svc = service_with_policy(PolicyMode::Strict, false).await;
        let resp = svc.evaluate_request(request()).await.unwrap();
        assert_eq!(resp.decision, DecisionVerdict::Deny);
        assert!(resp.capability_token.is_none());
        assert!(resp.ledger_entry_hash.is_some());
    }

    #[tokio::test]
    async fn rejects_empty_actor() {
        let svc = service_with_policy(PolicyMode::Strict, true).await;
        let mut req = request();
        req.actor = String::new();
        assert!(svc.evaluate_request(req).await.is_err());
    }

    #[tokio::test]
    async fn rejects_out_of_range_risk_level() {
        let svc = service_with_policy(PolicyMode::Strict, true).await;
        let mut req = request();
        req.risk_level = Some(9);
        assert!(svc.evaluate_request(req).await.is_err());
    }

    #[tokio::test]
    async fn token_ttl_capped_at_one_hour() {
        let svc = service_with_policy(PolicyMode::Strict, true).await;
        let mut req = request();
        req.requested_token_ttl_seconds = Some(10_000);
        let resp = svc.evaluate_request(req).await.unwrap();
        let token = resp.capability_token.unwrap();
        assert!(token.expiry - token.granted_at <= Duration::seconds(MAX_TOKEN_TTL_SECONDS));
    }

    #[tokio::test]
    async fn records_responsibility_for_every_decision() {
        let svc = service_with_policy(PolicyMode::Strict, true).await;
        let resp = svc.evaluate_request(request()).await.unwrap();
        let chain = svc.responsibility.chain_for_decision(&resp.request_id);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].decision_maker, DecisionMaker::AiSystem);
    }

    #[tokio::test]
    async fn verify_decision_confirms_signature_over_decision_hash() {
        let svc = service_with_policy(PolicyMode::Strict, true).await;
        let resp = svc.evaluate_request(request()).await.unwrap();
        let result = svc.verify_decision(&resp).await.unwrap();
        assert!(result.verified);
        assert!(result.entry.is_some());
    }

    #[tokio::test]
    async fn verify_decision_rejects_tampered_response() {
        let svc = service_with_policy(PolicyMode::Strict, true).await;
        let mut resp = svc.evaluate_request(request()).await.unwrap();
        resp.decision = DecisionVerdict::Deny;
        let result = svc.verify_decision(&resp).await.unwrap();
        assert!(!result.verified);
    }
}
