//! C6 — Escalation Service: state machine, SLA tracking, notifications.
//!
//! Directly adapted from `original_source/src/lexecon/escalation/service.py`
//! (priority inference, SLA deadlines, dedup-by-hour warning logic, resolver
//! authorization) with field names from `model_governance_pack/models/escalation.py`.
//! The notification-artifact canonicalization defect in the source
//! (`str(dict())`) is not carried over — notifications are built as
//! `JsonValue` and would hash identically to every other artifact in the
//! crate if ever persisted as evidence (see DESIGN.md, Open Question #2).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::EscalationSla;
use crate::error::EscalationError;
use crate::evidence::{ArtifactType, EvidenceService};
use crate::ids::new_escalation_id;
use crate::risk::{Risk, RiskLevel};
use crate::types::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    RiskThreshold,
    PolicyConflict,
    ExplicitRule,
    ActorRequest,
    AnomalyDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Acknowledged,
    Resolved,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Approved,
    Denied,
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ResolutionOutcome>,
    pub resolved_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub escalation_id: String,
    pub decision_id: String,
    pub trigger: EscalationTrigger,
    pub escalated_to: Vec<String>,
    pub status: EscalationStatus,
    pub created_at: DateTime<Utc>,
    pub priority: EscalationPriority,
    pub sla_deadline: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, JsonValue>>,
}

impl Escalation {
    fn is_terminal(&self) -> bool {
        matches!(self.status, EscalationStatus::Resolved | EscalationStatus::Expired)
    }
}

/// An in-process notification event. The core never delivers these —
/// external transports subscribe to the channel returned by `subscribe()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub subject: String,
    pub message: String,
    pub priority: EscalationPriority,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

const SLA_WARNING_HOURS: i64 = 1;
const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

pub struct EscalationService {
    sla: EscalationSla,
    default_recipients: Vec<String>,
    escalations: RwLock<HashMap<String, Escalation>>,
    by_decision: RwLock<HashMap<String, Vec<String>>>,
    sla_warned_this_hour: RwLock<HashSet<(String, i64)>>,
    notification_tx: mpsc::Sender<NotificationEvent>,
    notification_rx: RwLock<Option<mpsc::Receiver<NotificationEvent>>>,
    evidence: Arc<EvidenceService>,
}

impl EscalationService {
    pub fn new(sla: EscalationSla, default_recipients: Vec<String>, evidence: Arc<EvidenceService>) -> Self {
        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            sla,
            default_recipients,
            escalations: RwLock::new(HashMap::new()),
            by_decision: RwLock::new(HashMap::new()),
            sla_warned_this_hour: RwLock::new(HashSet::new()),
            notification_tx: tx,
            notification_rx: RwLock::new(Some(rx)),
            evidence,
        }
    }

    /// Take ownership of the notification receiver. Callable once; later
    /// callers get `None`.
    pub fn subscribe(&self) -> Option<mpsc::Receiver<NotificationEvent>> {
        self.notification_rx.write().take()
    }

    fn infer_priority(trigger: EscalationTrigger) -> EscalationPriority {
        match trigger {
            EscalationTrigger::RiskThreshold => EscalationPriority::Critical,
            EscalationTrigger::PolicyConflict | EscalationTrigger::AnomalyDetected => {
                EscalationPriority::High
            }
            EscalationTrigger::ExplicitRule | EscalationTrigger::ActorRequest => {
                EscalationPriority::Medium
            }
        }
    }

    fn sla_duration(&self, priority: EscalationPriority) -> Duration {
        let minutes = match priority {
            EscalationPriority::Critical => self.sla.critical_minutes,
            EscalationPriority::High => self.sla.high_minutes,
            EscalationPriority::Medium => self.sla.medium_minutes,
            EscalationPriority::Low => self.sla.low_minutes,
        };
        Duration::minutes(minutes)
    }

    /// §4.6: every status transition emits an AUDIT_TRAIL artifact linked to
    /// the decision. Storage failure doesn't unwind the transition.
    fn emit_audit_trail(&self, escalation: &Escalation, event: &str) {
        let content = serde_json::to_vec(&serde_json::json!({
            "event": event,
            "escalation": escalation,
        }))
        .unwrap_or_default();
        if let Err(err) = self.evidence.store_artifact(
            ArtifactType::AuditTrail,
            &content,
            "escalation-service",
            Some("application/json".to_string()),
            vec![escalation.decision_id.clone()],
            vec![],
            None,
        ) {
            tracing::warn!(
                escalation_id = %escalation.escalation_id,
                event,
                error = %err,
                "failed to emit AUDIT_TRAIL evidence artifact for escalation transition"
            );
        }
    }

    fn emit(&self, subject: &str, message: String, priority: EscalationPriority) {
        let event = NotificationEvent {
            subject: subject.to_string(),
            message,
            priority,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        };
        // Bounded channel with drop-oldest backpressure: never block the
        // decision path for a slow/absent subscriber (§5, §9).
        if let Err(mpsc::error::TrySendError::Full(event)) = self.notification_tx.try_send(event) {
            warn!(subject = %event.subject, "escalation notification channel full, dropping event");
        }
    }

    pub fn create_escalation(
        &self,
        decision_id: &str,
        trigger: EscalationTrigger,
        escalated_to: Vec<String>,
        priority: Option<EscalationPriority>,
        context_summary: Option<String>,
    ) -> Result<Escalation, EscalationError> {
        self.create_escalation_with_metadata(decision_id, trigger, escalated_to, priority, context_summary, None)
    }

    fn create_escalation_with_metadata(
        &self,
        decision_id: &str,
        trigger: EscalationTrigger,
        escalated_to: Vec<String>,
        priority: Option<EscalationPriority>,
        context_summary: Option<String>,
        metadata: Option<HashMap<String, JsonValue>>,
    ) -> Result<Escalation, EscalationError> {
        let recipients = if escalated_to.is_empty() {
            if self.default_recipients.is_empty() {
                return Err(EscalationError::NoRecipients);
            }
            self.default_recipients.clone()
        } else {
            escalated_to
        };
        if recipients.is_empty() {
            return Err(EscalationError::EmptyRecipients);
        }

        let priority = priority.unwrap_or_else(|| Self::infer_priority(trigger));
        let created_at = Utc::now();
        let escalation = Escalation {
            escalation_id: new_escalation_id(decision_id),
            decision_id: decision_id.to_string(),
            trigger,
            escalated_to: recipients,
            status: EscalationStatus::Pending,
            created_at,
            priority,
            sla_deadline: created_at + self.sla_duration(priority),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolution: None,
            context_summary,
            metadata,
        };

        self.escalations
            .write()
            .insert(escalation.escalation_id.clone(), escalation.clone());
        self.by_decision
            .write()
            .entry(decision_id.to_string())
            .or_default()
            .push(escalation.escalation_id.clone());

        self.emit(
            "escalation_created",
            format!("escalation {} created for decision {}", escalation.escalation_id, decision_id),
            priority,
        );
        self.emit_audit_trail(&escalation, "escalation_created");

        Ok(escalation)
    }

    /// `auto_escalate_for_risk`: triggers iff `overall_score >= 80` or
    /// `risk_level == critical`. Sets `metadata.auto_escalated = true` so
    /// callers can distinguish this path from a manually-raised escalation
    /// without parsing `context_summary`.
    pub fn auto_escalate_for_risk(&self, risk: &Risk) -> Result<Option<Escalation>, EscalationError> {
        if risk.overall_score >= 80 || risk.risk_level == RiskLevel::Critical {
            let mut metadata = HashMap::new();
            metadata.insert("auto_escalated".to_string(), JsonValue::Bool(true));
            let escalation = self.create_escalation_with_metadata(
                &risk.decision_id,
                EscalationTrigger::RiskThreshold,
                vec![],
                None,
                Some(format!("auto-escalated: risk score {}", risk.overall_score)),
                Some(metadata),
            )?;
            Ok(Some(escalation))
        } else {
            Ok(None)
        }
    }

    pub fn acknowledge_escalation(
        &self,
        escalation_id: &str,
        actor: &str,
    ) -> Result<Escalation, EscalationError> {
        let mut escalations = self.escalations.write();
        let escalation = escalations
            .get_mut(escalation_id)
            .ok_or_else(|| EscalationError::NotFound(escalation_id.to_string()))?;

        if escalation.is_terminal() {
            return Err(EscalationError::AlreadyTerminal(escalation_id.to_string()));
        }
        if escalation.status != EscalationStatus::Pending {
            return Err(EscalationError::StatusConflict(escalation_id.to_string()));
        }

        escalation.status = EscalationStatus::Acknowledged;
        escalation.acknowledged_at = Some(Utc::now());
        escalation.acknowledged_by = Some(actor.to_string());
        let result = escalation.clone();
        drop(escalations);

        self.emit(
            "escalation_acknowledged",
            format!("escalation {escalation_id} acknowledged by {actor}"),
            result.priority,
        );
        self.emit_audit_trail(&result, "escalation_acknowledged");
        Ok(result)
    }

    pub fn resolve_escalation(
        &self,
        escalation_id: &str,
        actor: &str,
        outcome: Option<ResolutionOutcome>,
        notes: Option<String>,
    ) -> Result<Escalation, EscalationError> {
        let mut escalations = self.escalations.write();
        let escalation = escalations
            .get_mut(escalation_id)
            .ok_or_else(|| EscalationError::NotFound(escalation_id.to_string()))?;

        if escalation.is_terminal() {
            return Err(EscalationError::AlreadyTerminal(escalation_id.to_string()));
        }

        let authorized = escalation.escalated_to.iter().any(|r| r == actor)
            || escalation.acknowledged_by.as_deref() == Some(actor);
        if !authorized {
            return Err(EscalationError::ResolverNotAuthorized {
                actor: actor.to_string(),
                escalation_id: escalation_id.to_string(),
            });
        }

        escalation.status = EscalationStatus::Resolved;
        escalation.resolved_at = Some(Utc::now());
        escalation.resolution = Some(Resolution {
            outcome,
            resolved_by: actor.to_string(),
            notes,
        });
        let result = escalation.clone();
        drop(escalations);

        self.emit(
            "escalation_resolved",
            format!("escalation {escalation_id} resolved by {actor}"),
            result.priority,
        );
        self.emit_audit_trail(&result, "escalation_resolved");
        Ok(result)
    }

    pub fn get_escalation(&self, escalation_id: &str) -> Result<Escalation, EscalationError> {
        self.escalations
            .read()
            .get(escalation_id)
            .cloned()
            .ok_or_else(|| EscalationError::NotFound(escalation_id.to_string()))
    }

    pub fn get_escalations_for_decision(&self, decision_id: &str) -> Vec<Escalation> {
        let escalations = self.escalations.read();
        self.by_decision
            .read()
            .get(decision_id)
            .into_iter()
            .flatten()
            .filter_map(|id| escalations.get(id).cloned())
            .collect()
    }

    /// Scan non-terminal escalations: emit `sla_warning` within
    /// `SLA_WARNING_HOURS` of deadline (deduped to one per escalation per
    /// hour), transition to `expired` and emit `sla_exceeded` past deadline.
    pub fn check_sla_status(&self) {
        let now = Utc::now();
        let hour_bucket = now.timestamp() / 3600;

        let due_for_expiry: Vec<String> = {
            let escalations = self.escalations.read();
            escalations
                .values()
                .filter(|e| !e.is_terminal() && now >= e.sla_deadline)
                .map(|e| e.escalation_id.clone())
                .collect()
        };
        for id in due_for_expiry {
            let mut escalations = self.escalations.write();
            if let Some(escalation) = escalations.get_mut(&id) {
                if !escalation.is_terminal() {
                    escalation.status = EscalationStatus::Expired;
                    let expired = escalation.clone();
                    drop(escalations);
                    self.emit(
                        "sla_exceeded",
                        format!("escalation {id} exceeded its SLA deadline and expired"),
                        expired.priority,
                    );
                    self.emit_audit_trail(&expired, "escalation_sla_expired");
                }
            }
        }

        let approaching: Vec<(String, EscalationPriority)> = {
            let escalations = self.escalations.read();
            escalations
                .values()
                .filter(|e| !e.is_terminal())
                .filter(|e| e.sla_deadline - now <= Duration::hours(SLA_WARNING_HOURS))
                .map(|e| (e.escalation_id.clone(), e.priority))
                .collect()
        };
        for (id, priority) in approaching {
            let key = (id.clone(), hour_bucket);
            let already_warned = {
                let mut warned = self.sla_warned_this_hour.write();
                !warned.insert(key)
            };
            if !already_warned {
                self.emit(
                    "sla_warning",
                    format!("escalation {id} is within {SLA_WARNING_HOURS}h of its SLA deadline"),
                    priority,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EscalationService {
        EscalationService::new(
            EscalationSla::default(),
            vec!["security-team".to_string()],
            Arc::new(EvidenceService::new(1024 * 1024, Default::default())),
        )
    }

    #[test]
    fn create_requires_recipients_or_default() {
        let svc = service();
        let e = svc
            .create_escalation("dec_1", EscalationTrigger::ExplicitRule, vec![], None, None)
            .unwrap();
        assert_eq!(e.escalated_to, vec!["security-team".to_string()]);
    }

    #[test]
    fn no_default_recipients_fails_without_explicit() {
        let svc = EscalationService::new(
            EscalationSla::default(),
            vec![],
            Arc::new(EvidenceService::new(1024 * 1024, Default::default())),
        );
        let result = svc.create_escalation("dec_1", EscalationTrigger::ExplicitRule, vec![], None, None);
        assert!(matches!(result, Err(EscalationError::NoRecipients)));
    }

    #[test]
    fn priority_inferred_from_trigger() {
        let svc = service();
        let e = svc
            .create_escalation("dec_1", EscalationTrigger::RiskThreshold, vec!["x".into()], None, None)
            .unwrap();
        assert_eq!(e.priority, EscalationPriority::Critical);
    }

    #[test]
    fn acknowledge_then_resolve_by_acknowledger() {
        let svc = service();
        let e = svc
            .create_escalation("dec_1", EscalationTrigger::ActorRequest, vec!["reviewer".into()], None, None)
            .unwrap();
        svc.acknowledge_escalation(&e.escalation_id, "reviewer").unwrap();
        let resolved = svc
            .resolve_escalation(&e.escalation_id, "reviewer", Some(ResolutionOutcome::Approved), None)
            .unwrap();
        assert_eq!(resolved.status, EscalationStatus::Resolved);
    }

    #[test]
    fn resolve_rejects_unauthorized_actor() {
        let svc = service();
        let e = svc
            .create_escalation("dec_1", EscalationTrigger::ActorRequest, vec!["reviewer".into()], None, None)
            .unwrap();
        let result = svc.resolve_escalation(&e.escalation_id, "stranger", None, None);
        assert!(matches!(result, Err(EscalationError::ResolverNotAuthorized { .. })));
    }

    #[test]
    fn auto_escalate_triggers_on_high_score() {
        let svc = service();
        let risk = Risk {
            risk_id: "rsk_dec_1".into(),
            decision_id: "dec_1".into(),
            overall_score: 85,
            risk_level: RiskLevel::Critical,
            dimensions: crate::risk::RiskDimensions::default(),
            likelihood: None,
            impact: None,
            factors: vec![],
            mitigations_applied: vec![],
            timestamp: Utc::now(),
            metadata: None,
        };
        let result = svc.auto_escalate_for_risk(&risk).unwrap().expect("auto-escalates");
        assert_eq!(
            result.metadata.as_ref().and_then(|m| m.get("auto_escalated")),
            Some(&JsonValue::Bool(true))
        );
    }

    #[test]
    fn create_escalation_emits_audit_trail_evidence() {
        let evidence = Arc::new(EvidenceService::new(1024 * 1024, Default::default()));
        let svc = EscalationService::new(EscalationSla::default(), vec!["security-team".to_string()], evidence.clone());
        svc.create_escalation("dec_audit", EscalationTrigger::ExplicitRule, vec![], None, None)
            .unwrap();
        let lineage = evidence.export_artifact_lineage("dec_audit");
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].artifact_type, ArtifactType::AuditTrail);
    }

    #[test]
    fn resolved_escalation_rejects_further_transitions() {
        let svc = service();
        let e = svc
            .create_escalation("dec_1", EscalationTrigger::ActorRequest, vec!["reviewer".into()], None, None)
            .unwrap();
        svc.resolve_escalation(&e.escalation_id, "reviewer", None, None).unwrap();
        let result = svc.acknowledge_escalation(&e.escalation_id, "reviewer");
        assert!(matches!(result, Err(EscalationError::AlreadyTerminal(_))));
    }
}
