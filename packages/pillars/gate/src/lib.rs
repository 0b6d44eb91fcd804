//! gatekeeper-core: a runtime governance gateway for AI actions.
//!
//! Every governed action flows through the same pipeline: C3 (policy) decides,
//! C1 (identity) signs, C2 (ledger) records, C9 (responsibility) attributes.
//! C5/C6/C7/C8 (risk/escalation/override/evidence) attach to a decision after
//! the fact; C10/C11/C12 (export/retention/oversight) operate over the
//! resulting history. `Core` wires these together at construction time —
//! there are no package-level singletons, matching `engine.rs::GateEngine`'s
//! constructor-owned state.

pub mod audit_export;
pub mod config;
pub mod decision;
pub mod error;
pub mod escalation;
pub mod evidence;
pub mod identity;
pub mod ids;
pub mod ledger;
pub mod override_service;
pub mod oversight;
pub mod policy;
pub mod responsibility;
pub mod retention;
pub mod risk;
pub mod types;

use std::fs;
use std::sync::Arc;

use crate::audit_export::AuditExportService;
use crate::config::GateConfig;
use crate::decision::DecisionService;
use crate::error::GateError;
use crate::escalation::EscalationService;
use crate::evidence::EvidenceService;
use crate::identity::IdentityKey;
use crate::ledger::{InMemoryLedgerStore, Ledger, LedgerStore};
use crate::override_service::OverrideService;
use crate::oversight::OversightService;
use crate::policy::PolicyEngine;
use crate::responsibility::ResponsibilityTracker;
use crate::retention::RetentionService;
use crate::risk::RiskService;

/// The assembled governance core: one instance per process, constructed
/// once at startup and shared (behind `Arc`) across inbound request tasks.
pub struct Core {
    pub config: GateConfig,
    pub signing_key: Arc<IdentityKey>,
    pub ledger: Arc<Ledger>,
    pub policy: Arc<PolicyEngine>,
    pub risk: Arc<RiskService>,
    pub escalation: Arc<EscalationService>,
    pub override_service: Arc<OverrideService>,
    pub evidence: Arc<EvidenceService>,
    pub responsibility: Arc<ResponsibilityTracker>,
    pub decision: Arc<DecisionService>,
    pub audit_export: Arc<AuditExportService>,
    pub retention: Arc<RetentionService>,
    pub oversight: Arc<OversightService>,
}

impl Core {
    /// Validate `config`, load or generate the signing key, stand up the
    /// ledger store (SQL-backed when `config.sql_database_url` is set, else
    /// in-memory), and wire every component. Fails fast on any
    /// construction-time error rather than at first use.
    pub async fn new(config: GateConfig) -> Result<Self, GateError> {
        config.validate().map_err(GateError::from)?;

        let signing_key = Arc::new(Self::load_or_generate_key(&config)?);

        let store: Arc<dyn LedgerStore> = match &config.sql_database_url {
            #[cfg(feature = "sql")]
            Some(url) => Arc::new(crate::ledger::SqlLedgerStore::connect(url).await.map_err(GateError::from)?),
            #[cfg(not(feature = "sql"))]
            Some(_) => {
                return Err(GateError::Persistence(
                    "sql_database_url configured but the 'sql' feature is disabled".to_string(),
                ))
            }
            None => Arc::new(InMemoryLedgerStore::default()),
        };
        let ledger = Arc::new(Ledger::new(store));

        let policy = Arc::new(PolicyEngine::new());
        let evidence = Arc::new(EvidenceService::new(
            config.max_evidence_content_bytes,
            config.evidence_retention_days_by_type.clone(),
        ));
        let risk = Arc::new(
            RiskService::new(config.risk_weights.clone(), evidence.clone()).map_err(GateError::from)?,
        );
        let escalation = Arc::new(EscalationService::new(
            config.escalation_sla.clone(),
            config.default_escalation_recipients.clone(),
            evidence.clone(),
        ));
        let override_service = Arc::new(OverrideService::new(evidence.clone()));
        let responsibility = Arc::new(ResponsibilityTracker::new());
        let audit_export = Arc::new(AuditExportService::new());
        let retention = Arc::new(RetentionService::new());
        let oversight = Arc::new(OversightService::new(Some((*signing_key).clone())));

        let decision = Arc::new(DecisionService::new(
            policy.clone(),
            ledger.clone(),
            responsibility.clone(),
            Some((*signing_key).clone()),
        ));

        Ok(Self {
            config,
            signing_key,
            ledger,
            policy,
            risk,
            escalation,
            override_service,
            evidence,
            responsibility,
            decision,
            audit_export,
            retention,
            oversight,
        })
    }

    fn load_or_generate_key(config: &GateConfig) -> Result<IdentityKey, GateError> {
        match &config.signing_key_path {
            Some(path) => {
                let bytes = fs::read(path)
                    .map_err(|e| GateError::Persistence(format!("reading signing key '{path}': {e}")))?;
                let seed: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| GateError::Persistence(format!("signing key '{path}' must be exactly 32 bytes")))?;
                Ok(IdentityKey::from_bytes(&seed))
            }
            None => IdentityKey::generate().map_err(GateError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> GateConfig {
        GateConfig {
            default_escalation_recipients: vec!["security-team".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn core_constructs_with_default_config() {
        let core = Core::new(valid_config()).await.unwrap();
        assert!(core.policy.policy_hash().is_none());
    }

    #[tokio::test]
    async fn core_rejects_invalid_config_before_wiring_anything() {
        let mut config = valid_config();
        config.risk_weights.security = 0.9;
        assert!(Core::new(config).await.is_err());
    }
}
