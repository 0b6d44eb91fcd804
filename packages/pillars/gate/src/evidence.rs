//! C8 — Evidence Service: content-addressed, immutable artifact store.
//!
//! Directly adapted from `original_source/src/lexecon/evidence/service.py`
//! and `evidence/append_only_store.py` (ID scheme, `MAX_CONTENT_SIZE`,
//! retention-by-type defaults, once-only signing) with field names from
//! `model_governance_pack/models/evidence_artifact.py`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::EvidenceError;
use crate::ids::new_evidence_id;
use crate::ledger::hash_bytes;
use crate::types::JsonValue;

pub const MAX_CONTENT_SIZE: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    DecisionLog,
    PolicySnapshot,
    ContextCapture,
    Screenshot,
    Attestation,
    Signature,
    AuditTrail,
    ExternalReport,
}

impl ArtifactType {
    fn slug(self) -> &'static str {
        match self {
            ArtifactType::DecisionLog => "decision_log",
            ArtifactType::PolicySnapshot => "policy_snapshot",
            ArtifactType::ContextCapture => "context_capture",
            ArtifactType::Screenshot => "screenshot",
            ArtifactType::Attestation => "attestation",
            ArtifactType::Signature => "signature",
            ArtifactType::AuditTrail => "audit_trail",
            ArtifactType::ExternalReport => "external_report",
        }
    }

    fn default_retention_days(self) -> u32 {
        match self {
            ArtifactType::DecisionLog
            | ArtifactType::PolicySnapshot
            | ArtifactType::Attestation
            | ArtifactType::AuditTrail
            | ArtifactType::ExternalReport => 365 * 7,
            ArtifactType::Signature => 365 * 10,
            ArtifactType::Screenshot | ArtifactType::ContextCapture => 365,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalSignature {
    pub algorithm: String,
    pub signature: String,
    pub signer_id: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceArtifact {
    pub artifact_id: String,
    pub artifact_type: ArtifactType,
    pub sha256_hash: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub size_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
    #[serde(default)]
    pub related_decision_ids: Vec<String>,
    #[serde(default)]
    pub related_control_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digital_signature: Option<DigitalSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_until: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_immutable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, JsonValue>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceStatistics {
    pub total: usize,
    pub by_type: HashMap<String, usize>,
    pub signed: usize,
    pub unsigned: usize,
}

/// Wraps a keyed map so that once a key is inserted, it can never be
/// reassigned or removed. Signing bypasses this wrapper deliberately — it's
/// a schema-level addendum, not a content mutation (§4.8). Toggled on/off
/// per deployment; disabled mode is a transparent passthrough.
struct AppendOnlyStore<V> {
    enabled: bool,
    items: HashMap<String, V>,
}

impl<V: Clone> AppendOnlyStore<V> {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            items: HashMap::new(),
        }
    }

    fn insert(&mut self, key: String, value: V) -> Result<(), EvidenceError> {
        if self.enabled && self.items.contains_key(&key) {
            return Err(EvidenceError::AppendOnlyViolation(key));
        }
        self.items.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<&V> {
        self.items.get(key)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.items.get_mut(key)
    }

    fn values(&self) -> impl Iterator<Item = &V> {
        self.items.values()
    }
}

pub struct EvidenceService {
    max_content_size: usize,
    retention_overrides: HashMap<String, u32>,
    store: RwLock<AppendOnlyStore<EvidenceArtifact>>,
    by_decision: RwLock<HashMap<String, Vec<String>>>,
    by_control: RwLock<HashMap<String, Vec<String>>>,
    by_type: RwLock<HashMap<String, Vec<String>>>,
}

impl EvidenceService {
    pub fn new(max_content_size: usize, retention_overrides: HashMap<String, u32>) -> Self {
        Self {
            max_content_size,
            retention_overrides,
            store: RwLock::new(AppendOnlyStore::new(true)),
            by_decision: RwLock::new(HashMap::new()),
            by_control: RwLock::new(HashMap::new()),
            by_type: RwLock::new(HashMap::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn store_artifact(
        &self,
        artifact_type: ArtifactType,
        content: &[u8],
        source: &str,
        content_type: Option<String>,
        related_decision_ids: Vec<String>,
        related_control_ids: Vec<String>,
        retention_override: Option<u32>,
    ) -> Result<EvidenceArtifact, EvidenceError> {
        if content.len() > self.max_content_size {
            return Err(EvidenceError::ContentTooLarge {
                size: content.len(),
                max: self.max_content_size,
            });
        }

        let sha256_hash = hash_bytes(content);
        let retention_days = retention_override
            .or_else(|| self.retention_overrides.get(artifact_type.slug()).copied())
            .unwrap_or_else(|| artifact_type.default_retention_days());
        let created_at = Utc::now();

        let artifact = EvidenceArtifact {
            artifact_id: new_evidence_id(artifact_type.slug()),
            artifact_type,
            sha256_hash,
            created_at,
            source: source.to_string(),
            content_type,
            size_bytes: content.len(),
            storage_uri: None,
            related_decision_ids: related_decision_ids.clone(),
            related_control_ids: related_control_ids.clone(),
            digital_signature: None,
            retention_until: Some(created_at + Duration::days(retention_days as i64)),
            is_immutable: true,
            metadata: None,
        };

        self.store
            .write()
            .insert(artifact.artifact_id.clone(), artifact.clone())?;

        for decision_id in &related_decision_ids {
            self.by_decision
                .write()
                .entry(decision_id.clone())
                .or_default()
                .push(artifact.artifact_id.clone());
        }
        for control_id in &related_control_ids {
            self.by_control
                .write()
                .entry(control_id.clone())
                .or_default()
                .push(artifact.artifact_id.clone());
        }
        self.by_type
            .write()
            .entry(artifact_type.slug().to_string())
            .or_default()
            .push(artifact.artifact_id.clone());

        Ok(artifact)
    }

    pub fn get_artifact(&self, artifact_id: &str) -> Result<EvidenceArtifact, EvidenceError> {
        self.store
            .read()
            .get(artifact_id)
            .cloned()
            .ok_or_else(|| EvidenceError::NotFound(artifact_id.to_string()))
    }

    pub fn verify_artifact_integrity(&self, artifact_id: &str, content: &[u8]) -> Result<bool, EvidenceError> {
        let artifact = self.get_artifact(artifact_id)?;
        Ok(hash_bytes(content) == artifact.sha256_hash)
    }

    /// Permitted only once per artifact; subsequent attempts fail.
    pub fn sign_artifact(
        &self,
        artifact_id: &str,
        signer_id: &str,
        signature: &str,
        algorithm: &str,
    ) -> Result<EvidenceArtifact, EvidenceError> {
        let mut store = self.store.write();
        let artifact = store
            .get_mut(artifact_id)
            .ok_or_else(|| EvidenceError::NotFound(artifact_id.to_string()))?;
        if artifact.digital_signature.is_some() {
            return Err(EvidenceError::AlreadySigned(artifact_id.to_string()));
        }
        artifact.digital_signature = Some(DigitalSignature {
            algorithm: algorithm.to_string(),
            signature: signature.to_string(),
            signer_id: signer_id.to_string(),
            signed_at: Utc::now(),
        });
        Ok(artifact.clone())
    }

    /// All artifacts for a decision, sorted oldest-first.
    pub fn export_artifact_lineage(&self, decision_id: &str) -> Vec<EvidenceArtifact> {
        let store = self.store.read();
        let mut artifacts: Vec<EvidenceArtifact> = self
            .by_decision
            .read()
            .get(decision_id)
            .into_iter()
            .flatten()
            .filter_map(|id| store.get(id).cloned())
            .collect();
        artifacts.sort_by_key(|a| a.created_at);
        artifacts
    }

    pub fn get_statistics(&self) -> EvidenceStatistics {
        let store = self.store.read();
        let mut by_type = HashMap::new();
        let mut signed = 0;
        let mut unsigned = 0;
        let mut total = 0;
        for artifact in store.values() {
            total += 1;
            *by_type.entry(artifact.artifact_type.slug().to_string()).or_insert(0) += 1;
            if artifact.digital_signature.is_some() {
                signed += 1;
            } else {
                unsigned += 1;
            }
        }
        EvidenceStatistics { total, by_type, signed, unsigned }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EvidenceService {
        EvidenceService::new(MAX_CONTENT_SIZE, HashMap::new())
    }

    #[test]
    fn stores_and_computes_hash() {
        let svc = service();
        let artifact = svc
            .store_artifact(ArtifactType::DecisionLog, b"hello", "decision-service", None, vec!["dec_1".into()], vec![], None)
            .unwrap();
        assert_eq!(artifact.sha256_hash, hash_bytes(b"hello"));
    }

    #[test]
    fn rejects_oversized_content() {
        let svc = EvidenceService::new(4, HashMap::new());
        let result = svc.store_artifact(ArtifactType::Screenshot, b"too big", "x", None, vec![], vec![], None);
        assert!(matches!(result, Err(EvidenceError::ContentTooLarge { .. })));
    }

    #[test]
    fn sign_artifact_once_then_fails() {
        let svc = service();
        let artifact = svc
            .store_artifact(ArtifactType::Attestation, b"payload", "override-service", None, vec![], vec![], None)
            .unwrap();
        svc.sign_artifact(&artifact.artifact_id, "signer-1", "sig", "ed25519").unwrap();
        let second = svc.sign_artifact(&artifact.artifact_id, "signer-1", "sig2", "ed25519");
        assert!(matches!(second, Err(EvidenceError::AlreadySigned(_))));
    }

    #[test]
    fn lineage_sorted_oldest_first() {
        let svc = service();
        svc.store_artifact(ArtifactType::DecisionLog, b"a", "s", None, vec!["dec_1".into()], vec![], None).unwrap();
        svc.store_artifact(ArtifactType::AuditTrail, b"b", "s", None, vec!["dec_1".into()], vec![], None).unwrap();
        let lineage = svc.export_artifact_lineage("dec_1");
        assert_eq!(lineage.len(), 2);
        assert!(lineage[0].created_at <= lineage[1].created_at);
    }

    #[test]
    fn default_retention_varies_by_type() {
        assert_eq!(ArtifactType::Signature.default_retention_days(), 3650);
        assert_eq!(ArtifactType::Screenshot.default_retention_days(), 365);
    }

    #[test]
    fn statistics_count_signed_and_unsigned() {
        let svc = service();
        let a = svc.store_artifact(ArtifactType::DecisionLog, b"a", "s", None, vec![], vec![], None).unwrap();
        svc.store_artifact(ArtifactType::AuditTrail, b"b", "s", None, vec![], vec![], None).unwrap();
        svc.sign_artifact(&a.artifact_id, "signer", "sig", "ed25519").unwrap();
        let stats = svc.get_statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.signed, 1);
        assert_eq!(stats.unsigned, 1);
    }
}
