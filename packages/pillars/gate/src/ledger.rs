//! C2 — Ledger: an append-only, hash-chained record of every governed event.
//!
//! Each entry commits to the hash of the entry before it, so any tampering
//! with a historical entry is detectable by replaying the chain
//! (`verify_integrity`). Appends are serialized through a single
//! `tokio::sync::Mutex` — the chain has exactly one writer at a time, the
//! same single-writer discipline the registry in `connectors/registry.rs`
//! uses around its `parking_lot::RwLock`, just async-aware since appends
//! here go through a storage backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::identity::{canonical_json, hex_sha256, IdentityKey};
use crate::types::JsonValue;

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: JsonValue,
    pub previous_hash: String,
    pub entry_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl LedgerEntry {
    /// The exact pre-image hashed into `entry_hash`, per §4 of the ledger
    /// contract: `{entry_id, event_type, timestamp, data, previous_hash}`.
    fn hash_preimage(
        entry_id: &str,
        event_type: &str,
        timestamp: &DateTime<Utc>,
        data: &JsonValue,
        previous_hash: &str,
    ) -> JsonValue {
        serde_json::json!({
            "entry_id": entry_id,
            "event_type": event_type,
            "timestamp": timestamp.to_rfc3339(),
            "data": data,
            "previous_hash": previous_hash,
        })
    }
}

/// Persistence port for the ledger. The default implementation is
/// in-memory; the `sql` feature adds a `sqlx`-backed implementation for
/// SQLite/Postgres.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append(&self, entry: LedgerEntry) -> Result<(), LedgerError>;
    async fn last(&self) -> Result<Option<LedgerEntry>, LedgerError>;
    async fn all(&self) -> Result<Vec<LedgerEntry>, LedgerError>;
    async fn by_event_type(&self, event_type: &str) -> Result<Vec<LedgerEntry>, LedgerError>;
    async fn get_by_data_field(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError>;
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    entries: Mutex<Vec<LedgerEntry>>,
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn last(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.entries.lock().await.last().cloned())
    }

    async fn all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.entries.lock().await.clone())
    }

    async fn by_event_type(&self, event_type: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn get_by_data_field(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .find(|e| e.data.get(field).and_then(|v| v.as_str()) == Some(value))
            .cloned())
    }
}

#[cfg(feature = "sql")]
pub struct SqlLedgerStore {
    pool: sqlx::AnyPool,
}

#[cfg(feature = "sql")]
impl SqlLedgerStore {
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        sqlx::any::install_default_drivers();
        let pool = sqlx::AnyPool::connect(database_url)
            .await
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                entry_id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL,
                previous_hash TEXT NOT NULL,
                entry_hash TEXT NOT NULL,
                signature TEXT,
                insertion_seq INTEGER
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_event_type ON ledger_entries(event_type)")
            .execute(&pool)
            .await
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_timestamp ON ledger_entries(timestamp)")
            .execute(&pool)
            .await
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[cfg(feature = "sql")]
#[async_trait]
impl LedgerStore for SqlLedgerStore {
    async fn append(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let data = serde_json::to_string(&entry.data)
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        let seq = self.all().await?.len() as i64;
        sqlx::query(
            "INSERT INTO ledger_entries
                (entry_id, event_type, timestamp, data, previous_hash, entry_hash, signature, insertion_seq)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.entry_id)
        .bind(&entry.event_type)
        .bind(entry.timestamp.to_rfc3339())
        .bind(data)
        .bind(&entry.previous_hash)
        .bind(&entry.entry_hash)
        .bind(&entry.signature)
        .bind(seq)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        Ok(())
    }

    async fn last(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.all().await?.into_iter().last())
    }

    async fn all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        use sqlx::Row;
        let rows = sqlx::query(
            "SELECT entry_id, event_type, timestamp, data, previous_hash, entry_hash, signature
             FROM ledger_entries ORDER BY insertion_seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                let data_str: String = row
                    .try_get("data")
                    .map_err(|e| LedgerError::Persistence(e.to_string()))?;
                let timestamp_str: String = row
                    .try_get("timestamp")
                    .map_err(|e| LedgerError::Persistence(e.to_string()))?;
                Ok(LedgerEntry {
                    entry_id: row
                        .try_get("entry_id")
                        .map_err(|e| LedgerError::Persistence(e.to_string()))?,
                    event_type: row
                        .try_get("event_type")
                        .map_err(|e| LedgerError::Persistence(e.to_string()))?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                        .map_err(|e| LedgerError::Persistence(e.to_string()))?
                        .with_timezone(&Utc),
                    data: serde_json::from_str(&data_str)
                        .map_err(|e| LedgerError::Persistence(e.to_string()))?,
                    previous_hash: row
                        .try_get("previous_hash")
                        .map_err(|e| LedgerError::Persistence(e.to_string()))?,
                    entry_hash: row
                        .try_get("entry_hash")
                        .map_err(|e| LedgerError::Persistence(e.to_string()))?,
                    signature: row
                        .try_get("signature")
                        .map_err(|e| LedgerError::Persistence(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn by_event_type(&self, event_type: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect())
    }

    async fn get_by_data_field(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .find(|e| e.data.get(field).and_then(|v| v.as_str()) == Some(value)))
    }
}

/// Result of replaying the chain from genesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub chain_intact: bool,
    pub entries_checked: u64,
    pub entries_verified: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_broken: Option<String>,
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    append_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            append_lock: Mutex::new(()),
        }
    }

    /// Append an event to the chain, committing to the previous entry's
    /// hash. Serialized so the chain never forks under concurrent callers.
    pub async fn append(
        &self,
        event_type: &str,
        data: JsonValue,
        signing_key: Option<&IdentityKey>,
    ) -> Result<LedgerEntry, LedgerError> {
        let _guard = self.append_lock.lock().await;

        let previous_hash = match self.store.last().await? {
            Some(entry) => entry.entry_hash,
            None => GENESIS_HASH.to_string(),
        };

        let entry_id = format!("entry_{}", Uuid::new_v4());
        let timestamp = Utc::now();
        let preimage =
            LedgerEntry::hash_preimage(&entry_id, event_type, &timestamp, &data, &previous_hash);
        let entry_hash = canonical_json(&preimage)
            .map(|c| hex_sha256(c.as_bytes()))
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;

        let signature = match signing_key {
            Some(key) => Some(
                key.sign(&preimage)
                    .map_err(|e| LedgerError::Persistence(e.to_string()))?,
            ),
            None => None,
        };

        let entry = LedgerEntry {
            entry_id,
            event_type: event_type.to_string(),
            timestamp,
            data,
            previous_hash,
            entry_hash,
            signature,
        };

        self.store.append(entry.clone()).await?;
        Ok(entry)
    }

    /// Append the first entry of a fresh chain (`event_type = "genesis"`).
    pub async fn append_genesis(&self) -> Result<LedgerEntry, LedgerError> {
        self.append("genesis", serde_json::json!({}), None).await
    }

    pub async fn get_entries_by_type(&self, event_type: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.by_event_type(event_type).await
    }

    /// Find the `decision` event whose `data.request_id` or `data.decision_id`
    /// matches `decision_id`.
    pub async fn get_decision_entry(&self, decision_id: &str) -> Result<LedgerEntry, LedgerError> {
        self.store
            .get_by_data_field("decision_id", decision_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(decision_id.to_string()))
    }

    pub async fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.all().await
    }

    /// Replay the chain from genesis, recomputing every entry hash and
    /// confirming `previous_hash` links match.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let entries = self.store.all().await?;
        let mut expected_previous = GENESIS_HASH.to_string();
        let mut verified = 0u64;

        for entry in &entries {
            if entry.previous_hash != expected_previous {
                return Ok(IntegrityReport {
                    valid: false,
                    chain_intact: false,
                    entries_checked: verified + 1,
                    entries_verified: verified,
                    first_broken: Some(entry.entry_id.clone()),
                });
            }
            let preimage = LedgerEntry::hash_preimage(
                &entry.entry_id,
                &entry.event_type,
                &entry.timestamp,
                &entry.data,
                &entry.previous_hash,
            );
            let recomputed = canonical_json(&preimage)
                .map(|c| hex_sha256(c.as_bytes()))
                .map_err(|e| LedgerError::Persistence(e.to_string()))?;
            if recomputed != entry.entry_hash {
                return Ok(IntegrityReport {
                    valid: false,
                    chain_intact: false,
                    entries_checked: verified + 1,
                    entries_verified: verified,
                    first_broken: Some(entry.entry_id.clone()),
                });
            }
            expected_previous = entry.entry_hash.clone();
            verified += 1;
        }

        Ok(IntegrityReport {
            valid: true,
            chain_intact: true,
            entries_checked: entries.len() as u64,
            entries_verified: verified,
            first_broken: None,
        })
    }
}

/// Hash a raw byte blob (used by the evidence store for content addressing,
/// which does not go through `canonical_json`).
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex_sha256(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_ledger() -> Ledger {
        Ledger::new(Arc::new(InMemoryLedgerStore::default()))
    }

    #[tokio::test]
    async fn first_entry_chains_from_genesis() {
        let ledger = memory_ledger();
        let entry = ledger
            .append("decision", json!({"decision_id": "dec_1"}), None)
            .await
            .unwrap();
        assert_eq!(entry.previous_hash, GENESIS_HASH);
    }

    #[tokio::test]
    async fn second_entry_chains_to_first() {
        let ledger = memory_ledger();
        let first = ledger
            .append("decision", json!({"decision_id": "dec_1"}), None)
            .await
            .unwrap();
        let second = ledger
            .append("decision", json!({"decision_id": "dec_2"}), None)
            .await
            .unwrap();
        assert_eq!(second.previous_hash, first.entry_hash);
    }

    #[tokio::test]
    async fn verify_integrity_passes_on_untampered_chain() {
        let ledger = memory_ledger();
        ledger
            .append("decision", json!({"decision_id": "dec_1"}), None)
            .await
            .unwrap();
        ledger
            .append("decision", json!({"decision_id": "dec_2"}), None)
            .await
            .unwrap();
        let report = ledger.verify_integrity().await.unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 2);
    }

    #[tokio::test]
    async fn verify_integrity_detects_tampering() {
        let store = Arc::new(InMemoryLedgerStore::default());
        let ledger = Ledger::new(store.clone());
        ledger
            .append("decision", json!({"decision_id": "dec_1"}), None)
            .await
            .unwrap();
        ledger
            .append("decision", json!({"decision_id": "dec_2"}), None)
            .await
            .unwrap();

        {
            let mut entries = store.entries.lock().await;
            entries[0].data = json!({"decision_id": "dec_tampered"});
        }

        let report = ledger.verify_integrity().await.unwrap();
        assert!(!report.valid);
        assert!(report.first_broken.is_some());
    }

    #[tokio::test]
    async fn signed_entry_carries_signature() {
        let ledger = memory_ledger();
        let key = IdentityKey::generate().unwrap();
        let entry = ledger
            .append("decision", json!({"decision_id": "dec_1"}), Some(&key))
            .await
            .unwrap();
        assert!(entry.signature.is_some());
    }

    #[tokio::test]
    async fn filters_entries_by_event_type() {
        let ledger = memory_ledger();
        ledger.append_genesis().await.unwrap();
        ledger
            .append("decision", json!({"decision_id": "dec_1"}), None)
            .await
            .unwrap();
        let decisions = ledger.get_entries_by_type("decision").await.unwrap();
        assert_eq!(decisions.len(), 1);
    }
}
