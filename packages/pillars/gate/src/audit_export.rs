//! C10 — Audit Export: regulator-ready bundles assembled from C2/C5/C6/C7/C8.
//!
//! Directly adapted from `original_source/src/lexecon/audit_export/service.py`
//! (`ExportRequest`/`ExportPackage`/`ExportStatistics`, the per-scope
//! `_collect_*` methods, and the JSON/CSV/Markdown/HTML format dispatch).
//! The source's `compliance` scope depends on a compliance-mapping service
//! with no counterpart among C1..C12, so it is dropped here; every other
//! scope survives.

use std::collections::HashMap;
use std::io::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, GateError};
use crate::escalation::EscalationService;
use crate::evidence::EvidenceService;
use crate::identity::{hex_sha256, IdentityKey};
use crate::ledger::Ledger;
use crate::override_service::OverrideService;
use crate::risk::RiskService;
use crate::types::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportScope {
    All,
    RiskOnly,
    EscalationOnly,
    OverrideOnly,
    EvidenceOnly,
    DecisionLogOnly,
}

impl ExportScope {
    fn includes_risk(self) -> bool {
        matches!(self, ExportScope::All | ExportScope::RiskOnly)
    }
    fn includes_escalation(self) -> bool {
        matches!(self, ExportScope::All | ExportScope::EscalationOnly)
    }
    fn includes_override(self) -> bool {
        matches!(self, ExportScope::All | ExportScope::OverrideOnly)
    }
    fn includes_evidence(self) -> bool {
        matches!(self, ExportScope::All | ExportScope::EvidenceOnly)
    }
    fn includes_decisions(self) -> bool {
        matches!(self, ExportScope::All | ExportScope::DecisionLogOnly)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub export_id: String,
    pub requester: String,
    pub purpose: String,
    pub scope: ExportScope,
    pub format: ExportFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sign: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportStatistics {
    pub total_risks: usize,
    pub total_escalations: usize,
    pub total_overrides: usize,
    pub total_evidence: usize,
    pub total_decisions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPackage {
    pub export_id: String,
    pub requester: String,
    pub scope: ExportScope,
    pub format: ExportFormat,
    pub generated_at: DateTime<Utc>,
    pub content: String,
    pub checksum: String,
    pub size_bytes: usize,
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<String>,
}

fn within_range(
    timestamp: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    start.map_or(true, |s| timestamp >= s) && end.map_or(true, |e| timestamp <= e)
}

fn format_json(data: &JsonValue) -> String {
    serde_json::to_string_pretty(data).unwrap_or_default()
}

fn format_csv(data: &JsonValue) -> String {
    let mut out = String::new();
    if let Some(risks) = data.get("risks").and_then(|v| v.as_array()) {
        if !risks.is_empty() {
            out.push_str("=== RISK ASSESSMENTS ===\n");
            out.push_str("risk_id,decision_id,overall_score,risk_level,timestamp\n");
            for r in risks {
                out.push_str(&format!(
                    "{},{},{},{},{}\n",
                    r["risk_id"].as_str().unwrap_or_default(),
                    r["decision_id"].as_str().unwrap_or_default(),
                    r["overall_score"],
                    r["risk_level"].as_str().unwrap_or_default(),
                    r["timestamp"].as_str().unwrap_or_default(),
                ));
            }
            out.push('\n');
        }
    }
    if let Some(escs) = data.get("escalations").and_then(|v| v.as_array()) {
        if !escs.is_empty() {
            out.push_str("=== ESCALATIONS ===\n");
            out.push_str("escalation_id,decision_id,status,priority,created_at\n");
            for e in escs {
                out.push_str(&format!(
                    "{},{},{},{},{}\n",
                    e["escalation_id"].as_str().unwrap_or_default(),
                    e["decision_id"].as_str().unwrap_or_default(),
                    e["status"].as_str().unwrap_or_default(),
                    e["priority"].as_str().unwrap_or_default(),
                    e["created_at"].as_str().unwrap_or_default(),
                ));
            }
            out.push('\n');
        }
    }
    if let Some(overrides) = data.get("overrides").and_then(|v| v.as_array()) {
        if !overrides.is_empty() {
            out.push_str("=== OVERRIDES ===\n");
            out.push_str("override_id,decision_id,override_type,authorized_by,timestamp\n");
            for o in overrides {
                out.push_str(&format!(
                    "{},{},{},{},{}\n",
                    o["override_id"].as_str().unwrap_or_default(),
                    o["decision_id"].as_str().unwrap_or_default(),
                    o["override_type"].as_str().unwrap_or_default(),
                    o["authorized_by"].as_str().unwrap_or_default(),
                    o["timestamp"].as_str().unwrap_or_default(),
                ));
            }
        }
    }
    out
}

fn format_markdown(data: &JsonValue) -> String {
    let mut lines = vec!["# Governance Audit Export".to_string(), String::new()];
    lines.push(format!("**Export ID:** {}", data["export_metadata"]["export_id"].as_str().unwrap_or_default()));
    lines.push(format!("**Requester:** {}", data["export_metadata"]["requester"].as_str().unwrap_or_default()));
    lines.push(format!("**Purpose:** {}", data["export_metadata"]["purpose"].as_str().unwrap_or_default()));
    lines.push(String::new());

    if let Some(stats) = data.get("statistics") {
        lines.push("## Summary Statistics".to_string());
        lines.push(String::new());
        lines.push(format!("- **Risk Assessments:** {}", stats["total_risks"]));
        lines.push(format!("- **Escalations:** {}", stats["total_escalations"]));
        lines.push(format!("- **Overrides:** {}", stats["total_overrides"]));
        lines.push(format!("- **Evidence Artifacts:** {}", stats["total_evidence"]));
        lines.push(format!("- **Decisions:** {}", stats["total_decisions"]));
        lines.push(String::new());
    }

    if let Some(risks) = data.get("risks").and_then(|v| v.as_array()) {
        if !risks.is_empty() {
            lines.push("## Risk Assessments".to_string());
            lines.push(String::new());
            for r in risks.iter().take(10) {
                lines.push(format!("### {}", r["risk_id"].as_str().unwrap_or_default()));
                lines.push(format!("- **Decision:** {}", r["decision_id"].as_str().unwrap_or_default()));
                lines.push(format!("- **Risk Level:** {}", r["risk_level"].as_str().unwrap_or_default()));
                lines.push(format!("- **Overall Score:** {}", r["overall_score"]));
                lines.push(String::new());
            }
        }
    }

    lines.join("\n")
}

fn format_html(data: &JsonValue) -> String {
    let mut html = vec![
        "<!DOCTYPE html>".to_string(),
        "<html><head><title>Governance Audit Export</title>".to_string(),
        "<style>body{font-family:Arial,sans-serif;margin:40px}table{border-collapse:collapse;width:100%}th,td{border:1px solid #ddd;padding:8px}</style>".to_string(),
        "</head><body>".to_string(),
        "<h1>Governance Audit Export</h1>".to_string(),
    ];
    html.push(format!("<p><strong>Export ID:</strong> {}</p>", data["export_metadata"]["export_id"].as_str().unwrap_or_default()));
    if let Some(stats) = data.get("statistics") {
        html.push("<h2>Summary Statistics</h2><table><tr><th>Metric</th><th>Count</th></tr>".to_string());
        html.push(format!("<tr><td>Risk Assessments</td><td>{}</td></tr>", stats["total_risks"]));
        html.push(format!("<tr><td>Escalations</td><td>{}</td></tr>", stats["total_escalations"]));
        html.push(format!("<tr><td>Overrides</td><td>{}</td></tr>", stats["total_overrides"]));
        html.push(format!("<tr><td>Evidence Artifacts</td><td>{}</td></tr>", stats["total_evidence"]));
        html.push("</table>".to_string());
    }
    html.push("</body></html>".to_string());
    html.join("\n")
}

pub struct AuditExportService {
    exports: parking_lot::RwLock<HashMap<String, ExportPackage>>,
}

impl Default for AuditExportService {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditExportService {
    pub fn new() -> Self {
        Self {
            exports: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// §4.10's seven-step algorithm: collect per-scope, compute statistics,
    /// format, checksum, optionally sign, store.
    #[allow(clippy::too_many_arguments)]
    pub async fn generate_export(
        &self,
        request: ExportRequest,
        risk: Option<&RiskService>,
        escalation: Option<&EscalationService>,
        over: Option<&OverrideService>,
        evidence: Option<&EvidenceService>,
        ledger: Option<&Ledger>,
        signing_key: Option<&IdentityKey>,
    ) -> Result<ExportPackage, GateError> {
        let mut data = serde_json::json!({
            "export_metadata": {
                "export_id": request.export_id,
                "requester": request.requester,
                "purpose": request.purpose,
                "scope": request.scope,
                "format": request.format,
            }
        });

        let mut stats = ExportStatistics::default();

        // Escalations and overrides are indexed per-decision, not globally,
        // so any decision ids touched by the ledger in range drive both
        // lookups regardless of which scope triggered the ledger read.
        let decision_ids: Vec<String> = match ledger {
            Some(ledger) => ledger
                .get_entries_by_type("decision")
                .await
                .map_err(GateError::from)?
                .into_iter()
                .filter(|e| within_range(e.timestamp, request.start_date, request.end_date))
                .filter_map(|e| e.data.get("decision_id").and_then(|v| v.as_str()).map(str::to_string))
                .collect(),
            None => Vec::new(),
        };

        if request.scope.includes_risk() {
            if let Some(svc) = risk {
                let risks: Vec<JsonValue> = svc
                    .list_risks(None, None, usize::MAX)
                    .into_iter()
                    .filter(|r| within_range(r.timestamp, request.start_date, request.end_date))
                    .map(|r| serde_json::to_value(r).unwrap_or(JsonValue::Null))
                    .collect();
                stats.total_risks = risks.len();
                data["risks"] = JsonValue::Array(risks);
            }
        }

        if request.scope.includes_escalation() {
            if let Some(svc) = escalation {
                let escalations: Vec<JsonValue> = decision_ids
                    .iter()
                    .flat_map(|id| svc.get_escalations_for_decision(id))
                    .map(|e| serde_json::to_value(e).unwrap_or(JsonValue::Null))
                    .collect();
                stats.total_escalations = escalations.len();
                data["escalations"] = JsonValue::Array(escalations);
            }
        }

        if request.scope.includes_override() {
            if let Some(svc) = over {
                let overrides: Vec<JsonValue> = decision_ids
                    .iter()
                    .filter_map(|id| svc.get_active_override(id))
                    .map(|o| serde_json::to_value(o).unwrap_or(JsonValue::Null))
                    .collect();
                stats.total_overrides = overrides.len();
                data["overrides"] = JsonValue::Array(overrides);
            }
        }

        if request.scope.includes_evidence() {
            if let Some(svc) = evidence {
                let statistics = svc.get_statistics();
                stats.total_evidence = statistics.total;
                data["evidence_statistics"] = serde_json::to_value(statistics).unwrap_or(JsonValue::Null);
            }
        }

        if request.scope.includes_decisions() {
            if let Some(ledger) = ledger {
                let decisions: Vec<JsonValue> = ledger
                    .get_entries_by_type("decision")
                    .await
                    .map_err(GateError::from)?
                    .into_iter()
                    .filter(|e| within_range(e.timestamp, request.start_date, request.end_date))
                    .map(|e| serde_json::to_value(e).unwrap_or(JsonValue::Null))
                    .collect();
                stats.total_decisions = decisions.len();
                data["decisions"] = JsonValue::Array(decisions);
            }
        }

        data["statistics"] = serde_json::to_value(&stats).unwrap_or(JsonValue::Null);

        let content = match request.format {
            ExportFormat::Json => format_json(&data),
            ExportFormat::Csv => format_csv(&data),
            ExportFormat::Markdown => format_markdown(&data),
            ExportFormat::Html => format_html(&data),
        };

        let checksum = hex_sha256(content.as_bytes());
        let record_count =
            stats.total_risks + stats.total_escalations + stats.total_overrides + stats.total_evidence + stats.total_decisions;

        let (signature, signing_key_id) = if request.sign {
            match signing_key {
                Some(key) => (
                    Some(key.sign(&checksum).map_err(GateError::from)?),
                    Some(key.verifying_key_b64()),
                ),
                None => (None, None),
            }
        } else {
            (None, None)
        };

        let package = ExportPackage {
            export_id: request.export_id.clone(),
            requester: request.requester,
            scope: request.scope,
            format: request.format,
            generated_at: Utc::now(),
            size_bytes: content.len(),
            content,
            checksum,
            record_count,
            signature,
            signing_key_id,
        };

        self.exports.write().insert(package.export_id.clone(), package.clone());
        Ok(package)
    }

    pub fn get_export(&self, export_id: &str) -> Result<ExportPackage, ExportError> {
        self.exports
            .read()
            .get(export_id)
            .cloned()
            .ok_or_else(|| ExportError::NotFound(export_id.to_string()))
    }

    pub fn list_exports(&self, requester: Option<&str>, limit: usize) -> Vec<ExportPackage> {
        let mut exports: Vec<ExportPackage> = self
            .exports
            .read()
            .values()
            .filter(|e| requester.map_or(true, |r| e.requester == r))
            .cloned()
            .collect();
        exports.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        exports.truncate(limit.max(1));
        exports
    }

    pub fn get_export_statistics(&self) -> JsonValue {
        let exports = self.exports.read();
        let total_exports = exports.len();
        let total_size: usize = exports.values().map(|e| e.size_bytes).sum();
        let total_records: usize = exports.values().map(|e| e.record_count).sum();
        serde_json::json!({
            "total_exports": total_exports,
            "total_size_bytes": total_size,
            "total_records_exported": total_records,
            "average_export_size_bytes": if total_exports > 0 { total_size / total_exports } else { 0 },
        })
    }

    /// Build the §6.3 ZIP bundle: `ledger_events.json`, `verification_report.json`,
    /// `policies.json`, `summary.md`, `manifest.json` (with `{path, sha256}`
    /// entries and a `bundle_hash` over the sorted file hashes).
    pub async fn build_bundle(
        &self,
        ledger: &Ledger,
        policy_hash: Option<&str>,
    ) -> Result<Vec<u8>, ExportError> {
        let entries = ledger
            .entries()
            .await
            .map_err(|e| ExportError::BundleFailed(e.to_string()))?;
        let verification = ledger
            .verify_integrity()
            .await
            .map_err(|e| ExportError::BundleFailed(e.to_string()))?;

        let ledger_json = serde_json::to_vec_pretty(&entries)
            .map_err(|e| ExportError::BundleFailed(e.to_string()))?;
        let verification_json = serde_json::to_vec_pretty(&verification)
            .map_err(|e| ExportError::BundleFailed(e.to_string()))?;
        let policies_json = serde_json::to_vec_pretty(&serde_json::json!({ "policy_hash": policy_hash }))
            .map_err(|e| ExportError::BundleFailed(e.to_string()))?;
        let summary_md = format!(
            "# Ledger Export Summary\n\n- Entries: {}\n- Chain intact: {}\n",
            entries.len(),
            verification.chain_intact
        )
        .into_bytes();

        let files: Vec<(&str, &[u8])> = vec![
            ("ledger_events.json", &ledger_json),
            ("verification_report.json", &verification_json),
            ("policies.json", &policies_json),
            ("summary.md", &summary_md),
        ];

        let mut hashes: Vec<(String, String)> = files
            .iter()
            .map(|(path, bytes)| (path.to_string(), hex_sha256(bytes)))
            .collect();
        hashes.sort_by(|a, b| a.0.cmp(&b.0));
        let concatenated: String = hashes.iter().map(|(_, h)| h.as_str()).collect();
        let bundle_hash = hex_sha256(concatenated.as_bytes());

        let manifest = serde_json::json!({
            "files": hashes.iter().map(|(path, sha256)| serde_json::json!({"path": path, "sha256": sha256})).collect::<Vec<_>>(),
            "bundle_hash": bundle_hash,
        });
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| ExportError::BundleFailed(e.to_string()))?;

        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            for (path, bytes) in files.iter().chain(std::iter::once(&("manifest.json", manifest_json.as_slice()))) {
                writer
                    .start_file(*path, options)
                    .map_err(|e| ExportError::BundleFailed(e.to_string()))?;
                writer
                    .write_all(bytes)
                    .map_err(|e| ExportError::BundleFailed(e.to_string()))?;
            }
            writer
                .finish()
                .map_err(|e| ExportError::BundleFailed(e.to_string()))?;
        }

        Ok(buffer.into_inner())
    }
}
