//! Crate-wide error taxonomy.
//!
//! Each service gets its own error enum so callers can match on the variants
//! that are actually reachable from that service; `GateError` is the
//! catch-all a caller sees once errors cross a component boundary it doesn't
//! need to special-case (mirrors the request/response layer in `decision.rs`).
//!
//! `PolicyViolation` (a deny ruling) and `SLAExpired` (an escalation timing
//! out) are deliberately not variants here — both are valid outcomes
//! represented as `Ok` values elsewhere in the crate, not errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("signature verification failed")]
    SignatureFailed,
    #[error("signing key unavailable")]
    KeyUnavailable,
    #[error("malformed signature encoding: {0}")]
    MalformedSignature(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("persistence failure appending ledger entry: {0}")]
    Persistence(String),
    #[error("ledger entry not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy document invalid: {0}")]
    InvalidDocument(String),
    #[error("no active policy loaded")]
    NoActivePolicy,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("field '{field}' is invalid: {reason}")]
    Field { field: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("decision {0} already has a risk assessment")]
    AlreadyAssessed(String),
    #[error("risk dimension weights must sum to 1.0 (+/- 0.01), got {0}")]
    InvalidWeights(f64),
    #[error("risk assessment not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("escalation not found: {0}")]
    NotFound(String),
    #[error("escalated_to must contain at least one recipient")]
    EmptyRecipients,
    #[error("no default escalation recipients configured and none supplied")]
    NoRecipients,
    #[error("actor '{actor}' is not authorized to resolve escalation '{escalation_id}'")]
    ResolverNotAuthorized { actor: String, escalation_id: String },
    #[error("escalation '{0}' is already in a terminal state")]
    AlreadyTerminal(String),
    #[error("concurrent status transition conflict on escalation '{0}'")]
    StatusConflict(String),
}

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("actor '{0}' is not an authorized override role")]
    NotAuthorized(String),
    #[error("override type '{override_type}' requires an executive authorizer, got '{actor}'")]
    RequiresExecutive { override_type: String, actor: String },
    #[error("justification must be at least 20 characters")]
    JustificationTooShort,
    #[error("justification is too generic to serve as a governance record")]
    JustificationTooGeneric,
    #[error("expires_at must be in the future")]
    ExpiryInPast,
    #[error("time_limited_exception expires_at exceeds the 90 day maximum")]
    ExpiryTooFar,
    #[error("emergency_bypass requires scope.is_one_time = true")]
    EmergencyBypassMustBeOneTime,
    #[error("override not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("content size {size} exceeds maximum of {max} bytes")]
    ContentTooLarge { size: usize, max: usize },
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("artifact '{0}' is already signed")]
    AlreadySigned(String),
    #[error("append-only store violation: key '{0}' already exists")]
    AppendOnlyViolation(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export not found: {0}")]
    NotFound(String),
    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),
    #[error("bundle assembly failed: {0}")]
    BundleFailed(String),
}

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("legal hold not found: {0}")]
    HoldNotFound(String),
    #[error("entry is under legal hold and cannot be modified: {0}")]
    UnderLegalHold(String),
}

/// Top-level error surfaced once a failure crosses a component boundary.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Risk(#[from] RiskError),
    #[error(transparent)]
    Escalation(#[from] EscalationError),
    #[error(transparent)]
    Override(#[from] OverrideError),
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Retention(#[from] RetentionError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}
