//! C1 — Identity: canonical JSON encoding and Ed25519 signing/verification.
//!
//! The source this crate was ported from canonicalized JSON two different
//! ways in two different modules (a sorted-key `json.dumps` in the ledger,
//! a hand-rolled string join in the oversight module). This crate resolves
//! that split: `canonical_json` is the single encoding used everywhere a
//! hash or a signature is taken over a payload, named in DESIGN.md as the
//! resolution to Open Question #2.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::IdentityError;

/// Render a JSON-serializable value as canonical JSON: object keys sorted
/// lexicographically at every nesting level, no insignificant whitespace.
/// This is the exact byte sequence hashed and signed throughout the crate.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, IdentityError> {
    let raw = serde_json::to_value(value)
        .map_err(|e| IdentityError::MalformedSignature(e.to_string()))?;
    Ok(canonicalize(&raw))
}

fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).expect("string serializes"),
                        canonicalize(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => serde_json::to_string(other).expect("primitive serializes"),
    }
}

/// SHA-256 of the canonical JSON encoding, as lowercase hex.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String, IdentityError> {
    let canon = canonical_json(value)?;
    Ok(hex_sha256(canon.as_bytes()))
}

pub fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// An Ed25519 keypair used to sign decisions, ledger entries, and human
/// interventions.
#[derive(Clone)]
pub struct IdentityKey {
    signing_key: SigningKey,
}

impl IdentityKey {
    pub fn generate() -> Result<Self, IdentityError> {
        let mut csprng = OsRng;
        let mut seed = [0u8; 32];
        csprng.fill_bytes(&mut seed);
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn verifying_key_b64(&self) -> String {
        STANDARD.encode(self.verifying_key().to_bytes())
    }

    /// Sign the canonical JSON encoding of `payload`, returning a
    /// base64-encoded signature.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<String, IdentityError> {
        let canon = canonical_json(payload)?;
        let signature: Signature = self.signing_key.sign(canon.as_bytes());
        Ok(STANDARD.encode(signature.to_bytes()))
    }
}

/// Verify a base64-encoded Ed25519 signature over the canonical JSON
/// encoding of `payload`, using the base64-encoded verifying key.
pub fn verify<T: Serialize>(
    payload: &T,
    signature_b64: &str,
    verifying_key_b64: &str,
) -> Result<(), IdentityError> {
    let key_bytes = STANDARD
        .decode(verifying_key_b64)
        .map_err(|e| IdentityError::MalformedSignature(e.to_string()))?;
    let key_array: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| IdentityError::MalformedSignature("verifying key must be 32 bytes".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_array)
        .map_err(|e| IdentityError::MalformedSignature(e.to_string()))?;

    let sig_bytes = STANDARD
        .decode(signature_b64)
        .map_err(|e| IdentityError::MalformedSignature(e.to_string()))?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| IdentityError::MalformedSignature("signature must be 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_array);

    let canon = canonical_json(payload)?;
    verifying_key
        .verify(canon.as_bytes(), &signature)
        .map_err(|_| IdentityError::SignatureFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": 2});
        assert_eq!(canonical_json(&value).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_json_is_stable_across_nesting() {
        let a = json!({"outer": {"z": 1, "a": 2}, "list": [3, 1, 2]});
        let b = json!({"list": [3, 1, 2], "outer": {"a": 2, "z": 1}});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let key = IdentityKey::generate().unwrap();
        let payload = json!({"decision_id": "dec_1", "decision": "permit"});
        let sig = key.sign(&payload).unwrap();
        assert!(verify(&payload, &sig, &key.verifying_key_b64()).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let key = IdentityKey::generate().unwrap();
        let payload = json!({"decision_id": "dec_1", "decision": "permit"});
        let sig = key.sign(&payload).unwrap();
        let tampered = json!({"decision_id": "dec_1", "decision": "deny"});
        assert!(verify(&tampered, &sig, &key.verifying_key_b64()).is_err());
    }

    #[test]
    fn content_hash_is_deterministic() {
        let payload = json!({"a": 1, "b": [1, 2, 3]});
        assert_eq!(content_hash(&payload).unwrap(), content_hash(&payload).unwrap());
    }
}
