//! C3 — Policy Engine: term/relation resolution under three evaluation modes.
//!
//! Generalizes `engine.rs`'s `GateEngine` (policy store behind a
//! `parking_lot::RwLock`, priority-ordered rule evaluation, atomic reload)
//! from the teacher's single-relation-per-policy DSL to the term/relation
//! model in `model_governance_pack/models/policy.py`.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::identity::content_hash;
use crate::types::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    Permissive,
    Strict,
    Paranoid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermType {
    Actor,
    Action,
    Resource,
    DataClass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Term {
    pub id: String,
    #[serde(rename = "type")]
    pub term_type: TermType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, JsonValue>>,
}

impl Term {
    /// The term's immediate ancestor, if its `attributes` carry one under
    /// `parent` or `parent_actor_id` — the policy-engine-facing mirror of
    /// `Actor.parent_actor_id` / a hierarchical action family.
    fn parent(&self) -> Option<String> {
        let attrs = self.attributes.as_ref()?;
        attrs
            .get("parent")
            .or_else(|| attrs.get("parent_actor_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Permits,
    Forbids,
    Requires,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub subject: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

impl Relation {
    fn specificity(&self) -> u8 {
        if self.object.is_some() {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub condition: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub name: String,
    pub version: String,
    pub mode: PolicyMode,
    pub terms: Vec<Term>,
    pub relations: Vec<Relation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_frameworks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<Constraint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_until: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, JsonValue>>,
}

/// A loaded policy plus the hash pinned at load time. Decisions evaluated
/// under this policy reference `policy_hash`, not the live (possibly
/// since-reloaded) policy.
#[derive(Clone)]
struct ActivePolicy {
    policy: Policy,
    policy_hash: String,
    terms_by_id: HashMap<String, Term>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadResult {
    pub policy_hash: String,
    pub terms_loaded: usize,
    pub relations_loaded: usize,
}

pub struct PolicyEngine {
    active: RwLock<Option<ActivePolicy>>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
        }
    }

    /// Replace the active terms/relations atomically and recompute the
    /// policy hash. Reload is copy-on-write: in-flight evaluations keep
    /// using the snapshot they captured (§5).
    pub fn load_policy(&self, policy: Policy) -> Result<LoadResult, PolicyError> {
        let policy_hash = content_hash(&serde_json::json!({
            "terms": policy.terms,
            "relations": policy.relations,
        }))
        .map_err(|e| PolicyError::InvalidDocument(e.to_string()))?;

        let terms_by_id = policy
            .terms
            .iter()
            .map(|t| (t.id.clone(), t.clone()))
            .collect();

        let result = LoadResult {
            policy_hash: policy_hash.clone(),
            terms_loaded: policy.terms.len(),
            relations_loaded: policy.relations.len(),
        };

        *self.active.write() = Some(ActivePolicy {
            policy,
            policy_hash,
            terms_by_id,
        });

        Ok(result)
    }

    pub fn policy_hash(&self) -> Option<String> {
        self.active.read().as_ref().map(|a| a.policy_hash.clone())
    }

    fn ancestors(terms_by_id: &HashMap<String, Term>, start: &str) -> Vec<String> {
        let mut chain = vec![start.to_string()];
        let mut current = start.to_string();
        let mut guard = 0;
        while let Some(term) = terms_by_id.get(&current) {
            guard += 1;
            if guard > 32 {
                break;
            }
            match term.parent() {
                Some(parent) if !chain.contains(&parent) => {
                    chain.push(parent.clone());
                    current = parent;
                }
                _ => break,
            }
        }
        chain
    }

    /// Evaluate a request against the active policy. `data_classes` and
    /// `risk_level` are consulted only under `paranoid` mode.
    pub fn evaluate(
        &self,
        actor: &str,
        action: &str,
        data_classes: &[String],
        risk_level: Option<u8>,
    ) -> Decision {
        let guard = self.active.read();
        let active = match guard.as_ref() {
            Some(a) => a,
            None => {
                return Decision {
                    allowed: false,
                    reason: "no active policy loaded".to_string(),
                }
            }
        };

        if !active.terms_by_id.contains_key(actor) {
            return self.term_miss_decision(active.policy.mode, "actor", actor);
        }
        let action_known = active
            .policy
            .relations
            .iter()
            .any(|r| r.action == action)
            || active.terms_by_id.contains_key(action);
        if !action_known {
            return self.term_miss_decision(active.policy.mode, "action", action);
        }

        let actor_chain = Self::ancestors(&active.terms_by_id, actor);
        let action_chain = Self::ancestors(&active.terms_by_id, action);

        let mut candidates: Vec<&Relation> = active
            .policy
            .relations
            .iter()
            .filter(|r| actor_chain.contains(&r.subject) && action_chain.contains(&r.action))
            .collect();

        // Most-specific (object-qualified) first; `forbids` wins ties.
        candidates.sort_by(|a, b| {
            b.specificity()
                .cmp(&a.specificity())
                .then_with(|| match (a.relation_type, b.relation_type) {
                    (RelationType::Forbids, RelationType::Forbids) => std::cmp::Ordering::Equal,
                    (RelationType::Forbids, _) => std::cmp::Ordering::Less,
                    (_, RelationType::Forbids) => std::cmp::Ordering::Greater,
                    _ => std::cmp::Ordering::Equal,
                })
        });

        let forbid = candidates
            .iter()
            .find(|r| r.relation_type == RelationType::Forbids);
        let permit = candidates
            .iter()
            .find(|r| r.relation_type == RelationType::Permits);

        match active.policy.mode {
            PolicyMode::Permissive => {
                if let Some(r) = forbid {
                    Decision {
                        allowed: false,
                        reason: format!(
                            "denied by forbids relation on {}->{} (permissive mode, deny-wins)",
                            r.subject, r.action
                        ),
                    }
                } else {
                    Decision {
                        allowed: true,
                        reason: "no matching forbids relation (permissive default-allow)"
                            .to_string(),
                    }
                }
            }
            PolicyMode::Strict => {
                if let Some(r) = forbid {
                    Decision {
                        allowed: false,
                        reason: format!(
                            "denied by forbids relation on {}->{} (strict mode)",
                            r.subject, r.action
                        ),
                    }
                } else if let Some(r) = permit {
                    Decision {
                        allowed: true,
                        reason: format!(
                            "permitted by explicit permits relation on {}->{} (strict mode)",
                            r.subject, r.action
                        ),
                    }
                } else {
                    Decision {
                        allowed: false,
                        reason: "no explicit permits relation found (strict mode requires one)"
                            .to_string(),
                    }
                }
            }
            PolicyMode::Paranoid => {
                if let Some(r) = forbid {
                    return Decision {
                        allowed: false,
                        reason: format!(
                            "denied by forbids relation on {}->{} (paranoid mode)",
                            r.subject, r.action
                        ),
                    };
                }
                let permit = match permit {
                    Some(r) => r,
                    None => {
                        return Decision {
                            allowed: false,
                            reason: "no explicit permits relation found (paranoid mode requires one)"
                                .to_string(),
                        }
                    }
                };

                let unmet = self.unmet_requires(active, permit, data_classes);
                if let Some(clause) = unmet {
                    return Decision {
                        allowed: false,
                        reason: format!(
                            "paranoid mode: unsatisfied requires clause '{clause}'"
                        ),
                    };
                }

                if let (Some(ceiling), Some(level)) =
                    (self.risk_ceiling(active, permit), risk_level)
                {
                    if level > ceiling {
                        return Decision {
                            allowed: false,
                            reason: format!(
                                "paranoid mode: risk_level {level} exceeds policy ceiling {ceiling}"
                            ),
                        };
                    }
                }

                Decision {
                    allowed: true,
                    reason: format!(
                        "permitted by {}->{} with all requires satisfied (paranoid mode)",
                        permit.subject, permit.action
                    ),
                }
            }
        }
    }

    fn term_miss_decision(&self, mode: PolicyMode, kind: &str, id: &str) -> Decision {
        match mode {
            PolicyMode::Permissive => Decision {
                allowed: true,
                reason: format!(
                    "{kind} '{id}' unresolved (term miss); permissive mode defaults to allow"
                ),
            },
            _ => Decision {
                allowed: false,
                reason: format!("{kind} '{id}' unresolved (term miss)"),
            },
        }
    }

    /// Returns the first `requires` clause on a `requires`-typed relation
    /// attached to the same subject/action that is not satisfied by the
    /// request's `data_classes`.
    fn unmet_requires(
        &self,
        active: &ActivePolicy,
        permit: &Relation,
        data_classes: &[String],
    ) -> Option<String> {
        active
            .policy
            .relations
            .iter()
            .filter(|r| {
                r.relation_type == RelationType::Requires
                    && r.subject == permit.subject
                    && r.action == permit.action
            })
            .flat_map(|r| r.conditions.iter().flatten())
            .find(|clause| !data_classes.iter().any(|dc| dc == *clause))
            .cloned()
    }

    fn risk_ceiling(&self, active: &ActivePolicy, permit: &Relation) -> Option<u8> {
        active.policy.constraints.as_ref().and_then(|constraints| {
            constraints
                .iter()
                .find(|c| c.condition.contains(&permit.action) && c.name.contains("risk_ceiling"))
                .and_then(|c| c.action.parse::<u8>().ok())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(id: &str, term_type: TermType) -> Term {
        Term {
            id: id.to_string(),
            term_type,
            name: id.to_string(),
            description: None,
            attributes: None,
        }
    }

    fn basic_policy(mode: PolicyMode, relations: Vec<Relation>) -> Policy {
        Policy {
            policy_id: "pol_test_v1".to_string(),
            name: "test".to_string(),
            version: "1.0.0".to_string(),
            mode,
            terms: vec![
                term("act_ai_agent:claude", TermType::Actor),
                term("axn_read:file", TermType::Action),
            ],
            relations,
            description: None,
            compliance_frameworks: None,
            constraints: None,
            effective_from: None,
            effective_until: None,
            metadata: None,
        }
    }

    #[test]
    fn permissive_allows_absent_forbid() {
        let engine = PolicyEngine::new();
        engine.load_policy(basic_policy(PolicyMode::Permissive, vec![])).unwrap();
        let d = engine.evaluate("act_ai_agent:claude", "axn_read:file", &[], None);
        assert!(d.allowed);
    }

    #[test]
    fn permissive_denies_on_forbid() {
        let engine = PolicyEngine::new();
        let relations = vec![Relation {
            relation_type: RelationType::Forbids,
            subject: "act_ai_agent:claude".to_string(),
            action: "axn_read:file".to_string(),
            object: None,
            conditions: None,
            justification: None,
        }];
        engine.load_policy(basic_policy(PolicyMode::Permissive, relations)).unwrap();
        let d = engine.evaluate("act_ai_agent:claude", "axn_read:file", &[], None);
        assert!(!d.allowed);
    }

    #[test]
    fn strict_denies_without_explicit_permit() {
        let engine = PolicyEngine::new();
        engine.load_policy(basic_policy(PolicyMode::Strict, vec![])).unwrap();
        let d = engine.evaluate("act_ai_agent:claude", "axn_read:file", &[], None);
        assert!(!d.allowed);
    }

    #[test]
    fn strict_allows_with_explicit_permit() {
        let engine = PolicyEngine::new();
        let relations = vec![Relation {
            relation_type: RelationType::Permits,
            subject: "act_ai_agent:claude".to_string(),
            action: "axn_read:file".to_string(),
            object: None,
            conditions: None,
            justification: None,
        }];
        engine.load_policy(basic_policy(PolicyMode::Strict, relations)).unwrap();
        let d = engine.evaluate("act_ai_agent:claude", "axn_read:file", &[], None);
        assert!(d.allowed);
    }

    #[test]
    fn forbid_beats_permit_at_same_specificity() {
        let engine = PolicyEngine::new();
        let relations = vec![
            Relation {
                relation_type: RelationType::Permits,
                subject: "act_ai_agent:claude".to_string(),
                action: "axn_read:file".to_string(),
                object: None,
                conditions: None,
                justification: None,
            },
            Relation {
                relation_type: RelationType::Forbids,
                subject: "act_ai_agent:claude".to_string(),
                action: "axn_read:file".to_string(),
                object: None,
                conditions: None,
                justification: None,
            },
        ];
        engine.load_policy(basic_policy(PolicyMode::Strict, relations)).unwrap();
        let d = engine.evaluate("act_ai_agent:claude", "axn_read:file", &[], None);
        assert!(!d.allowed);
    }

    #[test]
    fn paranoid_requires_unsatisfied_requires_clause() {
        let engine = PolicyEngine::new();
        let relations = vec![
            Relation {
                relation_type: RelationType::Permits,
                subject: "act_ai_agent:claude".to_string(),
                action: "axn_read:file".to_string(),
                object: None,
                conditions: None,
                justification: None,
            },
            Relation {
                relation_type: RelationType::Requires,
                subject: "act_ai_agent:claude".to_string(),
                action: "axn_read:file".to_string(),
                object: None,
                conditions: Some(vec!["pii_redacted".to_string()]),
                justification: None,
            },
        ];
        engine.load_policy(basic_policy(PolicyMode::Paranoid, relations)).unwrap();
        let d = engine.evaluate("act_ai_agent:claude", "axn_read:file", &[], None);
        assert!(!d.allowed);
    }

    #[test]
    fn paranoid_allows_when_requires_satisfied() {
        let engine = PolicyEngine::new();
        let relations = vec![
            Relation {
                relation_type: RelationType::Permits,
                subject: "act_ai_agent:claude".to_string(),
                action: "axn_read:file".to_string(),
                object: None,
                conditions: None,
                justification: None,
            },
            Relation {
                relation_type: RelationType::Requires,
                subject: "act_ai_agent:claude".to_string(),
                action: "axn_read:file".to_string(),
                object: None,
                conditions: Some(vec!["pii_redacted".to_string()]),
                justification: None,
            },
        ];
        engine.load_policy(basic_policy(PolicyMode::Paranoid, relations)).unwrap();
        let d = engine.evaluate(
            "act_ai_agent:claude",
            "axn_read:file",
            &["pii_redacted".to_string()],
            None,
        );
        assert!(d.allowed);
    }

    #[test]
    fn reload_changes_policy_hash() {
        let engine = PolicyEngine::new();
        let r1 = engine.load_policy(basic_policy(PolicyMode::Permissive, vec![])).unwrap();
        let relations = vec![Relation {
            relation_type: RelationType::Forbids,
            subject: "act_ai_agent:claude".to_string(),
            action: "axn_read:file".to_string(),
            object: None,
            conditions: None,
            justification: None,
        }];
        let r2 = engine.load_policy(basic_policy(PolicyMode::Permissive, relations)).unwrap();
        assert_ne!(r1.policy_hash, r2.policy_hash);
    }

    #[test]
    fn no_policy_loaded_denies() {
        let engine = PolicyEngine::new();
        let d = engine.evaluate("act_ai_agent:claude", "axn_read:file", &[], None);
        assert!(!d.allowed);
    }
}
