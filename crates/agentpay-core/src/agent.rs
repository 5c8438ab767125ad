//! Agent identity records (spec.md §3): profile, manifest, and trust attestations.
//!
//! These are the entities the mandate verifier and trust framework read from — an
//! `AgentManifest`'s `allowed_domains`/`blocked_domains` back the verifier's domain
//! allow-list check (spec.md §4.1 check 8), and `manifest_hash` is the binding the identity
//! registry checks against when resolving a claimed key.

use crate::ids::AgentId;
use crate::mandate::{canonical_json, hex_sha256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: AgentId,
    pub owner_id: String,
    pub kya_level: crate::trust::kya::KyaLevel,
    pub capabilities: Vec<String>,
    pub manifest_hash: String,
    pub trust_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManifest {
    pub agent_id: AgentId,
    pub owner_id: String,
    pub capabilities: Vec<String>,
    pub max_budget_per_tx_minor: i64,
    pub daily_budget_minor: i64,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
}

impl AgentManifest {
    /// `manifest_hash = SHA-256` of the canonical (sorted-key) JSON of the manifest minus
    /// the hash field itself (spec.md §3). The manifest carries no hash field of its own —
    /// hashing its full canonical JSON already satisfies "minus the hash field" since the
    /// struct never stores one.
    pub fn compute_hash(&self) -> String {
        let value = serde_json::to_value(self).expect("agent manifest serializes to JSON");
        hex_sha256(canonical_json(&value).as_bytes())
    }

    /// `payment.domain` is in the configured allow-list (spec.md §4.1 check 8): a domain
    /// must appear in `allowed_domains` and must not appear in `blocked_domains`, with the
    /// block list taking precedence on conflict.
    pub fn domain_is_allowed(&self, domain: &str) -> bool {
        if self.blocked_domains.iter().any(|d| d == domain) {
            return false;
        }
        self.allowed_domains.iter().any(|d| d == domain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationType {
    Identity,
    Capability,
    Compliance,
    CodeAudit,
    Behavior,
    Counterparty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustAttestation {
    pub id: String,
    pub agent_id: AgentId,
    pub attestation_type: AttestationType,
    pub issuer_id: String,
    pub claim: serde_json::Value,
    pub signature: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl TrustAttestation {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> AgentManifest {
        AgentManifest {
            agent_id: AgentId::new(),
            owner_id: "owner_1".to_string(),
            capabilities: vec!["payments.create".to_string()],
            max_budget_per_tx_minor: 10_000,
            daily_budget_minor: 100_000,
            allowed_domains: vec!["merchant.example".to_string()],
            blocked_domains: vec![],
        }
    }

    #[test]
    fn manifest_hash_is_deterministic() {
        let m = manifest();
        assert_eq!(m.compute_hash(), m.compute_hash());
        assert_eq!(m.compute_hash().len(), 64);
    }

    #[test]
    fn blocked_domain_overrides_allowed() {
        let mut m = manifest();
        m.blocked_domains.push("merchant.example".to_string());
        assert!(!m.domain_is_allowed("merchant.example"));
    }

    #[test]
    fn domain_not_in_allow_list_is_rejected() {
        let m = manifest();
        assert!(!m.domain_is_allowed("evil.example"));
        assert!(m.domain_is_allowed("merchant.example"));
    }

    #[test]
    fn attestation_inactive_once_revoked_or_expired() {
        let mut attestation = TrustAttestation {
            id: "attn_1".to_string(),
            agent_id: AgentId::new(),
            attestation_type: AttestationType::Identity,
            issuer_id: "issuer_1".to_string(),
            claim: serde_json::json!({}),
            signature: "sig".to_string(),
            issued_at: Utc::now() - chrono::Duration::days(1),
            expires_at: Utc::now() + chrono::Duration::days(1),
            revoked: false,
        };
        assert!(attestation.is_active(Utc::now()));
        attestation.revoked = true;
        assert!(!attestation.is_active(Utc::now()));
    }
}
