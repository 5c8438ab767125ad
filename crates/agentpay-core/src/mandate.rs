//! The AP2-style mandate family (spec.md §3, §4.1): Intent, Cart, Payment, and the
//! UCP-style Checkout mandate that authorizes a cart for payment.

use crate::error::AgentPayError;
use crate::ids::{AgentId, MandateId};
use crate::money::Discount;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateKind {
    Intent,
    Cart,
    Payment,
    Checkout,
}

impl MandateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MandateKind::Intent => "intent",
            MandateKind::Cart => "cart",
            MandateKind::Payment => "payment",
            MandateKind::Checkout => "checkout",
        }
    }
}

/// `verification_method` encodes `(algorithm, public_key_base64url)`; `proof_value` is the
/// base64 signature bytes (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    pub verification_method: String,
    pub proof_value: String,
}

impl Proof {
    /// Splits `verification_method` of the form `"ed25519:<base64url-pubkey>"`.
    pub fn parse_verification_method(&self) -> crate::error::Result<(String, Vec<u8>)> {
        let (alg, key_b64) = self.verification_method.split_once(':').ok_or_else(|| {
            AgentPayError::crypto("signature_malformed", "verification_method missing algorithm separator")
        })?;
        let key = base64_url_decode(key_b64)
            .map_err(|_| AgentPayError::crypto("signature_malformed", "public key is not valid base64url"))?;
        Ok((alg.to_ascii_lowercase(), key))
    }

    pub fn decode_signature(&self) -> crate::error::Result<Vec<u8>> {
        base64_url_decode(&self.proof_value)
            .map_err(|_| AgentPayError::crypto("signature_malformed", "proof_value is not valid base64"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandateBase {
    pub mandate_id: MandateId,
    pub kind: MandateKind,
    pub subject: AgentId,
    pub issuer: String,
    pub purpose: String,
    pub expires_at: DateTime<Utc>,
    pub nonce: String,
    pub proof: Proof,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentMandate {
    #[serde(flatten)]
    pub base: MandateBase,
    pub requested_amount_minor: Option<i64>,
    pub merchant_category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub unit_price_minor: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartMandate {
    #[serde(flatten)]
    pub base: MandateBase,
    pub merchant_domain: String,
    pub line_items: Vec<LineItem>,
    pub subtotal_minor: i64,
    pub taxes_minor: i64,
    pub shipping_minor: Option<i64>,
    pub discounts: Vec<Discount>,
}

impl CartMandate {
    /// `total = subtotal + taxes + shipping − Σ discounts`, clamped to `≥ 0` per spec.md §3.
    pub fn total_minor(&self) -> i64 {
        let discount_total: i64 = self.discounts.iter().map(|d| d.apply_to(self.subtotal_minor)).sum();
        let raw = self.subtotal_minor + self.taxes_minor + self.shipping_minor.unwrap_or(0) - discount_total;
        raw.max(0)
    }

    pub fn cart_total_bound(&self) -> i64 {
        self.subtotal_minor + self.taxes_minor
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMandate {
    #[serde(flatten)]
    pub base: MandateBase,
    pub cart_id: MandateId,
    pub checkout_id: MandateId,
    /// The domain the payment is being settled against; compared to `cart.merchant_domain`.
    pub domain: String,
    pub chain: String,
    pub token: String,
    pub amount_minor: i64,
    pub destination: String,
    pub audit_hash: String,
}

impl PaymentMandate {
    /// `audit_hash = SHA-256("{cart_id}:{checkout_id}:{amount_minor}:{chain}:{token}:{destination}")`
    /// (spec.md §3 invariant).
    pub fn compute_audit_hash(
        cart_id: &MandateId,
        checkout_id: &MandateId,
        amount_minor: i64,
        chain: &str,
        token: &str,
        destination: &str,
    ) -> String {
        let material = format!(
            "{}:{}:{}:{}:{}:{}",
            cart_id, checkout_id, amount_minor, chain, token, destination
        );
        hex_sha256(material.as_bytes())
    }

    pub fn verify_audit_hash(&self) -> bool {
        let expected = Self::compute_audit_hash(
            &self.cart_id,
            &self.checkout_id,
            self.amount_minor,
            &self.chain,
            &self.token,
            &self.destination,
        );
        expected == self.audit_hash
    }

    /// Signature base for payment mandates: the pipe-joined tuple of spec.md §4.1/§6.
    pub fn pipe_signature_base(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.base.mandate_id,
            self.base.subject,
            self.amount_minor,
            self.token,
            self.chain,
            self.destination,
            self.audit_hash
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutMandate {
    #[serde(flatten)]
    pub base: MandateBase,
    pub cart_mandate_id: MandateId,
    pub authorized_amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandateChain {
    pub intent: IntentMandate,
    pub cart: CartMandate,
    pub payment: PaymentMandate,
}

/// Canonicalization mode selectable per verification request (spec.md §4.1, Open Question).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalizationMode {
    #[default]
    PipeJoined,
    Jcs,
}

/// JCS (RFC 8785)-flavored canonicalization: recursively sort object keys and serialize with
/// compact separators. Used both for signature bases under `CanonicalizationMode::Jcs` and
/// for the audit-ledger entry hash (spec.md §3, §4.7), which always uses this form
/// regardless of the mandate-signing mode.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let sorted = sort_keys(value);
    serde_json::to_string(&sorted).expect("canonical JSON serialization never fails")
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[k]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

pub fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// Base64url (no padding), the form spec.md §6 uses for `proof_value` and the embedded
/// public key in `verification_method`.
pub fn base64_url_decode(input: &str) -> Result<Vec<u8>, ()> {
    URL_SAFE_NO_PAD.decode(input.trim_end_matches('=')).map_err(|_| ())
}

pub fn base64_url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cart_total_clamps_to_zero() {
        let base = dummy_base(MandateKind::Cart);
        let cart = CartMandate {
            base,
            merchant_domain: "merchant.example".into(),
            line_items: vec![],
            subtotal_minor: 100,
            taxes_minor: 0,
            shipping_minor: None,
            discounts: vec![crate::money::Discount::Fixed { amount_minor: 500 }],
        };
        assert_eq!(cart.total_minor(), 0);
    }

    #[test]
    fn audit_hash_is_deterministic() {
        let cart_id = MandateId::from_raw("mandate_cart1");
        let checkout_id = MandateId::from_raw("mandate_checkout1");
        let a = PaymentMandate::compute_audit_hash(&cart_id, &checkout_id, 5000, "base", "USDC", "0xabc");
        let b = PaymentMandate::compute_audit_hash(&cart_id, &checkout_id, 5000, "base", "USDC", "0xabc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let v = serde_json::json!({"b": 1, "a": {"z": 1, "y": 2}});
        assert_eq!(canonical_json(&v), r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn base64_url_round_trips() {
        let bytes = b"hello agentpay";
        let encoded = base64_url_encode(bytes);
        let decoded = base64_url_decode(&encoded).unwrap();
        assert_eq!(decoded, bytes);
    }

    fn dummy_base(kind: MandateKind) -> MandateBase {
        MandateBase {
            mandate_id: MandateId::new(),
            kind,
            subject: AgentId::new(),
            issuer: "issuer.example".into(),
            purpose: "test".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            nonce: "n1".into(),
            proof: Proof {
                verification_method: "ed25519:AAAA".into(),
                proof_value: "AAAA".into(),
            },
        }
    }
}
