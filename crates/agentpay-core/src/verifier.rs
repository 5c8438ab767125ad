//! Mandate chain verifier (spec.md §4.1): the twelve ordered checks that decide whether an
//! (intent, cart, payment) triple is accepted and archived exactly once.

use crate::error::{AgentPayError, Result};
use crate::identity::{verify_signature, IdentityRegistry, SignatureAlgorithm};
use crate::mandate::{CanonicalizationMode, CartMandate, IntentMandate, MandateChain, MandateKind, PaymentMandate};
use crate::ratelimit::{SlidingWindowLimiter, WindowSet};
use crate::storage::MandateArchive;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Everything the verifier needs beyond the mandates themselves: the domain allow-list and
/// the windows for the per-agent rate limit (spec.md §4.1 checks 8, 10).
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub allowed_domains: HashSet<String>,
    pub rate_limit_windows: WindowSet,
}

impl VerifierConfig {
    pub fn new(allowed_domains: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_domains: allowed_domains.into_iter().collect(),
            rate_limit_windows: WindowSet::velocity_defaults(),
        }
    }
}

pub struct VerifiedChain {
    pub chain: MandateChain,
}

pub struct MandateVerifier {
    archive: Arc<dyn MandateArchive>,
    identity: Arc<dyn IdentityRegistry>,
    rate_limiter: SlidingWindowLimiter,
    config: VerifierConfig,
}

impl MandateVerifier {
    pub fn new(archive: Arc<dyn MandateArchive>, identity: Arc<dyn IdentityRegistry>, config: VerifierConfig) -> Self {
        Self { archive, identity, rate_limiter: SlidingWindowLimiter::new(), config }
    }

    /// Runs the full twelve-check pipeline (spec.md §4.1) and, on success, archives the
    /// chain atomically with the replay-cache insert via [`MandateArchive::accept_chain`].
    pub async fn verify_chain(
        &self,
        intent: IntentMandate,
        cart: CartMandate,
        payment: PaymentMandate,
        mode: CanonicalizationMode,
    ) -> Result<VerifiedChain> {
        // 1. Structural parse: every mandate's proof must carry base64-decodable proof_value.
        intent.base.proof.decode_signature()?;
        cart.base.proof.decode_signature()?;
        payment.base.proof.decode_signature()?;

        // 2. Type/purpose match per role.
        check_role(&intent.base.kind, MandateKind::Intent, &intent.base.purpose, "intent")?;
        check_role(&cart.base.kind, MandateKind::Cart, &cart.base.purpose, "cart")?;
        check_role(&payment.base.kind, MandateKind::Payment, &payment.base.purpose, "checkout")?;

        // 3. Expiry, monotonic clock.
        let now = Utc::now();
        for (label, expires_at) in [
            ("intent", intent.base.expires_at),
            ("cart", cart.base.expires_at),
            ("payment", payment.base.expires_at),
        ] {
            if expires_at <= now {
                return Err(AgentPayError::validation(
                    "mandate_expired",
                    format!("{} mandate expired at {}", label, expires_at),
                ));
            }
        }

        // 4. All three share the same subject.
        if intent.base.subject != cart.base.subject || cart.base.subject != payment.base.subject {
            return Err(AgentPayError::validation("subject_mismatch", "intent, cart, and payment mandates disagree on subject"));
        }

        // 5. cart.merchant_domain == payment.domain.
        if cart.merchant_domain != payment.domain {
            return Err(AgentPayError::validation(
                "merchant_domain_mismatch",
                format!("cart merchant_domain '{}' != payment domain '{}'", cart.merchant_domain, payment.domain),
            ));
        }

        // 6. payment.amount_minor <= cart total bound.
        if payment.amount_minor > cart.cart_total_bound() {
            return Err(AgentPayError::validation(
                "payment_exceeds_cart_total",
                format!("payment amount {} exceeds cart total bound {}", payment.amount_minor, cart.cart_total_bound()),
            ));
        }

        // 7. If intent.requested_amount_minor set, payment.amount_minor <= it.
        if let Some(requested) = intent.requested_amount_minor {
            if payment.amount_minor > requested {
                return Err(AgentPayError::validation(
                    "payment_exceeds_intent_amount",
                    format!("payment amount {} exceeds intent requested amount {}", payment.amount_minor, requested),
                ));
            }
        }

        // 8. payment.domain is in the configured allow-list.
        if !self.config.allowed_domains.contains(&payment.domain) {
            return Err(AgentPayError::auth(
                "domain_not_authorized",
                format!("domain '{}' is not in the configured allow-list", payment.domain),
            ));
        }

        // 10. Per-agent rate limit, ahead of identity/signature work so a throttled agent
        // never pays the cost of cryptographic verification (spec.md §5).
        let agent_key = payment.base.subject.as_str();
        if let Some(window) = self.rate_limiter.check_and_record(agent_key, &self.config.rate_limit_windows, now) {
            return Err(AgentPayError::rate_limit(
                window.reason_code(),
                format!("agent '{}' exceeded its {:?} mandate submission rate", agent_key, window),
            ));
        }

        // 11. Identity resolution.
        let (alg_label, public_key) = payment.base.proof.parse_verification_method()?;
        let algorithm = SignatureAlgorithm::parse(&alg_label)?;
        let bound = self
            .identity
            .verify_binding(&payment.base.subject, &payment.domain, &public_key, &alg_label)
            .await?;
        if !bound {
            return Err(AgentPayError::auth(
                "identity_not_resolved",
                format!("no registered binding for agent '{}' on domain '{}'", agent_key, payment.domain),
            ));
        }

        // 12. Signature verification over the canonical base.
        let message = match mode {
            CanonicalizationMode::PipeJoined => payment.pipe_signature_base().into_bytes(),
            CanonicalizationMode::Jcs => {
                let value = serde_json::to_value(&payment)
                    .map_err(|e| AgentPayError::Internal(format!("payment mandate did not serialize: {}", e)))?;
                crate::mandate::canonical_json(&value).into_bytes()
            }
        };
        let signature = payment.base.proof.decode_signature()?;
        let ok = verify_signature(algorithm, &public_key, &message, &signature)?;
        if !ok {
            return Err(AgentPayError::crypto("signature_invalid", "payment mandate signature does not verify"));
        }

        // 9 + archive: atomic replay-cache insert and archive upsert, keyed on mandate_id.
        let chain = MandateChain { intent, cart, payment };
        let expires_at = chain.payment.base.expires_at;
        let accepted = self.archive.accept_chain(chain.clone(), expires_at).await?;
        if !accepted {
            return Err(AgentPayError::state(
                "mandate_replayed",
                format!("payment mandate '{}' was already accepted", chain.payment.base.mandate_id),
            ));
        }

        Ok(VerifiedChain { chain })
    }

    /// Single-mandate fast path (spec.md §4.1): re-runs the checks that apply to a lone
    /// payment mandate outside a full chain — structural parse, type/purpose, expiry,
    /// domain allow-list, identity resolution, and signature verification. Skips the
    /// cross-mandate checks (subject match, cart/intent bounds) and does not touch the
    /// replay cache or archive, since there is no chain to store.
    pub async fn verify_payment(&self, payment: &PaymentMandate, mode: CanonicalizationMode) -> Result<()> {
        payment.base.proof.decode_signature()?;
        check_role(&payment.base.kind, MandateKind::Payment, &payment.base.purpose, "checkout")?;

        if payment.base.expires_at <= Utc::now() {
            return Err(AgentPayError::validation("mandate_expired", "payment mandate has expired"));
        }
        if !self.config.allowed_domains.contains(&payment.domain) {
            return Err(AgentPayError::auth(
                "domain_not_authorized",
                format!("domain '{}' is not in the configured allow-list", payment.domain),
            ));
        }

        let (alg_label, public_key) = payment.base.proof.parse_verification_method()?;
        let algorithm = SignatureAlgorithm::parse(&alg_label)?;
        let bound = self
            .identity
            .verify_binding(&payment.base.subject, &payment.domain, &public_key, &alg_label)
            .await?;
        if !bound {
            return Err(AgentPayError::auth("identity_not_resolved", "no registered binding for this agent/domain/key"));
        }

        let message = match mode {
            CanonicalizationMode::PipeJoined => payment.pipe_signature_base().into_bytes(),
            CanonicalizationMode::Jcs => {
                let value = serde_json::to_value(payment)
                    .map_err(|e| AgentPayError::Internal(format!("payment mandate did not serialize: {}", e)))?;
                crate::mandate::canonical_json(&value).into_bytes()
            }
        };
        let signature = payment.base.proof.decode_signature()?;
        let ok = verify_signature(algorithm, &public_key, &message, &signature)?;
        if !ok {
            return Err(AgentPayError::crypto("signature_invalid", "payment mandate signature does not verify"));
        }
        Ok(())
    }
}

fn check_role(kind: &MandateKind, expected_kind: MandateKind, purpose: &str, expected_purpose: &str) -> Result<()> {
    if *kind != expected_kind || purpose != expected_purpose {
        return Err(AgentPayError::validation(
            "type_purpose_mismatch",
            format!(
                "expected kind '{}' and purpose '{}', found kind '{}' and purpose '{}'",
                expected_kind.as_str(),
                expected_purpose,
                kind.as_str(),
                purpose
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AgentId, MandateId};
    use crate::mandate::{LineItem, MandateBase, Proof};
    use crate::storage::InMemoryMandateArchive;
    use async_trait::async_trait;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    struct AlwaysBound;

    #[async_trait]
    impl IdentityRegistry for AlwaysBound {
        async fn verify_binding(&self, _agent_id: &AgentId, _domain: &str, _public_key: &[u8], _algorithm: &str) -> Result<bool> {
            Ok(true)
        }
    }

    struct NeverBound;

    #[async_trait]
    impl IdentityRegistry for NeverBound {
        async fn verify_binding(&self, _agent_id: &AgentId, _domain: &str, _public_key: &[u8], _algorithm: &str) -> Result<bool> {
            Ok(false)
        }
    }

    fn signed_chain(signing_key: &SigningKey, amount_minor: i64, domain: &str) -> MandateChain {
        let subject = AgentId::new();
        let verification_method = format!("ed25519:{}", crate::mandate::base64_url_encode(signing_key.verifying_key().as_bytes()));

        let base = |kind: MandateKind, purpose: &str| MandateBase {
            mandate_id: MandateId::new(),
            kind,
            subject: subject.clone(),
            issuer: "issuer.example".into(),
            purpose: purpose.into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            nonce: "n1".into(),
            proof: Proof { verification_method: verification_method.clone(), proof_value: "AAAA".into() },
        };

        let intent = IntentMandate {
            base: base(MandateKind::Intent, "intent"),
            requested_amount_minor: Some(amount_minor),
            merchant_category: None,
        };
        let cart = CartMandate {
            base: base(MandateKind::Cart, "cart"),
            merchant_domain: domain.into(),
            line_items: vec![LineItem { name: "widget".into(), quantity: 1, unit_price_minor: amount_minor }],
            subtotal_minor: amount_minor,
            taxes_minor: 0,
            shipping_minor: None,
            discounts: vec![],
        };
        let cart_id = cart.base.mandate_id.clone();
        let checkout_id = MandateId::new();
        let audit_hash = PaymentMandate::compute_audit_hash(&cart_id, &checkout_id, amount_minor, "base", "USDC", "0xdead");
        let mut payment_base = base(MandateKind::Payment, "checkout");
        let mut payment = PaymentMandate {
            base: payment_base.clone(),
            cart_id,
            checkout_id,
            domain: domain.into(),
            chain: "base".into(),
            token: "USDC".into(),
            amount_minor,
            destination: "0xdead".into(),
            audit_hash,
        };
        let signature = signing_key.sign(payment.pipe_signature_base().as_bytes());
        payment_base.proof.proof_value = crate::mandate::base64_url_encode(&signature.to_bytes());
        payment.base = payment_base;

        MandateChain { intent, cart, payment }
    }

    fn verifier_with(identity: Arc<dyn IdentityRegistry>, domain: &str) -> MandateVerifier {
        let archive = Arc::new(InMemoryMandateArchive::new());
        let config = VerifierConfig::new([domain.to_string()]);
        MandateVerifier::new(archive, identity, config)
    }

    #[tokio::test]
    async fn valid_chain_is_accepted_exactly_once() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let chain = signed_chain(&signing_key, 5000, "merchant.example");
        let verifier = verifier_with(Arc::new(AlwaysBound), "merchant.example");

        let result = verifier
            .verify_chain(chain.intent.clone(), chain.cart.clone(), chain.payment.clone(), CanonicalizationMode::PipeJoined)
            .await;
        assert!(result.is_ok());

        let replay = verifier
            .verify_chain(chain.intent, chain.cart, chain.payment, CanonicalizationMode::PipeJoined)
            .await;
        let err = replay.unwrap_err();
        assert_eq!(err.code(), "mandate_replayed");
    }

    #[tokio::test]
    async fn domain_not_in_allow_list_is_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let chain = signed_chain(&signing_key, 5000, "other.example");
        let verifier = verifier_with(Arc::new(AlwaysBound), "merchant.example");

        let err = verifier
            .verify_chain(chain.intent, chain.cart, chain.payment, CanonicalizationMode::PipeJoined)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "domain_not_authorized");
    }

    #[tokio::test]
    async fn payment_over_cart_total_is_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let mut chain = signed_chain(&signing_key, 5000, "merchant.example");
        chain.payment.amount_minor = 999_999;
        let verifier = verifier_with(Arc::new(AlwaysBound), "merchant.example");

        let err = verifier
            .verify_chain(chain.intent, chain.cart, chain.payment, CanonicalizationMode::PipeJoined)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "payment_exceeds_cart_total");
    }

    #[tokio::test]
    async fn unresolved_identity_is_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let chain = signed_chain(&signing_key, 5000, "merchant.example");
        let verifier = verifier_with(Arc::new(NeverBound), "merchant.example");

        let err = verifier
            .verify_chain(chain.intent, chain.cart, chain.payment, CanonicalizationMode::PipeJoined)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "identity_not_resolved");
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let mut chain = signed_chain(&signing_key, 5000, "merchant.example");
        chain.payment.amount_minor = 4000;
        // audit_hash and signature no longer match the mutated amount.
        let verifier = verifier_with(Arc::new(AlwaysBound), "merchant.example");

        let err = verifier
            .verify_chain(chain.intent, chain.cart, chain.payment, CanonicalizationMode::PipeJoined)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "signature_invalid");
    }

    #[tokio::test]
    async fn subject_mismatch_is_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let mut chain = signed_chain(&signing_key, 5000, "merchant.example");
        chain.cart.base.subject = AgentId::new();
        let verifier = verifier_with(Arc::new(AlwaysBound), "merchant.example");

        let err = verifier
            .verify_chain(chain.intent, chain.cart, chain.payment, CanonicalizationMode::PipeJoined)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "subject_mismatch");
    }

    #[tokio::test]
    async fn expired_mandate_is_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let mut chain = signed_chain(&signing_key, 5000, "merchant.example");
        chain.payment.base.expires_at = Utc::now() - chrono::Duration::minutes(1);
        let verifier = verifier_with(Arc::new(AlwaysBound), "merchant.example");

        let err = verifier
            .verify_chain(chain.intent, chain.cart, chain.payment, CanonicalizationMode::PipeJoined)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "mandate_expired");
    }
}
