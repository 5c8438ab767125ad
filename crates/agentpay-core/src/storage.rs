//! Repository traits and their in-memory implementations (spec.md §6, §9 "Global state").
//!
//! Persistence backends are opaque per spec.md §1 Out of scope: any store offering atomic
//! insert-or-update, conditional update, and indexed scans suffices. This module specifies
//! the contracts and ships an in-memory implementation of each, grounded on the teacher's
//! `PersistentLedger`/`PostgresLedgerStore` split — a `Mutex`/`RwLock`-backed store for tests
//! and local runs, with the shape a `sqlx` Postgres-backed store would mirror.

use crate::error::{AgentPayError, Result};
use crate::ids::{JourneyId, MandateId};
use crate::mandate::MandateChain;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Mandate archive (spec.md §3, §6): keys on `payment.mandate_id`, idempotent upsert.
/// `accept_chain` additionally performs the replay-cache insert in the same critical
/// section so the pair is atomic to external observers (spec.md §4.1, §5).
#[async_trait]
pub trait MandateArchive: Send + Sync {
    /// Attempts to accept `chain` exactly once: if the replay cache already holds an active
    /// entry for `chain.payment.mandate_id`, returns `Ok(false)` and performs no write.
    /// Otherwise stores the chain and the replay entry atomically and returns `Ok(true)`.
    async fn accept_chain(&self, chain: MandateChain, expires_at: DateTime<Utc>) -> Result<bool>;

    async fn find_chain(&self, mandate_id: &MandateId) -> Result<Option<MandateChain>>;

    async fn contains_active(&self, mandate_id: &MandateId) -> Result<bool>;

    async fn len(&self) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryMandateArchive {
    inner: Mutex<ArchiveInner>,
}

#[derive(Default)]
struct ArchiveInner {
    chains: HashMap<String, MandateChain>,
    replay: HashMap<String, DateTime<Utc>>,
}

impl InMemoryMandateArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MandateArchive for InMemoryMandateArchive {
    async fn accept_chain(&self, chain: MandateChain, expires_at: DateTime<Utc>) -> Result<bool> {
        let mut guard = self.inner.lock().map_err(|_| AgentPayError::Internal("mandate archive mutex poisoned".into()))?;
        let key = chain.payment.base.mandate_id.as_str().to_string();
        let now = Utc::now();
        if let Some(existing) = guard.replay.get(&key) {
            if *existing > now {
                return Ok(false);
            }
        }
        guard.replay.insert(key.clone(), expires_at);
        guard.chains.insert(key, chain);
        Ok(true)
    }

    async fn find_chain(&self, mandate_id: &MandateId) -> Result<Option<MandateChain>> {
        let guard = self.inner.lock().map_err(|_| AgentPayError::Internal("mandate archive mutex poisoned".into()))?;
        Ok(guard.chains.get(mandate_id.as_str()).cloned())
    }

    async fn contains_active(&self, mandate_id: &MandateId) -> Result<bool> {
        let guard = self.inner.lock().map_err(|_| AgentPayError::Internal("mandate archive mutex poisoned".into()))?;
        Ok(guard
            .replay
            .get(mandate_id.as_str())
            .map(|exp| *exp > Utc::now())
            .unwrap_or(false))
    }

    async fn len(&self) -> Result<usize> {
        let guard = self.inner.lock().map_err(|_| AgentPayError::Internal("mandate archive mutex poisoned".into()))?;
        Ok(guard.chains.len())
    }
}

/// Canonical journey repository (spec.md §4.6, §6): upsert by natural key
/// `(organization_id, rail, external_reference)`, conditional update by `journey_id`.
#[async_trait]
pub trait CanonicalJourneyRepository: Send + Sync {
    async fn upsert_by_natural_key(
        &self,
        journey: crate::ledger::canonical::CanonicalJourney,
    ) -> Result<crate::ledger::canonical::CanonicalJourney>;

    async fn get(&self, journey_id: &JourneyId) -> Result<Option<crate::ledger::canonical::CanonicalJourney>>;

    async fn save(&self, journey: crate::ledger::canonical::CanonicalJourney) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryJourneyRepository {
    by_id: Mutex<HashMap<String, crate::ledger::canonical::CanonicalJourney>>,
}

impl InMemoryJourneyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CanonicalJourneyRepository for InMemoryJourneyRepository {
    async fn upsert_by_natural_key(
        &self,
        journey: crate::ledger::canonical::CanonicalJourney,
    ) -> Result<crate::ledger::canonical::CanonicalJourney> {
        let mut guard = self.by_id.lock().map_err(|_| AgentPayError::Internal("journey repo mutex poisoned".into()))?;
        let key = journey.journey_id.as_str().to_string();
        let entry = guard.entry(key).or_insert_with(|| journey.clone());
        Ok(entry.clone())
    }

    async fn get(&self, journey_id: &JourneyId) -> Result<Option<crate::ledger::canonical::CanonicalJourney>> {
        let guard = self.by_id.lock().map_err(|_| AgentPayError::Internal("journey repo mutex poisoned".into()))?;
        Ok(guard.get(journey_id.as_str()).cloned())
    }

    async fn save(&self, journey: crate::ledger::canonical::CanonicalJourney) -> Result<()> {
        let mut guard = self.by_id.lock().map_err(|_| AgentPayError::Internal("journey repo mutex poisoned".into()))?;
        guard.insert(journey.journey_id.as_str().to_string(), journey);
        Ok(())
    }
}

/// Idempotency-key cache for create-payment/fund/withdraw/plugin-invoke endpoints
/// (spec.md §5): a repeated request with the same key returns the cached response for up
/// to 7 days.
#[derive(Default)]
pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, (DateTime<Utc>, serde_json::Value)>>,
}

impl IdempotencyCache {
    pub const TTL_DAYS: i64 = 7;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with(
        &self,
        key: &str,
        compute: impl FnOnce() -> serde_json::Value,
    ) -> serde_json::Value {
        let mut guard = self.entries.lock().expect("idempotency cache mutex poisoned");
        let now = Utc::now();
        if let Some((expires_at, cached)) = guard.get(key) {
            if *expires_at > now {
                return cached.clone();
            }
        }
        let value = compute();
        guard.insert(key.to_string(), (now + chrono::Duration::days(Self::TTL_DAYS), value.clone()));
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::AgentId;
    use crate::mandate::{CartMandate, IntentMandate, MandateBase, MandateKind, PaymentMandate, Proof};

    fn make_base(kind: MandateKind, subject: AgentId) -> MandateBase {
        MandateBase {
            mandate_id: MandateId::new(),
            kind,
            subject,
            issuer: "issuer.example".into(),
            purpose: "test".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            nonce: "n".into(),
            proof: Proof { verification_method: "ed25519:AAAA".into(), proof_value: "AAAA".into() },
        }
    }

    fn make_chain() -> MandateChain {
        let subject = AgentId::new();
        let intent = IntentMandate {
            base: make_base(MandateKind::Intent, subject.clone()),
            requested_amount_minor: Some(5000),
            merchant_category: None,
        };
        let cart = CartMandate {
            base: make_base(MandateKind::Cart, subject.clone()),
            merchant_domain: "merchant.example".into(),
            line_items: vec![],
            subtotal_minor: 5000,
            taxes_minor: 0,
            shipping_minor: None,
            discounts: vec![],
        };
        let cart_id = cart.base.mandate_id.clone();
        let checkout_id = MandateId::new();
        let payment_base = make_base(MandateKind::Payment, subject);
        let mandate_id = payment_base.mandate_id.clone();
        let audit_hash = PaymentMandate::compute_audit_hash(&cart_id, &checkout_id, 5000, "base", "USDC", "0xdead");
        let payment = PaymentMandate {
            base: payment_base,
            cart_id,
            checkout_id,
            domain: "merchant.example".into(),
            chain: "base".into(),
            token: "USDC".into(),
            amount_minor: 5000,
            destination: "0xdead".into(),
            audit_hash,
        };
        let _ = mandate_id;
        MandateChain { intent, cart, payment }
    }

    #[tokio::test]
    async fn second_accept_of_same_mandate_is_rejected() {
        let archive = InMemoryMandateArchive::new();
        let chain = make_chain();
        let expiry = Utc::now() + chrono::Duration::hours(1);
        assert!(archive.accept_chain(chain.clone(), expiry).await.unwrap());
        assert!(!archive.accept_chain(chain, expiry).await.unwrap());
        assert_eq!(archive.len().await.unwrap(), 1);
    }
}
