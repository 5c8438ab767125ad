//! UCP checkout session state machine (spec.md §4.4).
//!
//! Grounded on the `CartMandate`/`CheckoutMandate`/`PaymentMandate` shapes of
//! [`crate::mandate`] and on the teacher's `ibank-core` state-machine idiom (an enum of
//! states plus a `can_transition_to` adjacency check, as in
//! [`crate::ledger::canonical::CanonicalState`]).

use crate::error::{AgentPayError, Result};
use crate::ids::{AgentId, CheckoutSessionId, MandateId};
use crate::mandate::{CartMandate, CheckoutMandate, LineItem, MandateBase, MandateKind, PaymentMandate, Proof};
use crate::money::{apply_tax_rate_bps, Discount};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    Open,
    PendingPayment,
    RequiresEscalation,
    Completed,
    Cancelled,
    Expired,
}

impl CheckoutState {
    fn can_transition_to(&self, target: CheckoutState) -> bool {
        use CheckoutState::*;
        match (self, target) {
            (Open, PendingPayment | RequiresEscalation | Cancelled | Expired) => true,
            (PendingPayment, Completed | Open | Expired) => true,
            (RequiresEscalation, Open | Expired) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutTotals {
    pub subtotal_minor: i64,
    pub taxes_minor: i64,
    pub shipping_minor: i64,
    pub discount_total_minor: i64,
    pub total_minor: i64,
}

/// Recomputes totals per spec.md §4.4: `subtotal = Σ lines`, `taxes = round(subtotal · tax_rate)`,
/// discounts applied against `subtotal`, `total = max(0, subtotal + taxes + shipping − Σ discounts)`.
pub fn recompute_totals(
    line_items: &[LineItem],
    tax_rate_bps: u32,
    shipping_minor: i64,
    discounts: &[Discount],
) -> CheckoutTotals {
    let subtotal_minor: i64 = line_items.iter().map(|l| l.unit_price_minor * l.quantity as i64).sum();
    let taxes_minor = apply_tax_rate_bps(subtotal_minor, tax_rate_bps);
    let discount_total_minor: i64 = discounts.iter().map(|d| d.apply_to(subtotal_minor)).sum();
    let total_minor = (subtotal_minor + taxes_minor + shipping_minor - discount_total_minor).max(0);
    CheckoutTotals { subtotal_minor, taxes_minor, shipping_minor, discount_total_minor, total_minor }
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: CheckoutSessionId,
    pub agent_id: AgentId,
    pub merchant_domain: String,
    pub state: CheckoutState,
    pub line_items: Vec<LineItem>,
    pub tax_rate_bps: u32,
    pub shipping_minor: i64,
    pub discounts: Vec<Discount>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cart_mandate_id: Option<MandateId>,
    pub checkout_mandate_id: Option<MandateId>,
    pub payment_mandate_id: Option<MandateId>,
}

impl CheckoutSession {
    pub fn new(agent_id: AgentId, merchant_domain: String, currency: String, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            session_id: CheckoutSessionId::new(),
            agent_id,
            merchant_domain,
            state: CheckoutState::Open,
            line_items: Vec::new(),
            tax_rate_bps: 0,
            shipping_minor: 0,
            discounts: Vec::new(),
            currency,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            cart_mandate_id: None,
            checkout_mandate_id: None,
            payment_mandate_id: None,
        }
    }

    pub fn totals(&self) -> CheckoutTotals {
        recompute_totals(&self.line_items, self.tax_rate_bps, self.shipping_minor, &self.discounts)
    }

    /// Lazily applies TTL expiration before any mutation, per spec.md §4.4.
    fn expire_if_past_ttl(&mut self, now: DateTime<Utc>) {
        if self.state != CheckoutState::Expired && now > self.expires_at && self.state.can_transition_to(CheckoutState::Expired) {
            self.state = CheckoutState::Expired;
            self.updated_at = now;
        }
    }

    fn require_open(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expire_if_past_ttl(now);
        if self.state != CheckoutState::Open {
            return Err(AgentPayError::state("invalid_operation", format!("checkout session is not OPEN (state: {:?})", self.state)));
        }
        Ok(())
    }

    pub fn add_line_item(&mut self, item: LineItem, now: DateTime<Utc>) -> Result<()> {
        self.require_open(now)?;
        self.line_items.push(item);
        self.updated_at = now;
        Ok(())
    }

    pub fn set_shipping(&mut self, shipping_minor: i64, now: DateTime<Utc>) -> Result<()> {
        self.require_open(now)?;
        self.shipping_minor = shipping_minor;
        self.updated_at = now;
        Ok(())
    }

    pub fn add_discount(&mut self, discount: Discount, now: DateTime<Utc>) -> Result<()> {
        self.require_open(now)?;
        self.discounts.push(discount);
        self.updated_at = now;
        Ok(())
    }

    pub fn set_tax_rate_bps(&mut self, tax_rate_bps: u32, now: DateTime<Utc>) -> Result<()> {
        self.require_open(now)?;
        self.tax_rate_bps = tax_rate_bps;
        self.updated_at = now;
        Ok(())
    }

    pub fn escalate(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expire_if_past_ttl(now);
        if !self.state.can_transition_to(CheckoutState::RequiresEscalation) {
            return Err(AgentPayError::state("invalid_operation", "cannot escalate from current state"));
        }
        self.state = CheckoutState::RequiresEscalation;
        self.updated_at = now;
        Ok(())
    }

    pub fn resolve_escalation(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != CheckoutState::RequiresEscalation {
            return Err(AgentPayError::state("invalid_operation", "session is not under escalation"));
        }
        self.state = CheckoutState::Open;
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expire_if_past_ttl(now);
        if !self.state.can_transition_to(CheckoutState::Cancelled) {
            return Err(AgentPayError::state("invalid_operation", "cannot cancel from current state"));
        }
        self.state = CheckoutState::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// `pay_ok`/`pay_fail` transitions out of PENDING_PAYMENT (spec.md §4.4 diagram).
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != CheckoutState::PendingPayment {
            return Err(AgentPayError::state("invalid_operation", "session is not awaiting payment"));
        }
        self.state = CheckoutState::Completed;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_payment_failed(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != CheckoutState::PendingPayment {
            return Err(AgentPayError::state("invalid_operation", "session is not awaiting payment"));
        }
        self.state = CheckoutState::Open;
        self.updated_at = now;
        Ok(())
    }

    /// `complete` (spec.md §4.4): requires a non-empty cart and a non-escalated OPEN
    /// session; builds the cart, checkout, and payment mandates in one atomic step, links
    /// them `cart → checkout → payment`, and computes the payment audit hash.
    #[allow(clippy::too_many_arguments)]
    pub fn complete(
        &mut self,
        issuer: String,
        chain: String,
        token: String,
        destination: String,
        proof: Proof,
        mandate_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(CartMandate, CheckoutMandate, PaymentMandate)> {
        self.require_open(now)?;
        if self.line_items.is_empty() {
            return Err(AgentPayError::state("empty_cart", "cannot complete checkout with an empty cart"));
        }

        let totals = self.totals();
        let cart_mandate_id = MandateId::new();
        let checkout_mandate_id = MandateId::new();
        let payment_mandate_id = MandateId::new();

        let cart = CartMandate {
            base: MandateBase {
                mandate_id: cart_mandate_id.clone(),
                kind: MandateKind::Cart,
                subject: self.agent_id.clone(),
                issuer: issuer.clone(),
                purpose: "checkout_cart".to_string(),
                expires_at: now + mandate_ttl,
                nonce: format!("nonce_{}", uuid::Uuid::new_v4().simple()),
                proof: proof.clone(),
            },
            merchant_domain: self.merchant_domain.clone(),
            line_items: self.line_items.clone(),
            subtotal_minor: totals.subtotal_minor,
            taxes_minor: totals.taxes_minor,
            shipping_minor: Some(totals.shipping_minor),
            discounts: self.discounts.clone(),
        };

        let checkout = CheckoutMandate {
            base: MandateBase {
                mandate_id: checkout_mandate_id.clone(),
                kind: MandateKind::Checkout,
                subject: self.agent_id.clone(),
                issuer: issuer.clone(),
                purpose: "checkout_authorization".to_string(),
                expires_at: now + mandate_ttl,
                nonce: format!("nonce_{}", uuid::Uuid::new_v4().simple()),
                proof: proof.clone(),
            },
            cart_mandate_id: cart_mandate_id.clone(),
            authorized_amount_minor: totals.total_minor,
            currency: self.currency.clone(),
        };

        let audit_hash = PaymentMandate::compute_audit_hash(
            &cart_mandate_id,
            &checkout_mandate_id,
            totals.total_minor,
            &chain,
            &token,
            &destination,
        );

        let payment = PaymentMandate {
            base: MandateBase {
                mandate_id: payment_mandate_id.clone(),
                kind: MandateKind::Payment,
                subject: self.agent_id.clone(),
                issuer,
                purpose: "checkout_payment".to_string(),
                expires_at: now + mandate_ttl,
                nonce: format!("nonce_{}", uuid::Uuid::new_v4().simple()),
                proof,
            },
            cart_id: cart_mandate_id.clone(),
            checkout_id: checkout_mandate_id.clone(),
            domain: self.merchant_domain.clone(),
            chain,
            token,
            amount_minor: totals.total_minor,
            destination,
            audit_hash,
        };

        self.cart_mandate_id = Some(cart_mandate_id);
        self.checkout_mandate_id = Some(checkout_mandate_id);
        self.payment_mandate_id = Some(payment_mandate_id);
        self.state = CheckoutState::PendingPayment;
        self.updated_at = now;

        Ok((cart, checkout, payment))
    }
}

/// Background sweeper (spec.md §4.4: "a background sweeper every 60 s"). Pure function so
/// the `tokio::spawn` scheduling can live in `agentpay-service`.
pub fn sweep_expired(sessions: &mut [CheckoutSession], now: DateTime<Utc>) -> usize {
    let mut swept = 0;
    for session in sessions.iter_mut() {
        let before = session.state;
        session.expire_if_past_ttl(now);
        if session.state != before {
            swept += 1;
        }
    }
    swept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> LineItem {
        LineItem { name: "widget".into(), quantity: 2, unit_price_minor: 1500 }
    }

    fn proof() -> Proof {
        Proof { verification_method: "ed25519:AAAA".into(), proof_value: "AAAA".into() }
    }

    #[test]
    fn totals_recompute_with_tax_and_discount() {
        let discounts = vec![Discount::Percentage { basis_points: 1000 }];
        let totals = recompute_totals(&[line()], 825, 500, &discounts);
        assert_eq!(totals.subtotal_minor, 3000);
        assert_eq!(totals.discount_total_minor, 300);
        assert!(totals.total_minor > 0);
    }

    #[test]
    fn complete_requires_nonempty_cart() {
        let mut session = CheckoutSession::new(AgentId::new(), "merchant.example".into(), "USD".into(), Duration::minutes(30), Utc::now());
        let result = session.complete(
            "issuer".into(),
            "base".into(),
            "USDC".into(),
            "0xdest".into(),
            proof(),
            Duration::minutes(10),
            Utc::now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn complete_links_mandates_and_transitions_to_pending_payment() {
        let mut session = CheckoutSession::new(AgentId::new(), "merchant.example".into(), "USD".into(), Duration::minutes(30), Utc::now());
        session.add_line_item(line(), Utc::now()).unwrap();
        let (cart, checkout, payment) = session
            .complete("issuer".into(), "base".into(), "USDC".into(), "0xdest".into(), proof(), Duration::minutes(10), Utc::now())
            .unwrap();
        assert_eq!(checkout.cart_mandate_id, cart.base.mandate_id);
        assert_eq!(payment.cart_id, cart.base.mandate_id);
        assert_eq!(payment.checkout_id, checkout.base.mandate_id);
        assert!(payment.verify_audit_hash());
        assert_eq!(session.state, CheckoutState::PendingPayment);
    }

    #[test]
    fn mutation_after_completion_is_rejected() {
        let mut session = CheckoutSession::new(AgentId::new(), "merchant.example".into(), "USD".into(), Duration::minutes(30), Utc::now());
        session.add_line_item(line(), Utc::now()).unwrap();
        session
            .complete("issuer".into(), "base".into(), "USDC".into(), "0xdest".into(), proof(), Duration::minutes(10), Utc::now())
            .unwrap();
        assert!(session.add_line_item(line(), Utc::now()).is_err());
    }

    #[test]
    fn expires_lazily_past_ttl() {
        let mut session = CheckoutSession::new(AgentId::new(), "merchant.example".into(), "USD".into(), Duration::seconds(1), Utc::now());
        let later = Utc::now() + Duration::seconds(5);
        assert!(session.add_line_item(line(), later).is_err());
        assert_eq!(session.state, CheckoutState::Expired);
    }

    #[test]
    fn escalation_round_trips_to_open() {
        let mut session = CheckoutSession::new(AgentId::new(), "merchant.example".into(), "USD".into(), Duration::minutes(30), Utc::now());
        session.escalate(Utc::now()).unwrap();
        assert_eq!(session.state, CheckoutState::RequiresEscalation);
        session.resolve_escalation(Utc::now()).unwrap();
        assert_eq!(session.state, CheckoutState::Open);
    }
}
