//! Agent-to-agent marketplace protocol: escrow and service-request state machines
//! (spec.md §4.5), plus the service registry that backs discovery (SPEC_FULL.md §C.8).
//!
//! Grounded on `original_source/legacy/sardis_core/marketplace/protocol.py` (`Escrow`,
//! `ServiceRequest`, `PaymentTerms`, `MarketplaceProtocol`) and `registry.py`
//! (`ServiceCategory`, `PricingModel`, `ServiceRating`, `AgentService`, `ServiceRegistry`),
//! translated into the same atomic-mutation idiom as [`crate::ledger::canonical`].

use crate::error::{AgentPayError, Result};
use crate::ids::{AgentId, EscrowId, WalletId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Created,
    Funded,
    Released,
    Refunded,
    Disputed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Disputed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTerms {
    pub total_amount_minor: i64,
    pub currency: String,
    pub upfront_percentage_bps: u32,
    pub use_escrow: bool,
    pub escrow_timeout_hours: i64,
    pub dispute_window_hours: i64,
}

impl Default for PaymentTerms {
    fn default() -> Self {
        Self {
            total_amount_minor: 0,
            currency: "USDC".to_string(),
            upfront_percentage_bps: 0,
            use_escrow: true,
            escrow_timeout_hours: 72,
            dispute_window_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    pub escrow_id: EscrowId,
    pub request_id: String,
    pub payer_agent_id: AgentId,
    pub payer_wallet_id: WalletId,
    pub payee_agent_id: AgentId,
    pub payee_wallet_id: WalletId,
    pub amount_minor: i64,
    pub currency: String,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub funding_tx_id: Option<String>,
    pub release_tx_id: Option<String>,
    pub refund_tx_id: Option<String>,
    pub dispute_reason: Option<String>,
}

impl Escrow {
    pub fn new(
        request_id: String,
        payer_agent_id: AgentId,
        payer_wallet_id: WalletId,
        payee_agent_id: AgentId,
        payee_wallet_id: WalletId,
        amount_minor: i64,
        currency: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            escrow_id: EscrowId::new(),
            request_id,
            payer_agent_id,
            payer_wallet_id,
            payee_agent_id,
            payee_wallet_id,
            amount_minor,
            currency,
            status: EscrowStatus::Created,
            created_at: now,
            funded_at: None,
            released_at: None,
            expires_at: None,
            funding_tx_id: None,
            release_tx_id: None,
            refund_tx_id: None,
            dispute_reason: None,
        }
    }

    pub fn fund(&mut self, tx_id: String, timeout_hours: i64, now: DateTime<Utc>) -> Result<()> {
        if self.status != EscrowStatus::Created {
            return Err(AgentPayError::state("invalid_operation", "escrow is not in CREATED state"));
        }
        self.status = EscrowStatus::Funded;
        self.funded_at = Some(now);
        self.funding_tx_id = Some(tx_id);
        self.expires_at = Some(now + Duration::hours(timeout_hours));
        Ok(())
    }

    pub fn release(&mut self, tx_id: String, now: DateTime<Utc>) -> Result<()> {
        if self.status != EscrowStatus::Funded {
            return Err(AgentPayError::state("invalid_operation", "escrow is not FUNDED"));
        }
        self.status = EscrowStatus::Released;
        self.released_at = Some(now);
        self.release_tx_id = Some(tx_id);
        Ok(())
    }

    pub fn refund(&mut self, tx_id: String, now: DateTime<Utc>) -> Result<()> {
        if self.status != EscrowStatus::Funded {
            return Err(AgentPayError::state("invalid_operation", "escrow is not FUNDED"));
        }
        self.status = EscrowStatus::Refunded;
        self.released_at = Some(now);
        self.refund_tx_id = Some(tx_id);
        Ok(())
    }

    pub fn dispute(&mut self, reason: String) -> Result<()> {
        if self.status != EscrowStatus::Funded {
            return Err(AgentPayError::state("invalid_operation", "only a FUNDED escrow can be disputed"));
        }
        self.status = EscrowStatus::Disputed;
        self.dispute_reason = Some(reason);
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now > exp).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub request_id: String,
    pub requester_agent_id: AgentId,
    pub requester_wallet_id: WalletId,
    pub provider_agent_id: AgentId,
    pub provider_wallet_id: WalletId,
    pub service_id: String,
    pub service_name: String,
    pub payment_terms: PaymentTerms,
    pub escrow_id: Option<EscrowId>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

impl ServiceRequest {
    pub fn new(
        requester_agent_id: AgentId,
        requester_wallet_id: WalletId,
        provider_agent_id: AgentId,
        provider_wallet_id: WalletId,
        service_id: String,
        service_name: String,
        payment_terms: PaymentTerms,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: format!("req_{}", uuid::Uuid::new_v4().simple()),
            requester_agent_id,
            requester_wallet_id,
            provider_agent_id,
            provider_wallet_id,
            service_id,
            service_name,
            payment_terms,
            escrow_id: None,
            status: RequestStatus::Pending,
            created_at: now,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            deadline,
        }
    }

    pub fn accept(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != RequestStatus::Pending {
            return Err(AgentPayError::state("invalid_operation", "request is not PENDING"));
        }
        self.status = RequestStatus::Accepted;
        self.accepted_at = Some(now);
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != RequestStatus::Accepted {
            return Err(AgentPayError::state("invalid_operation", "request is not ACCEPTED"));
        }
        self.status = RequestStatus::InProgress;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if matches!(self.status, RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled) {
            return Err(AgentPayError::state("invalid_operation", "request is already terminal"));
        }
        self.status = RequestStatus::Cancelled;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|d| now > d).unwrap_or(false)
    }

    /// Whether a dispute may still be opened: completed, within `dispute_window_hours`.
    pub fn is_within_dispute_window(&self, now: DateTime<Utc>) -> bool {
        match self.completed_at {
            Some(completed_at) if self.status == RequestStatus::Completed => {
                now <= completed_at + Duration::hours(self.payment_terms.dispute_window_hours)
            }
            _ => false,
        }
    }
}

/// Outcome of [`complete_request`]/[`fail_request`]: the escrow transition, if any, that
/// must happen in the same logical transaction as the request status change (spec.md §4.5:
/// "within the same logical transaction").
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub request: ServiceRequest,
    pub escrow: Option<Escrow>,
}

/// Completes a request and, if its escrow is FUNDED, releases it atomically (spec.md §4.5).
pub fn complete_request(
    mut request: ServiceRequest,
    mut escrow: Option<Escrow>,
    release_tx_id: String,
    now: DateTime<Utc>,
) -> Result<RequestOutcome> {
    if request.status != RequestStatus::InProgress {
        return Err(AgentPayError::state("invalid_operation", "request is not IN_PROGRESS"));
    }
    request.status = RequestStatus::Completed;
    request.completed_at = Some(now);
    if let Some(e) = escrow.as_mut() {
        if e.status == EscrowStatus::Funded {
            e.release(release_tx_id, now)?;
        }
    }
    Ok(RequestOutcome { request, escrow })
}

/// Fails a request and, if its escrow is FUNDED, refunds it atomically (spec.md §4.5).
pub fn fail_request(
    mut request: ServiceRequest,
    mut escrow: Option<Escrow>,
    reason: String,
    refund_tx_id: String,
    now: DateTime<Utc>,
) -> Result<RequestOutcome> {
    request.status = RequestStatus::Failed;
    request.completed_at = Some(now);
    if let Some(e) = escrow.as_mut() {
        if e.status == EscrowStatus::Funded {
            e.refund(refund_tx_id, now)?;
        }
    }
    let _ = reason;
    Ok(RequestOutcome { request, escrow })
}

/// Disputes a completed request, only valid within `payment_terms.dispute_window_hours`
/// (spec.md §4.5).
pub fn dispute_request(mut request: ServiceRequest, mut escrow: Option<Escrow>, reason: String, now: DateTime<Utc>) -> Result<RequestOutcome> {
    if !request.is_within_dispute_window(now) {
        return Err(AgentPayError::state("invalid_operation", "request is not within its dispute window"));
    }
    request.status = RequestStatus::Disputed;
    if let Some(e) = escrow.as_mut() {
        e.dispute(reason)?;
    }
    Ok(RequestOutcome { request, escrow })
}

/// Background sweeper (spec.md §4.5: "swept by a background loop and refunded").
pub fn sweep_expired_escrows(escrows: &mut [Escrow], refund_tx_prefix: &str, now: DateTime<Utc>) -> usize {
    let mut swept = 0;
    for escrow in escrows.iter_mut() {
        if escrow.status == EscrowStatus::Funded && escrow.is_expired(now) {
            let tx_id = format!("{}_{}", refund_tx_prefix, uuid::Uuid::new_v4().simple());
            if escrow.refund(tx_id, now).is_ok() {
                swept += 1;
            }
        }
    }
    swept
}

// ---------------------------------------------------------------------------------------
// Service registry (SPEC_FULL.md §C.8): discovery metadata for marketplace services.
// ---------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Data,
    Compute,
    Tasks,
    Content,
    Translation,
    Analysis,
    Storage,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingModel {
    PerCall,
    PerUnit,
    Subscription,
    Tiered,
    Negotiated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePricing {
    pub model: PricingModel,
    pub base_price_minor: i64,
    pub currency: String,
    pub min_charge_minor: Option<i64>,
    pub max_charge_minor: Option<i64>,
}

impl ServicePricing {
    pub fn calculate_cost(&self, units: i64) -> i64 {
        match self.model {
            PricingModel::PerCall | PricingModel::Subscription | PricingModel::Tiered | PricingModel::Negotiated => self.base_price_minor,
            PricingModel::PerUnit => {
                let cost = self.base_price_minor * units;
                let cost = self.min_charge_minor.map(|min| cost.max(min)).unwrap_or(cost);
                self.max_charge_minor.map(|max| cost.min(max)).unwrap_or(cost)
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRating {
    pub total_ratings: u32,
    pub average_score: f64,
    pub successful_completions: u32,
    pub total_requests: u32,
}

impl ServiceRating {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_completions as f64 / self.total_requests as f64
        }
    }

    /// 60% average rating, 40% success rate, plus a volume bonus capped at 10 points,
    /// overall capped at 100 (`original_source/.../registry.py::ServiceRating.reputation_score`).
    pub fn reputation_score(&self) -> f64 {
        let rating_component = (self.average_score / 5.0) * 60.0;
        let success_component = self.success_rate() * 40.0;
        let volume_bonus = (self.total_requests as f64 / 100.0).min(10.0);
        (rating_component + success_component + volume_bonus).min(100.0)
    }

    pub fn add_rating(&mut self, score: f64, success: bool) {
        let total_score = self.average_score * self.total_ratings as f64 + score;
        self.total_ratings += 1;
        self.average_score = total_score / self.total_ratings as f64;
        self.total_requests += 1;
        if success {
            self.successful_completions += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentService {
    pub service_id: String,
    pub provider_agent_id: AgentId,
    pub provider_wallet_id: WalletId,
    pub name: String,
    pub description: String,
    pub category: ServiceCategory,
    pub tags: Vec<String>,
    pub pricing: ServicePricing,
    pub rating: ServiceRating,
    pub is_active: bool,
    pub is_verified: bool,
    pub max_concurrent_requests: u32,
    pub current_requests: u32,
    pub created_at: DateTime<Utc>,
}

impl AgentService {
    pub fn is_available(&self) -> bool {
        self.is_active && self.current_requests < self.max_concurrent_requests
    }
}

/// In-memory service directory with category/agent indexes
/// (`original_source/.../registry.py::ServiceRegistry`).
#[derive(Default)]
pub struct ServiceRegistry {
    inner: Mutex<ServiceRegistryInner>,
}

#[derive(Default)]
struct ServiceRegistryInner {
    services: HashMap<String, AgentService>,
    by_agent: HashMap<String, Vec<String>>,
    by_category: HashMap<ServiceCategory, Vec<String>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: AgentService) {
        let mut guard = self.inner.lock().expect("service registry mutex poisoned");
        guard.by_agent.entry(service.provider_agent_id.as_str().to_string()).or_default().push(service.service_id.clone());
        guard.by_category.entry(service.category).or_default().push(service.service_id.clone());
        guard.services.insert(service.service_id.clone(), service);
    }

    pub fn get(&self, service_id: &str) -> Option<AgentService> {
        self.inner.lock().expect("service registry mutex poisoned").services.get(service_id).cloned()
    }

    pub fn by_category(&self, category: ServiceCategory) -> Vec<AgentService> {
        let guard = self.inner.lock().expect("service registry mutex poisoned");
        guard
            .by_category
            .get(&category)
            .map(|ids| ids.iter().filter_map(|id| guard.services.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn by_agent(&self, agent_id: &AgentId) -> Vec<AgentService> {
        let guard = self.inner.lock().expect("service registry mutex poisoned");
        guard
            .by_agent
            .get(agent_id.as_str())
            .map(|ids| ids.iter().filter_map(|id| guard.services.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn available(&self) -> Vec<AgentService> {
        self.inner.lock().expect("service registry mutex poisoned").services.values().filter(|s| s.is_available()).cloned().collect()
    }
}

impl std::hash::Hash for ServiceCategory {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (*self as u8).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_pair() -> (AgentId, WalletId, AgentId, WalletId) {
        (AgentId::new(), WalletId::new(), AgentId::new(), WalletId::new())
    }

    #[test]
    fn escrow_funds_releases_and_rejects_double_release() {
        let (payer, payer_wallet, payee, payee_wallet) = agent_pair();
        let mut escrow = Escrow::new("req_1".into(), payer, payer_wallet, payee, payee_wallet, 5000, "USDC".into(), Utc::now());
        escrow.fund("tx_fund".into(), 72, Utc::now()).unwrap();
        assert_eq!(escrow.status, EscrowStatus::Funded);
        escrow.release("tx_release".into(), Utc::now()).unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
        assert!(escrow.release("tx_release_2".into(), Utc::now()).is_err());
    }

    #[test]
    fn complete_request_releases_funded_escrow_atomically() {
        let (requester, requester_wallet, provider, provider_wallet) = agent_pair();
        let mut request = ServiceRequest::new(
            requester,
            requester_wallet.clone(),
            provider.clone(),
            provider_wallet.clone(),
            "svc_1".into(),
            "summarize".into(),
            PaymentTerms::default(),
            None,
            Utc::now(),
        );
        request.accept(Utc::now()).unwrap();
        request.start(Utc::now()).unwrap();

        let mut escrow = Escrow::new(request.request_id.clone(), request.requester_agent_id.clone(), requester_wallet, provider, provider_wallet, 5000, "USDC".into(), Utc::now());
        escrow.fund("tx_fund".into(), 72, Utc::now()).unwrap();

        let outcome = complete_request(request, Some(escrow), "tx_release".into(), Utc::now()).unwrap();
        assert_eq!(outcome.request.status, RequestStatus::Completed);
        assert_eq!(outcome.escrow.unwrap().status, EscrowStatus::Released);
    }

    #[test]
    fn fail_request_refunds_funded_escrow() {
        let (requester, requester_wallet, provider, provider_wallet) = agent_pair();
        let mut request = ServiceRequest::new(
            requester,
            requester_wallet.clone(),
            provider.clone(),
            provider_wallet.clone(),
            "svc_1".into(),
            "summarize".into(),
            PaymentTerms::default(),
            None,
            Utc::now(),
        );
        request.accept(Utc::now()).unwrap();
        request.start(Utc::now()).unwrap();
        let mut escrow = Escrow::new(request.request_id.clone(), request.requester_agent_id.clone(), requester_wallet, provider, provider_wallet, 5000, "USDC".into(), Utc::now());
        escrow.fund("tx_fund".into(), 72, Utc::now()).unwrap();

        let outcome = fail_request(request, Some(escrow), "provider timed out".into(), "tx_refund".into(), Utc::now()).unwrap();
        assert_eq!(outcome.request.status, RequestStatus::Failed);
        assert_eq!(outcome.escrow.unwrap().status, EscrowStatus::Refunded);
    }

    #[test]
    fn dispute_rejected_outside_window() {
        let (requester, requester_wallet, provider, provider_wallet) = agent_pair();
        let mut request = ServiceRequest::new(
            requester,
            requester_wallet,
            provider,
            provider_wallet,
            "svc_1".into(),
            "summarize".into(),
            PaymentTerms { dispute_window_hours: 1, ..Default::default() },
            None,
            Utc::now(),
        );
        request.accept(Utc::now()).unwrap();
        request.start(Utc::now()).unwrap();
        request.status = RequestStatus::Completed;
        request.completed_at = Some(Utc::now() - Duration::hours(5));
        assert!(dispute_request(request, None, "late".into(), Utc::now()).is_err());
    }

    #[test]
    fn sweeper_refunds_only_expired_funded_escrows() {
        let (payer, payer_wallet, payee, payee_wallet) = agent_pair();
        let mut escrow = Escrow::new("req_1".into(), payer, payer_wallet, payee, payee_wallet, 5000, "USDC".into(), Utc::now() - Duration::hours(100));
        escrow.fund("tx_fund".into(), 1, Utc::now() - Duration::hours(100)).unwrap();
        let mut escrows = vec![escrow];
        let swept = sweep_expired_escrows(&mut escrows, "tx_auto_refund", Utc::now());
        assert_eq!(swept, 1);
        assert_eq!(escrows[0].status, EscrowStatus::Refunded);
    }
}
