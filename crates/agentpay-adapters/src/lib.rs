//! Deterministic, in-memory reference implementations of agentpay's injected collaborator
//! contracts (spec.md §6). Grounded on the teacher's `ibank-adapters::{MockAchConnector,
//! MockChainConnector}` shape: settlement/operation ids are derived deterministically from
//! the request rather than randomly, so tests can assert on them and resubmitting the same
//! request returns the same receipt. None of these are real provider SDKs — Persona/iDenfy/
//! Scorechain/Bridge/Coinbase Onramp/Lithic integrations are out of scope per spec.md §1;
//! only their provider contracts (defined in `agentpay_core::providers`) are implemented
//! here, against in-memory state.

#![deny(unsafe_code)]

use agentpay_core::error::{AgentPayError, Result};
use agentpay_core::ids::{AchPaymentId, AgentId, AnchorId, ExternalBankAccountId, OrgId};
use agentpay_core::mandate::PaymentMandate;
use agentpay_core::providers::{
    AchDirection, AchPaymentRequest, BalanceSnapshot, ChainExecutor, ChainReceipt, ExternalBankAccountLink, FiatRampProvider,
    FinancialAccount, Inquiry, InquiryStatus, KybProvider, KycProvider, OfframpRequest, OnrampRequest, RampOperation, RampQuote,
    RampQuoteRequest, RampStatus, RampWebhookEvent, SanctionsProvider, SanctionsScreeningResult, SarFiler, SuspiciousActivityReport,
    TreasuryProvider, WebhookHeaders,
};
use agentpay_core::{verify_hmac_signature, AnchorChainExecutor, IdentityRegistry, SignatureAlgorithm};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

fn short_digest(material: &str) -> String {
    blake3::hash(material.as_bytes()).to_hex()[..16].to_string()
}

// ---------------------------------------------------------------------------------------
// ChainExecutor (spec.md §6): submits a payment mandate to its settlement chain.
// ---------------------------------------------------------------------------------------

/// Mock chain executor for local development and tests. Idempotent on `mandate_id`: the
/// same mandate always resolves to the same `tx_hash`, matching spec.md §6's requirement
/// that resubmitting an already-settled mandate never double-spends.
#[derive(Debug, Clone, Default)]
pub struct MockChainExecutor;

#[async_trait]
impl ChainExecutor for MockChainExecutor {
    async fn submit(&self, payment_mandate: &PaymentMandate) -> Result<ChainReceipt> {
        let digest = short_digest(payment_mandate.base.mandate_id.as_str());
        Ok(ChainReceipt {
            tx_hash: format!("0x{}", digest),
            chain: payment_mandate.chain.clone(),
            block_number: Some(u64::from_str_radix(&digest[..8], 16).unwrap_or(0)),
        })
    }
}

/// Mock anchor executor (spec.md §4.7 `ChainExecutor` used by the anchor scheduler):
/// deterministic transaction hash derived from the Merkle root being anchored.
#[derive(Debug, Clone, Default)]
pub struct MockAnchorChainExecutor;

#[async_trait]
impl AnchorChainExecutor for MockAnchorChainExecutor {
    async fn submit_root(&self, chain: &str, merkle_root: &str) -> Result<(String, Option<u64>)> {
        let digest = short_digest(&format!("{}:{}", chain, merkle_root));
        Ok((format!("0x{}", digest), Some(u64::from_str_radix(&digest[..8], 16).unwrap_or(0))))
    }
}

/// Always fails, for exercising the anchor scheduler's pending → failed path and the
/// service error taxonomy's `chain_submit_failed` (spec.md §7).
#[derive(Debug, Clone)]
pub struct AlwaysFailChainExecutor {
    pub reason: String,
}

impl AlwaysFailChainExecutor {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl ChainExecutor for AlwaysFailChainExecutor {
    async fn submit(&self, _payment_mandate: &PaymentMandate) -> Result<ChainReceipt> {
        Err(AgentPayError::service("chain_submit_failed", self.reason.clone()))
    }
}

#[async_trait]
impl AnchorChainExecutor for AlwaysFailChainExecutor {
    async fn submit_root(&self, _chain: &str, _merkle_root: &str) -> Result<(String, Option<u64>)> {
        Err(AgentPayError::service("chain_submit_failed", self.reason.clone()))
    }
}

// ---------------------------------------------------------------------------------------
// IdentityRegistry (spec.md §6, §4.1 checks 11-12).
// ---------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingKey {
    agent_id: String,
    domain: String,
}

/// In-memory identity registry: agents must be explicitly bound via [`Self::register_binding`]
/// before `verify_binding` will succeed, matching a real KYA registry's explicit-enrollment
/// shape rather than trusting any claimed key.
#[derive(Default)]
pub struct InMemoryIdentityRegistry {
    bindings: Mutex<HashMap<BindingKey, (Vec<u8>, SignatureAlgorithm)>>,
}

impl InMemoryIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_binding(&self, agent_id: &AgentId, domain: impl Into<String>, public_key: Vec<u8>, algorithm: SignatureAlgorithm) {
        let mut guard = self.bindings.lock().expect("identity registry mutex poisoned");
        guard.insert(BindingKey { agent_id: agent_id.as_str().to_string(), domain: domain.into() }, (public_key, algorithm));
    }
}

#[async_trait]
impl IdentityRegistry for InMemoryIdentityRegistry {
    async fn verify_binding(&self, agent_id: &AgentId, domain: &str, public_key: &[u8], algorithm: &str) -> Result<bool> {
        let guard = self.bindings.lock().expect("identity registry mutex poisoned");
        let Some((bound_key, bound_alg)) = guard.get(&BindingKey { agent_id: agent_id.as_str().to_string(), domain: domain.to_string() }) else {
            return Ok(false);
        };
        let claimed_alg = SignatureAlgorithm::parse(algorithm)?;
        Ok(*bound_alg == claimed_alg && bound_key.as_slice() == public_key)
    }
}

// ---------------------------------------------------------------------------------------
// FiatRampProvider (spec.md §6): onramp/offramp quoting, creation, status, webhooks.
// ---------------------------------------------------------------------------------------

#[derive(Default)]
pub struct MockFiatRampProvider {
    operations: Mutex<HashMap<String, RampStatus>>,
}

impl MockFiatRampProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FiatRampProvider for MockFiatRampProvider {
    async fn get_quote(&self, request: &RampQuoteRequest) -> Result<RampQuote> {
        let rate = if request.source_currency == request.destination_currency { 1.0 } else { 0.999 };
        let destination_amount_minor = (request.amount_minor as f64 * rate).round() as i64;
        Ok(RampQuote {
            quote_id: format!(
                "quote_{}",
                short_digest(&format!("{}:{}:{}", request.source_currency, request.destination_currency, request.amount_minor))
            ),
            rate,
            destination_amount_minor,
            expires_at: Utc::now() + chrono::Duration::minutes(10),
        })
    }

    async fn create_onramp(&self, request: &OnrampRequest) -> Result<RampOperation> {
        let operation_id = format!("ramp_{}", short_digest(&format!("onramp:{}:{}", request.quote_id, request.destination_wallet)));
        self.operations.lock().expect("ramp mutex poisoned").insert(operation_id.clone(), RampStatus::Processing);
        Ok(RampOperation { operation_id, status: RampStatus::Processing })
    }

    async fn create_offramp(&self, request: &OfframpRequest) -> Result<RampOperation> {
        let operation_id =
            format!("ramp_{}", short_digest(&format!("offramp:{}:{}", request.quote_id, request.destination_bank_account_id)));
        self.operations.lock().expect("ramp mutex poisoned").insert(operation_id.clone(), RampStatus::Processing);
        Ok(RampOperation { operation_id, status: RampStatus::Processing })
    }

    async fn get_status(&self, operation_id: &str) -> Result<RampStatus> {
        let guard = self.operations.lock().expect("ramp mutex poisoned");
        guard
            .get(operation_id)
            .copied()
            .ok_or_else(|| AgentPayError::not_found("ramp_operation_not_found", format!("no ramp operation '{}'", operation_id)))
    }

    async fn handle_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<RampWebhookEvent> {
        let event: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| AgentPayError::validation("invalid_json", format!("ramp webhook payload is not valid JSON: {}", e)))?;
        let operation_id = event
            .get("operation_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentPayError::validation("missing_operation_id_required", "ramp webhook missing operation_id"))?
            .to_string();
        let status = match event.get("status").and_then(|v| v.as_str()) {
            Some("completed") => RampStatus::Completed,
            Some("failed") => RampStatus::Failed,
            Some("processing") | None => RampStatus::Processing,
            Some(_) => RampStatus::Pending,
        };
        self.operations.lock().expect("ramp mutex poisoned").insert(operation_id.clone(), status);
        Ok(RampWebhookEvent { operation_id, status, raw_event_id: format!("evt_{}", short_digest(&headers.timestamp)) })
    }
}

// ---------------------------------------------------------------------------------------
// TreasuryProvider (spec.md §6): financial accounts, bank account linking, ACH, balances.
// ---------------------------------------------------------------------------------------

#[derive(Default)]
struct PendingMicroDeposit {
    amounts_minor: [i64; 2],
    attempts: u32,
}

#[derive(Default)]
pub struct MockTreasuryProvider {
    micro_deposits: Mutex<HashMap<String, PendingMicroDeposit>>,
    balances: Mutex<HashMap<String, i64>>,
}

impl MockTreasuryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Max verification attempts before a micro-deposit link is considered abandoned
    /// (SPEC_FULL.md §C.7's treasury extension of the bare CRUD contract in spec.md §6).
    pub const MAX_VERIFICATION_ATTEMPTS: u32 = 3;
}

#[async_trait]
impl TreasuryProvider for MockTreasuryProvider {
    async fn create_financial_account(&self, org_id: &OrgId) -> Result<FinancialAccount> {
        Ok(FinancialAccount { financial_account_id: format!("fa_{}", short_digest(org_id.as_str())), org_id: org_id.clone() })
    }

    async fn link_external_bank_account(&self, org_id: &OrgId, routing_number: &str, account_number: &str) -> Result<ExternalBankAccountLink> {
        let id = ExternalBankAccountId::new();
        // Deterministic two-digit "micro-deposits" so tests can verify without a real rail.
        let digest = short_digest(&format!("{}:{}:{}", org_id.as_str(), routing_number, account_number));
        let a = (u32::from_str_radix(&digest[..2], 16).unwrap_or(1) % 49 + 1) as i64;
        let b = (u32::from_str_radix(&digest[2..4], 16).unwrap_or(1) % 49 + 1) as i64;
        self.micro_deposits
            .lock()
            .expect("micro deposits mutex poisoned")
            .insert(id.as_str().to_string(), PendingMicroDeposit { amounts_minor: [a, b], attempts: 0 });
        Ok(ExternalBankAccountLink { external_bank_account_id: id, verification_required: true })
    }

    async fn verify_micro_deposits(&self, account_id: &ExternalBankAccountId, amounts_minor: [i64; 2]) -> Result<bool> {
        let mut guard = self.micro_deposits.lock().expect("micro deposits mutex poisoned");
        let Some(pending) = guard.get_mut(account_id.as_str()) else {
            return Err(AgentPayError::not_found("external_bank_account_not_found", format!("no pending verification for '{}'", account_id)));
        };
        if pending.attempts >= Self::MAX_VERIFICATION_ATTEMPTS {
            return Err(AgentPayError::state("external_bank_account_paused", "micro-deposit verification attempts exhausted"));
        }
        pending.attempts += 1;
        let mut sorted_expected = pending.amounts_minor;
        sorted_expected.sort_unstable();
        let mut sorted_given = amounts_minor;
        sorted_given.sort_unstable();
        Ok(sorted_expected == sorted_given)
    }

    async fn initiate_ach_payment(&self, request: &AchPaymentRequest) -> Result<AchPaymentId> {
        let id = AchPaymentId::new();
        let mut balances = self.balances.lock().expect("balances mutex poisoned");
        let entry = balances.entry(request.external_bank_account_id.as_str().to_string()).or_insert(0);
        match request.direction {
            AchDirection::Collection => *entry += request.amount_minor,
            AchDirection::Withdrawal => *entry -= request.amount_minor,
        }
        Ok(id)
    }

    async fn get_balance_snapshot(&self, financial_account_id: &str) -> Result<BalanceSnapshot> {
        let balances = self.balances.lock().expect("balances mutex poisoned");
        let available_minor = balances.get(financial_account_id).copied().unwrap_or(0);
        Ok(BalanceSnapshot { financial_account_id: financial_account_id.to_string(), available_minor, pending_minor: 0, as_of: Utc::now() })
    }
}

// ---------------------------------------------------------------------------------------
// KYC / KYB / Sanctions (spec.md §6): inquiry lifecycle + watchlist screening.
// ---------------------------------------------------------------------------------------

/// Shared webhook verification for the compliance providers below (spec.md §6
/// "Webhooks"): constant-time HMAC-SHA256 check over the raw body.
fn verify_provider_webhook(secret: &[u8], payload: &[u8], headers: &WebhookHeaders) -> bool {
    verify_hmac_signature(secret, payload, &headers.signature)
}

#[derive(Default)]
pub struct MockKycProvider {
    inquiries: Mutex<HashMap<String, InquiryStatus>>,
    webhook_secret: Vec<u8>,
}

impl MockKycProvider {
    pub fn new(webhook_secret: impl Into<Vec<u8>>) -> Self {
        Self { inquiries: Mutex::new(HashMap::new()), webhook_secret: webhook_secret.into() }
    }
}

#[async_trait]
impl KycProvider for MockKycProvider {
    async fn create_inquiry(&self, subject_reference: &str) -> Result<Inquiry> {
        let inquiry_id = format!("inq_{}", short_digest(subject_reference));
        self.inquiries.lock().expect("kyc inquiries mutex poisoned").insert(inquiry_id.clone(), InquiryStatus::Pending);
        Ok(Inquiry { inquiry_id, status: InquiryStatus::Pending })
    }

    async fn get_status(&self, inquiry_id: &str) -> Result<InquiryStatus> {
        let guard = self.inquiries.lock().expect("kyc inquiries mutex poisoned");
        Ok(guard.get(inquiry_id).copied().unwrap_or(InquiryStatus::Pending))
    }

    async fn verify_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<bool> {
        Ok(verify_provider_webhook(&self.webhook_secret, payload, headers))
    }
}

#[derive(Default)]
pub struct MockKybProvider {
    inquiries: Mutex<HashMap<String, InquiryStatus>>,
    webhook_secret: Vec<u8>,
}

impl MockKybProvider {
    pub fn new(webhook_secret: impl Into<Vec<u8>>) -> Self {
        Self { inquiries: Mutex::new(HashMap::new()), webhook_secret: webhook_secret.into() }
    }
}

#[async_trait]
impl KybProvider for MockKybProvider {
    async fn create_inquiry(&self, business_registration_number: &str) -> Result<Inquiry> {
        let inquiry_id = format!("inq_{}", short_digest(business_registration_number));
        self.inquiries.lock().expect("kyb inquiries mutex poisoned").insert(inquiry_id.clone(), InquiryStatus::Pending);
        Ok(Inquiry { inquiry_id, status: InquiryStatus::Pending })
    }

    async fn get_status(&self, inquiry_id: &str) -> Result<InquiryStatus> {
        let guard = self.inquiries.lock().expect("kyb inquiries mutex poisoned");
        Ok(guard.get(inquiry_id).copied().unwrap_or(InquiryStatus::Pending))
    }

    async fn verify_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<bool> {
        Ok(verify_provider_webhook(&self.webhook_secret, payload, headers))
    }
}

/// Mock sanctions/watchlist screener (spec.md §6, §4.2 risk scorer). Matches a subject
/// whose name or reference contains the literal marker `"SANCTIONED"` (case-insensitive) —
/// deterministic, so tests can force a hit without a real watchlist feed.
#[derive(Debug, Clone, Default)]
pub struct MockSanctionsProvider;

#[async_trait]
impl SanctionsProvider for MockSanctionsProvider {
    async fn screen(&self, subject_name: &str, subject_reference: &str) -> Result<SanctionsScreeningResult> {
        let hit = subject_name.to_ascii_uppercase().contains("SANCTIONED") || subject_reference.to_ascii_uppercase().contains("SANCTIONED");
        Ok(SanctionsScreeningResult {
            hit,
            matched_list: if hit { Some("mock-ofac-sdn".to_string()) } else { None },
            confidence: if hit { 0.99 } else { 0.0 },
        })
    }
}

/// Mock SAR filer (SPEC_FULL.md §C.5): records the report id it would have filed rather
/// than submitting to a real regulator-facing system (out of scope per spec.md §1).
#[derive(Debug, Clone, Default)]
pub struct MockSarFiler;

#[async_trait]
impl SarFiler for MockSarFiler {
    async fn file_sar(&self, report: &SuspiciousActivityReport) -> Result<String> {
        Ok(format!("sar_{}", short_digest(&report.report_id)))
    }
}

// ---------------------------------------------------------------------------------------
// Notification/approval plugin collaborators (spec.md §1: "only the plugin contract is
// specified" — actual Slack/email delivery is out of scope; these log instead of calling
// a real webhook/SMTP endpoint).
// ---------------------------------------------------------------------------------------

/// Logs the Slack approval payload via `tracing` instead of posting to a real webhook.
#[derive(Debug, Clone, Default)]
pub struct LoggingApprovalNotifier;

#[async_trait]
impl agentpay_core::plugin::ApprovalNotifier for LoggingApprovalNotifier {
    async fn send(&self, webhook_url: &str, payload: serde_json::Value) -> Result<()> {
        tracing::info!(webhook_url, %payload, "slack approval notification (mock delivery)");
        Ok(())
    }
}

/// Logs the email send via `tracing` instead of delivering through SMTP.
#[derive(Debug, Clone, Default)]
pub struct LoggingEmailSender;

#[async_trait]
impl agentpay_core::plugin::EmailSender for LoggingEmailSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        tracing::info!(to, subject, body, "email notification (mock delivery)");
        Ok(())
    }
}

/// Marker used to label anchors produced against the mock chain executor in tests/demos.
pub fn demo_anchor_id() -> AnchorId {
    AnchorId::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentpay_core::mandate::{MandateBase, MandateKind, Proof};
    use chrono::Duration;

    fn sample_payment() -> PaymentMandate {
        let base = MandateBase {
            mandate_id: agentpay_core::ids::MandateId::new(),
            kind: MandateKind::Payment,
            subject: AgentId::new(),
            issuer: "merchant.example".into(),
            purpose: "checkout".into(),
            expires_at: Utc::now() + Duration::hours(1),
            nonce: "n1".into(),
            proof: Proof { verification_method: "ed25519:AAAA".into(), proof_value: "AAAA".into() },
        };
        let cart_id = agentpay_core::ids::MandateId::new();
        let checkout_id = agentpay_core::ids::MandateId::new();
        let audit_hash = PaymentMandate::compute_audit_hash(&cart_id, &checkout_id, 5000, "base", "USDC", "0xdead");
        PaymentMandate {
            base,
            cart_id,
            checkout_id,
            domain: "merchant.example".into(),
            chain: "base".into(),
            token: "USDC".into(),
            amount_minor: 5000,
            destination: "0xdead".into(),
            audit_hash,
        }
    }

    #[tokio::test]
    async fn chain_executor_is_idempotent_on_mandate_id() {
        let executor = MockChainExecutor;
        let payment = sample_payment();
        let first = executor.submit(&payment).await.unwrap();
        let second = executor.submit(&payment).await.unwrap();
        assert_eq!(first.tx_hash, second.tx_hash);
    }

    #[tokio::test]
    async fn identity_registry_requires_explicit_binding() {
        let registry = InMemoryIdentityRegistry::new();
        let agent = AgentId::new();
        let key = vec![1u8; 32];
        assert!(!registry.verify_binding(&agent, "merchant.example", &key, "ed25519").await.unwrap());
        registry.register_binding(&agent, "merchant.example", key.clone(), SignatureAlgorithm::Ed25519);
        assert!(registry.verify_binding(&agent, "merchant.example", &key, "ed25519").await.unwrap());
        assert!(!registry.verify_binding(&agent, "other.example", &key, "ed25519").await.unwrap());
    }

    #[tokio::test]
    async fn treasury_micro_deposit_verification_round_trips() {
        let provider = MockTreasuryProvider::new();
        let org = OrgId::new();
        let link = provider.link_external_bank_account(&org, "021000021", "1234567890").await.unwrap();
        assert!(link.verification_required);
        // Wrong amounts fail without erroring out the account's existence.
        assert!(!provider.verify_micro_deposits(&link.external_bank_account_id, [1, 1]).await.unwrap());
    }

    #[tokio::test]
    async fn sanctions_provider_hits_on_marker() {
        let provider = MockSanctionsProvider;
        let clean = provider.screen("Jane Doe", "agent_1").await.unwrap();
        assert!(!clean.hit);
        let hit = provider.screen("SANCTIONED Entity", "agent_2").await.unwrap();
        assert!(hit.hit);
    }

    #[tokio::test]
    async fn kyc_webhook_verification_rejects_tampered_payload() {
        let provider = MockKycProvider::new("whsec_test");
        let payload = br#"{"inquiry_id":"inq_1","status":"approved"}"#;
        let sig = agentpay_core::sign_hmac(b"whsec_test", payload);
        let headers = WebhookHeaders { signature: sig, timestamp: Utc::now().to_rfc3339() };
        assert!(provider.verify_webhook(payload, &headers).await.unwrap());
        assert!(!provider.verify_webhook(b"tampered", &headers).await.unwrap());
    }
}
