//! Injected collaborator contracts (spec.md §6 "Collaborator contracts (injected, not
//! implemented in scope)"). `agentpay-core` defines the traits and wire-shaped DTOs only;
//! `agentpay-adapters` carries the deterministic reference implementations used in tests
//! and local development.

use crate::error::Result;
use crate::ids::{AchPaymentId, ExternalBankAccountId, OrgId};
use crate::mandate::PaymentMandate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Submits a verified payment mandate to a settlement rail. Implementations must be
/// idempotent on `payment.mandate_id` (spec.md §6) — resubmitting an already-settled
/// mandate returns the original receipt rather than double-spending.
#[async_trait]
pub trait ChainExecutor: Send + Sync {
    async fn submit(&self, payment_mandate: &PaymentMandate) -> Result<ChainReceipt>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainReceipt {
    pub tx_hash: String,
    pub chain: String,
    pub block_number: Option<u64>,
}

/// Fiat on/off-ramp (spec.md §6): quoting, ramp creation, status polling, and webhook
/// event normalization.
#[async_trait]
pub trait FiatRampProvider: Send + Sync {
    async fn get_quote(&self, request: &RampQuoteRequest) -> Result<RampQuote>;
    async fn create_onramp(&self, request: &OnrampRequest) -> Result<RampOperation>;
    async fn create_offramp(&self, request: &OfframpRequest) -> Result<RampOperation>;
    async fn get_status(&self, operation_id: &str) -> Result<RampStatus>;
    async fn handle_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<RampWebhookEvent>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampQuoteRequest {
    pub source_currency: String,
    pub destination_currency: String,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampQuote {
    pub quote_id: String,
    pub rate: f64,
    pub destination_amount_minor: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnrampRequest {
    pub quote_id: String,
    pub destination_wallet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfframpRequest {
    pub quote_id: String,
    pub destination_bank_account_id: ExternalBankAccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampOperation {
    pub operation_id: String,
    pub status: RampStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RampStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct WebhookHeaders {
    pub signature: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampWebhookEvent {
    pub operation_id: String,
    pub status: RampStatus,
    pub raw_event_id: String,
}

/// CRUD for financial accounts, external bank accounts (with micro-deposit verification),
/// ACH payments, and balance snapshots (spec.md §6).
#[async_trait]
pub trait TreasuryProvider: Send + Sync {
    async fn create_financial_account(&self, org_id: &OrgId) -> Result<FinancialAccount>;
    async fn link_external_bank_account(&self, org_id: &OrgId, routing_number: &str, account_number: &str) -> Result<ExternalBankAccountLink>;
    async fn verify_micro_deposits(&self, account_id: &ExternalBankAccountId, amounts_minor: [i64; 2]) -> Result<bool>;
    async fn initiate_ach_payment(&self, request: &AchPaymentRequest) -> Result<AchPaymentId>;
    async fn get_balance_snapshot(&self, financial_account_id: &str) -> Result<BalanceSnapshot>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialAccount {
    pub financial_account_id: String,
    pub org_id: OrgId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalBankAccountLink {
    pub external_bank_account_id: ExternalBankAccountId,
    pub verification_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AchDirection {
    Collection,
    Withdrawal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchPaymentRequest {
    pub external_bank_account_id: ExternalBankAccountId,
    pub direction: AchDirection,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub financial_account_id: String,
    pub available_minor: i64,
    pub pending_minor: i64,
    pub as_of: DateTime<Utc>,
}

/// Shared inquiry lifecycle for KYC/KYB/sanctions providers (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InquiryStatus {
    Pending,
    Approved,
    Declined,
    NeedsReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inquiry {
    pub inquiry_id: String,
    pub status: InquiryStatus,
}

/// Individual identity verification (spec.md §6).
#[async_trait]
pub trait KycProvider: Send + Sync {
    async fn create_inquiry(&self, subject_reference: &str) -> Result<Inquiry>;
    async fn get_status(&self, inquiry_id: &str) -> Result<InquiryStatus>;
    async fn verify_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<bool>;
}

/// Business verification, the KYB counterpart of [`KycProvider`] (SPEC_FULL.md §C.5).
#[async_trait]
pub trait KybProvider: Send + Sync {
    async fn create_inquiry(&self, business_registration_number: &str) -> Result<Inquiry>;
    async fn get_status(&self, inquiry_id: &str) -> Result<InquiryStatus>;
    async fn verify_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<bool>;
}

/// Watchlist screening (spec.md §6).
#[async_trait]
pub trait SanctionsProvider: Send + Sync {
    async fn screen(&self, subject_name: &str, subject_reference: &str) -> Result<SanctionsScreeningResult>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionsScreeningResult {
    pub hit: bool,
    pub matched_list: Option<String>,
    pub confidence: f64,
}

/// Suspicious-activity report shape (SPEC_FULL.md §C.5): the data a sanctions hit or
/// repeated policy violation routes to, not a full filing pipeline. `file_sar` is the
/// one collaborator method the risk scorer needs; the filing workflow itself is out of
/// scope (spec.md §1 Non-goals apply to the filing pipeline, not the record shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousActivityReport {
    pub report_id: String,
    pub org_id: OrgId,
    pub subject_reference: String,
    pub reason_codes: Vec<String>,
    pub narrative: String,
    pub filed_at: DateTime<Utc>,
}

#[async_trait]
pub trait SarFiler: Send + Sync {
    async fn file_sar(&self, report: &SuspiciousActivityReport) -> Result<String>;
}
