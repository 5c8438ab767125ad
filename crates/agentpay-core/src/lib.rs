//! Core domain logic for a programmable payment platform for autonomous AI agents.
//!
//! Mandate chains (AP2-style intent/cart/payment, UCP checkout), a declarative policy
//! engine and plugin registry, a trust framework (KYA, behavioural scoring, drift
//! detection, velocity governance), a canonical cross-rail ledger, a tamper-evident audit
//! ledger with blockchain anchoring, checkout and escrow state machines, an agent-to-agent
//! marketplace protocol, treasury ACH ingestion, and org/team/budget management.

#![deny(unsafe_code)]

pub mod agent;
pub mod audit;
pub mod budget;
pub mod checkout;
pub mod error;
pub mod escrow;
pub mod identity;
pub mod ids;
pub mod ledger;
pub mod mandate;
pub mod money;
pub mod org;
pub mod plugin;
pub mod policy;
pub mod providers;
pub mod ratelimit;
pub mod replay;
pub mod storage;
pub mod tap;
pub mod treasury;
pub mod trust;
pub mod verifier;
pub mod webhook;

pub use agent::{AgentManifest, AgentProfile, AttestationType, TrustAttestation};
pub use audit::{
    Anchor, AnchorChainExecutor, AnchorSchedulerConfig, AnchorStatus, AppendOnlyLedger, LedgerEntry, LedgerStorageConfig, MerkleTree,
    PersistentLedger, ProofDirection, ProofStep,
};
pub use budget::{AllocationStrategy, BudgetAllocation, BudgetAllocator, BudgetCycle, BudgetPeriod, BudgetUtilization, CycleStatus};
pub use checkout::{CheckoutSession, CheckoutState, CheckoutTotals};
pub use error::{AgentPayError, ErrorCode, ErrorResponse, Result};
pub use escrow::{Escrow, EscrowStatus, RequestStatus, ServiceRegistry, ServiceRequest};
pub use identity::{verify_signature, IdentityRegistry, SignatureAlgorithm};
pub use ids::{
    AchPaymentId, AgentId, AnchorId, CheckoutSessionId, EscrowId, ExternalBankAccountId, HoldId, JourneyId, MandateId, OrgId, TeamId, TxId,
    WalletId,
};
pub use ledger::{CanonicalEvent, CanonicalJourney, CanonicalState, IngestOutcome, IngestParams, ReconciliationBreak, ReconciliationLedger};
pub use mandate::{
    CanonicalizationMode, CartMandate, CheckoutMandate, IntentMandate, MandateBase, MandateChain, MandateKind, PaymentMandate, Proof,
};
pub use money::{Discount, MinorUnits};
pub use org::{MemberRole, OrgDirectory, OrgMember, Organization, OrganizationPlan, Team};
pub use plugin::{PluginKind, PluginMetadata, PluginRegistry, PolicyDecision, Transaction};
pub use policy::{EvaluationContext, Policy, PolicyEngine, PolicyEvaluation, Rule, RuleAction};
pub use providers::{
    AchDirection, AchPaymentRequest, BalanceSnapshot, ChainExecutor, ChainReceipt, ExternalBankAccountLink, FiatRampProvider,
    FinancialAccount, Inquiry, InquiryStatus, KybProvider, KycProvider, OfframpRequest, OnrampRequest, RampOperation, RampQuote,
    RampQuoteRequest, RampStatus, RampWebhookEvent, SanctionsProvider, SanctionsScreeningResult, SarFiler, SuspiciousActivityReport,
    TreasuryProvider, WebhookHeaders,
};
pub use ratelimit::{SlidingWindowLimiter, WindowKind, WindowLimit, WindowSet};
pub use replay::{InMemoryReplayCache, ReplayCache};
pub use storage::{CanonicalJourneyRepository, IdempotencyCache, InMemoryJourneyRepository, InMemoryMandateArchive, MandateArchive};
pub use treasury::{AchEventType, ExternalBankAccount, OrgAchLimits, TreasuryIngestor};
pub use trust::{KyaLevel, PartyContext, TrustEvaluation, TrustFramework, TrustScore, TrustTier, VelocityGovernor};
pub use verifier::{MandateVerifier, VerifierConfig, VerifiedChain};
pub use webhook::{sign_hmac, verify_hmac_signature};
