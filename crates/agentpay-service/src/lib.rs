//! Process wiring for the agentpay platform (SPEC_FULL.md §A): a `Service` value (spec.md
//! §9 "Global state") that owns the mandate verifier, trust framework, policy engine,
//! plugin registry, canonical and audit ledgers, checkout/escrow stores, and the
//! collaborator handles injected from `agentpay-adapters`, plus the background-loop
//! wiring that keeps the anchor scheduler, sweepers, and manual-review enqueuer running.
//!
//! No HTTP/gRPC/CLI surface is built here — per spec.md §1 Out of scope, front-ends are
//! external collaborators; this crate exposes only the programmatic entry points a
//! front-end would call, mirroring the teacher's `ServiceState` shape minus its `axum`
//! router and `tonic` server.

#![deny(unsafe_code)]

pub mod background;
pub mod settings;

use agentpay_adapters::{
    InMemoryIdentityRegistry, LoggingApprovalNotifier, LoggingEmailSender, MockAnchorChainExecutor, MockChainExecutor, MockFiatRampProvider,
    MockKybProvider, MockKycProvider, MockSanctionsProvider, MockSarFiler, MockTreasuryProvider,
};
use agentpay_core::audit::{AnchorChainExecutor, PersistentLedger};
use agentpay_core::budget::BudgetAllocator;
use agentpay_core::checkout::CheckoutSession;
use agentpay_core::error::Result;
use agentpay_core::escrow::{Escrow, ServiceRegistry};
use agentpay_core::ids::AgentId;
use agentpay_core::identity::IdentityRegistry;
use agentpay_core::ledger::ReconciliationLedger;
use agentpay_core::org::OrgDirectory;
use agentpay_core::plugin::{ApprovalNotifier, EmailNotificationPlugin, EmailSender, PluginRegistry, SlackApprovalPlugin};
use agentpay_core::policy::PolicyEngine;
use agentpay_core::providers::{ChainExecutor, FiatRampProvider, KybProvider, KycProvider, SanctionsProvider, SarFiler, TreasuryProvider};
use agentpay_core::replay::InMemoryReplayCache;
use agentpay_core::storage::{InMemoryMandateArchive, MandateArchive};
use agentpay_core::treasury::TreasuryIngestor;
use agentpay_core::trust::{SpendingProfile, TrustFramework, TrustWeights};
use agentpay_core::verifier::{MandateVerifier, VerifierConfig};
use settings::Settings;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Everything a running agentpay process needs, built once at startup and shared behind
/// `Arc` with every background task and (eventually) front-end handler.
pub struct Service {
    pub settings: Settings,
    pub verifier: MandateVerifier,
    pub trust: TrustFramework,
    pub policy_engine: PolicyEngine,
    pub plugins: PluginRegistry,
    pub reconciliation: ReconciliationLedger,
    pub budgets: BudgetAllocator,
    pub orgs: OrgDirectory,
    pub marketplace: ServiceRegistry,
    pub treasury: TreasuryIngestor<InMemoryReplayCache>,

    pub chain_executor: Arc<dyn ChainExecutor>,
    pub anchor_executor: Arc<dyn AnchorChainExecutor>,
    pub identity_registry: Arc<dyn IdentityRegistry>,
    pub mandate_archive: Arc<dyn MandateArchive>,
    pub fiat_ramp: Arc<dyn FiatRampProvider>,
    pub treasury_provider: Arc<dyn TreasuryProvider>,
    pub kyc: Arc<dyn KycProvider>,
    pub kyb: Arc<dyn KybProvider>,
    pub sanctions: Arc<dyn SanctionsProvider>,
    pub sar_filer: Arc<dyn SarFiler>,

    audit_ledger: Mutex<PersistentLedger>,
    anchor_cursor: AtomicU64,
    checkout_sessions: Mutex<Vec<CheckoutSession>>,
    escrows: Mutex<Vec<Escrow>>,
    drift_baselines: Mutex<HashMap<AgentId, SpendingProfile>>,
}

impl Service {
    /// Wires every collaborator from `agentpay-adapters`'s deterministic mocks and the
    /// core engines into one `Service`, mirroring the teacher's
    /// `ServiceState::bootstrap`'s connector-registration sequence.
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        let mandate_archive: Arc<dyn MandateArchive> = Arc::new(InMemoryMandateArchive::new());
        let identity_registry: Arc<dyn IdentityRegistry> = Arc::new(InMemoryIdentityRegistry::new());
        let verifier_config = VerifierConfig::new(settings.allowed_domains.clone());
        let verifier = MandateVerifier::new(mandate_archive.clone(), identity_registry.clone(), verifier_config);

        let audit_ledger = PersistentLedger::bootstrap(settings.ledger_storage.clone()).await?;

        let approval_notifier: Arc<dyn ApprovalNotifier> = Arc::new(LoggingApprovalNotifier);
        let email_sender: Arc<dyn EmailSender> = Arc::new(LoggingEmailSender);
        let plugins = PluginRegistry::new();
        plugins.register_approval(Arc::new(SlackApprovalPlugin::new("https://hooks.example/agentpay".to_string(), approval_notifier)));
        plugins.register_notification(Arc::new(EmailNotificationPlugin::new(Vec::new(), email_sender)));

        let kyc_secret = settings.kyc_webhook_secret.clone();
        let kyb_secret = settings.kyb_webhook_secret.clone();

        let service = Self {
            settings,
            verifier,
            trust: TrustFramework::new(TrustWeights::default()),
            policy_engine: PolicyEngine::new(),
            plugins,
            reconciliation: ReconciliationLedger::new(),
            budgets: BudgetAllocator::new(),
            orgs: OrgDirectory::new(),
            marketplace: ServiceRegistry::new(),
            treasury: TreasuryIngestor::new(InMemoryReplayCache::new(), Default::default()),

            chain_executor: Arc::new(MockChainExecutor),
            anchor_executor: Arc::new(MockAnchorChainExecutor),
            identity_registry,
            mandate_archive,
            fiat_ramp: Arc::new(MockFiatRampProvider::new()),
            treasury_provider: Arc::new(MockTreasuryProvider::new()),
            kyc: Arc::new(MockKycProvider::new(kyc_secret)),
            kyb: Arc::new(MockKybProvider::new(kyb_secret)),
            sanctions: Arc::new(MockSanctionsProvider),
            sar_filer: Arc::new(MockSarFiler),

            audit_ledger: Mutex::new(audit_ledger),
            anchor_cursor: AtomicU64::new(0),
            checkout_sessions: Mutex::new(Vec::new()),
            escrows: Mutex::new(Vec::new()),
            drift_baselines: Mutex::new(HashMap::new()),
        };

        Ok(Arc::new(service))
    }

    pub async fn append_audit_entry(
        &self,
        entry_type: impl Into<String>,
        actor: impl Into<String>,
        subject: impl Into<String>,
        amount_minor: Option<i64>,
        metadata: serde_json::Value,
    ) -> Result<agentpay_core::audit::LedgerEntry> {
        let mut guard = self.audit_ledger.lock().expect("audit ledger mutex poisoned");
        guard.append(entry_type, actor, subject, amount_minor, metadata).await
    }

    pub fn audit_entries(&self) -> Vec<agentpay_core::audit::LedgerEntry> {
        self.audit_ledger.lock().expect("audit ledger mutex poisoned").entries().to_vec()
    }

    pub fn insert_checkout_session(&self, session: CheckoutSession) {
        self.checkout_sessions.lock().expect("checkout sessions mutex poisoned").push(session);
    }

    pub fn find_checkout_session(&self, session_id: &agentpay_core::ids::CheckoutSessionId) -> Option<CheckoutSession> {
        self.checkout_sessions
            .lock()
            .expect("checkout sessions mutex poisoned")
            .iter()
            .find(|s| &s.session_id == session_id)
            .cloned()
    }

    pub fn insert_escrow(&self, escrow: Escrow) {
        self.escrows.lock().expect("escrows mutex poisoned").push(escrow);
    }

    pub fn find_escrow(&self, escrow_id: &agentpay_core::ids::EscrowId) -> Option<Escrow> {
        self.escrows.lock().expect("escrows mutex poisoned").iter().find(|e| &e.escrow_id == escrow_id).cloned()
    }

    pub fn record_drift_baseline(&self, agent_id: AgentId, profile: SpendingProfile) {
        self.drift_baselines.lock().expect("drift baselines mutex poisoned").insert(agent_id, profile);
    }

    pub fn drift_baseline(&self, agent_id: &AgentId) -> Option<SpendingProfile> {
        self.drift_baselines.lock().expect("drift baselines mutex poisoned").get(agent_id).cloned()
    }

    pub(crate) fn checkout_sessions_mut<R>(&self, f: impl FnOnce(&mut Vec<CheckoutSession>) -> R) -> R {
        let mut guard = self.checkout_sessions.lock().expect("checkout sessions mutex poisoned");
        f(&mut guard)
    }

    pub(crate) fn escrows_mut<R>(&self, f: impl FnOnce(&mut Vec<Escrow>) -> R) -> R {
        let mut guard = self.escrows.lock().expect("escrows mutex poisoned");
        f(&mut guard)
    }

    pub(crate) fn audit_ledger_snapshot(&self) -> Vec<agentpay_core::audit::LedgerEntry> {
        self.audit_ledger.lock().expect("audit ledger mutex poisoned").entries().to_vec()
    }

    pub(crate) fn last_anchored_index(&self) -> u64 {
        self.anchor_cursor.load(Ordering::SeqCst)
    }

    pub(crate) fn advance_anchor_cursor(&self, to: u64) {
        self.anchor_cursor.store(to, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_produces_a_memory_backed_service() {
        let service = Service::bootstrap(Settings::default()).await.unwrap();
        let entry = service
            .append_audit_entry("mandate_accepted", "verifier", "agent_1", Some(5000), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(entry.index, 0);
        assert_eq!(service.audit_entries().len(), 1);
    }
}
