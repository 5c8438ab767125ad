//! Treasury ACH ingestion (spec.md §4.8).
//!
//! Normalizes Lithic-shaped ACH webhook events into the canonical cross-rail ledger
//! ([`crate::ledger::canonical`]), pauses external bank accounts on unrecoverable return
//! codes, and guards the whole handler with the replay cache keyed on
//! `(provider, event_id)` (spec.md §5, §6 Webhooks).

use crate::error::{AgentPayError, Result};
use crate::ids::{ExternalBankAccountId, OrgId};
use crate::ledger::canonical::{CanonicalEvent, CanonicalJourney, CanonicalState, IngestOutcome, IngestParams};
use crate::ratelimit::{SlidingWindowLimiter, WindowSet};
use crate::replay::ReplayCache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Lithic ACH webhook event types this platform understands (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AchEventType {
    OriginationInitiated,
    OriginationProcessed,
    OriginationSettled,
    ReturnProcessed,
}

impl AchEventType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ach_origination_initiated" => Some(Self::OriginationInitiated),
            "ach_origination.processed" | "ach_origination_processed" => Some(Self::OriginationProcessed),
            "ach_origination_settled" => Some(Self::OriginationSettled),
            "ach_return_processed" => Some(Self::ReturnProcessed),
            _ => None,
        }
    }

    /// Deterministic event-type → canonical-state mapping (spec.md §4.8).
    pub fn canonical_state(&self) -> CanonicalState {
        match self {
            Self::OriginationInitiated => CanonicalState::Submitted,
            Self::OriginationProcessed => CanonicalState::Processing,
            Self::OriginationSettled => CanonicalState::Settled,
            Self::ReturnProcessed => CanonicalState::Returned,
        }
    }

    pub fn canonical_event_type(&self) -> &'static str {
        match self {
            Self::OriginationInitiated => "ach_origination_initiated",
            Self::OriginationProcessed => "ach_origination_processed",
            Self::OriginationSettled => "ach_origination_settled",
            Self::ReturnProcessed => "ach_return_processed",
        }
    }
}

/// Raw shape of an incoming Lithic-compatible webhook payload, already signature-verified
/// by the caller. Field names mirror the provider's wire format.
#[derive(Debug, Clone, Deserialize)]
pub struct AchWebhookPayload {
    pub event_id: String,
    pub event_type: String,
    pub organization_id: String,
    pub external_reference: String,
    pub amount_minor: Option<i64>,
    pub return_code: Option<String>,
    pub external_bank_account_id: Option<String>,
    pub event_ts: DateTime<Utc>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Return codes that permanently disable an external bank account until re-verified
/// (spec.md §4.8): R02 account closed, R03 no account/unable to locate, R29 corporate
/// customer advises not authorized.
const PAUSING_RETURN_CODES: [&str; 3] = ["R02", "R03", "R29"];

/// Return codes that indicate a transient failure worth retrying (spec.md §4.8): R01
/// insufficient funds, R09 uncollected funds.
const RETRYABLE_RETURN_CODES: [&str; 2] = ["R01", "R09"];

#[derive(Debug, Clone, Serialize)]
pub struct ExternalBankAccount {
    pub id: ExternalBankAccountId,
    pub organization_id: OrgId,
    pub is_paused: bool,
    pub pause_reason: Option<String>,
    pub retry_count: u32,
}

impl ExternalBankAccount {
    pub fn new(id: ExternalBankAccountId, organization_id: OrgId) -> Self {
        Self { id, organization_id, is_paused: false, pause_reason: None, retry_count: 0 }
    }

    fn apply_return_code(&mut self, code: &str) {
        if PAUSING_RETURN_CODES.contains(&code) {
            self.is_paused = true;
            self.pause_reason = Some(format!("return_code:{}", code));
        } else if RETRYABLE_RETURN_CODES.contains(&code) {
            self.retry_count += 1;
        }
    }
}

/// Outcome of processing one webhook delivery end to end.
#[derive(Debug)]
pub struct WebhookOutcome {
    pub ingest: IngestOutcome,
    pub event: CanonicalEvent,
    pub bank_account_paused: bool,
    pub duplicate: bool,
}

/// Per-org rate limits enforced before any provider call (spec.md §4.8): daily payment
/// count, per-payment amount ceiling, and a velocity window shared with
/// [`crate::ratelimit::SlidingWindowLimiter`].
#[derive(Debug, Clone, Copy)]
pub struct OrgAchLimits {
    pub max_amount_per_payment_minor: i64,
    pub windows: WindowSet,
}

impl Default for OrgAchLimits {
    fn default() -> Self {
        Self { max_amount_per_payment_minor: 1_000_000_00, windows: WindowSet::velocity_defaults() }
    }
}

/// Orchestrates ingestion: webhook replay guard, per-org rate limiting, external bank
/// account pausing, and delegation to [`crate::ledger::canonical::ingest_event`].
pub struct TreasuryIngestor<R: ReplayCache> {
    replay_cache: R,
    response_cache: Mutex<HashMap<String, serde_json::Value>>,
    bank_accounts: Mutex<HashMap<String, ExternalBankAccount>>,
    rate_limiter: SlidingWindowLimiter,
    limits: OrgAchLimits,
    drift_tolerance_minor: i64,
    max_retry: u32,
}

impl<R: ReplayCache> TreasuryIngestor<R> {
    pub fn new(replay_cache: R, limits: OrgAchLimits) -> Self {
        Self {
            replay_cache,
            response_cache: Mutex::new(HashMap::new()),
            bank_accounts: Mutex::new(HashMap::new()),
            rate_limiter: SlidingWindowLimiter::new(),
            limits,
            drift_tolerance_minor: 0,
            max_retry: 3,
        }
    }

    pub fn register_bank_account(&self, account: ExternalBankAccount) {
        let mut guard = self.bank_accounts.lock().expect("bank accounts mutex poisoned");
        guard.insert(account.id.as_str().to_string(), account);
    }

    pub fn bank_account_is_paused(&self, id: &ExternalBankAccountId) -> bool {
        let guard = self.bank_accounts.lock().expect("bank accounts mutex poisoned");
        guard.get(id.as_str()).map(|a| a.is_paused).unwrap_or(false)
    }

    /// Processes one webhook delivery. `provider` identifies the source for the replay key
    /// (spec.md §6: replay protection wraps each handler by `(provider, event_id)`).
    /// Duplicate deliveries return the cached response verbatim instead of re-ingesting.
    pub async fn handle_webhook(&self, provider: &str, payload: AchWebhookPayload, journey_seed: Option<CanonicalJourney>) -> Result<(WebhookOutcome, serde_json::Value)> {
        let replay_key = format!("{}:{}", provider, payload.event_id);
        let expires_at = Utc::now() + chrono::Duration::days(7);
        let fresh = self.replay_cache.check_and_store(&replay_key, expires_at).await;

        if !fresh {
            let cached = {
                let guard = self.response_cache.lock().expect("response cache mutex poisoned");
                guard.get(&replay_key).cloned()
            };
            let response = cached.unwrap_or_else(|| serde_json::json!({"status": "duplicate", "event_id": payload.event_id}));
            let org_id = OrgId::from_raw(payload.organization_id.clone());
            let journey = journey_seed.unwrap_or_else(|| CanonicalJourney::new(org_id, "ach".to_string(), provider.to_string(), payload.external_reference.clone()));
            let event = CanonicalEvent {
                id: format!("evt_{}", payload.event_id),
                journey_id: journey.journey_id.clone(),
                provider: provider.to_string(),
                provider_event_id: Some(payload.event_id.clone()),
                canonical_event_type: "duplicate".to_string(),
                canonical_state: journey.canonical_state,
                event_ts: payload.event_ts,
                amount_minor: payload.amount_minor,
                return_code: payload.return_code.clone(),
                out_of_order: false,
                raw_payload: payload.raw.clone(),
            };
            return Ok((
                WebhookOutcome {
                    ingest: IngestOutcome { journey, duplicate: true, drift_break: None, manual_review: None, retry_exhausted_review: None },
                    event,
                    bank_account_paused: false,
                    duplicate: true,
                },
                response,
            ));
        }

        let event_type = AchEventType::parse(&payload.event_type).ok_or_else(|| {
            AgentPayError::validation("unknown_ach_event_type", format!("unrecognized ACH event type '{}'", payload.event_type))
        })?;

        let org_id = OrgId::from_raw(payload.organization_id.clone());

        if let Some(amount) = payload.amount_minor {
            if amount > self.limits.max_amount_per_payment_minor {
                return Err(AgentPayError::rate_limit(
                    "ach_amount_exceeds_org_limit",
                    format!("payment amount {} exceeds per-payment limit {}", amount, self.limits.max_amount_per_payment_minor),
                ));
            }
        }
        if self
            .rate_limiter
            .check_and_record(org_id.as_str(), &self.limits.windows, payload.event_ts)
            .is_some()
        {
            return Err(AgentPayError::rate_limit("ach_org_velocity_exceeded", "organization ACH velocity limit exceeded"));
        }

        let mut bank_account_paused = false;
        if let Some(code) = &payload.return_code {
            if let Some(account_id) = &payload.external_bank_account_id {
                let mut guard = self.bank_accounts.lock().expect("bank accounts mutex poisoned");
                let account = guard
                    .entry(account_id.clone())
                    .or_insert_with(|| ExternalBankAccount::new(ExternalBankAccountId::from_raw(account_id.clone()), org_id.clone()));
                account.apply_return_code(code);
                bank_account_paused = account.is_paused;
            }
        }

        let journey = journey_seed.unwrap_or_else(|| CanonicalJourney::new(org_id.clone(), "ach".to_string(), provider.to_string(), payload.external_reference.clone()));

        let params = IngestParams {
            org_id: &org_id,
            rail: "ach",
            provider,
            external_reference: &payload.external_reference,
            provider_event_id: Some(&payload.event_id),
            canonical_event_type: event_type.canonical_event_type(),
            canonical_state: event_type.canonical_state(),
            event_ts: payload.event_ts,
            amount_minor: payload.amount_minor,
            return_code: payload.return_code.as_deref(),
            raw_payload: payload.raw.clone(),
            drift_tolerance_minor: self.drift_tolerance_minor,
            max_retry: self.max_retry,
        };

        let ingest = crate::ledger::canonical::ingest_event(journey, params);
        let event = CanonicalEvent {
            id: format!("evt_{}", payload.event_id),
            journey_id: ingest.journey.journey_id.clone(),
            provider: provider.to_string(),
            provider_event_id: Some(payload.event_id.clone()),
            canonical_event_type: event_type.canonical_event_type().to_string(),
            canonical_state: ingest.journey.canonical_state,
            event_ts: payload.event_ts,
            amount_minor: payload.amount_minor,
            return_code: payload.return_code.clone(),
            out_of_order: false,
            raw_payload: payload.raw.clone(),
        };

        let response = serde_json::json!({
            "status": "accepted",
            "event_id": payload.event_id,
            "journey_id": ingest.journey.journey_id.as_str(),
            "canonical_state": ingest.journey.canonical_state,
        });
        {
            let mut guard = self.response_cache.lock().expect("response cache mutex poisoned");
            guard.insert(replay_key, response.clone());
        }

        Ok((WebhookOutcome { ingest, event, bank_account_paused, duplicate: false }, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::InMemoryReplayCache;

    fn payload(event_type: &str, event_id: &str) -> AchWebhookPayload {
        AchWebhookPayload {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            organization_id: "org_1".to_string(),
            external_reference: "ref-1".to_string(),
            amount_minor: Some(5000),
            return_code: None,
            external_bank_account_id: None,
            event_ts: Utc::now(),
            raw: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn origination_initiated_maps_to_submitted() {
        let ingestor = TreasuryIngestor::new(InMemoryReplayCache::new(), OrgAchLimits::default());
        let (outcome, _) = ingestor.handle_webhook("lithic", payload("ach_origination_initiated", "evt_1"), None).await.unwrap();
        assert_eq!(outcome.event.canonical_state, CanonicalState::Submitted);
        assert!(!outcome.duplicate);
    }

    #[tokio::test]
    async fn duplicate_event_id_returns_cached_response() {
        let ingestor = TreasuryIngestor::new(InMemoryReplayCache::new(), OrgAchLimits::default());
        let (_, first_response) = ingestor.handle_webhook("lithic", payload("ach_origination_initiated", "evt_2"), None).await.unwrap();
        let (outcome, second_response) = ingestor.handle_webhook("lithic", payload("ach_origination_initiated", "evt_2"), None).await.unwrap();
        assert!(outcome.duplicate);
        assert_eq!(first_response, second_response);
    }

    #[tokio::test]
    async fn r02_return_code_pauses_bank_account() {
        let ingestor = TreasuryIngestor::new(InMemoryReplayCache::new(), OrgAchLimits::default());
        let mut p = payload("ach_return_processed", "evt_3");
        p.return_code = Some("R02".to_string());
        p.external_bank_account_id = Some("eba_123".to_string());
        let (outcome, _) = ingestor.handle_webhook("lithic", p, None).await.unwrap();
        assert!(outcome.bank_account_paused);
        assert!(ingestor.bank_account_is_paused(&ExternalBankAccountId::from_raw("eba_123")));
    }

    #[tokio::test]
    async fn r01_return_code_bumps_retry_without_pausing() {
        let ingestor = TreasuryIngestor::new(InMemoryReplayCache::new(), OrgAchLimits::default());
        let mut p = payload("ach_return_processed", "evt_4");
        p.return_code = Some("R01".to_string());
        p.external_bank_account_id = Some("eba_456".to_string());
        let (outcome, _) = ingestor.handle_webhook("lithic", p, None).await.unwrap();
        assert!(!outcome.bank_account_paused);
        assert!(!ingestor.bank_account_is_paused(&ExternalBankAccountId::from_raw("eba_456")));
    }

    #[tokio::test]
    async fn amount_over_per_payment_limit_is_rejected() {
        let limits = OrgAchLimits { max_amount_per_payment_minor: 1000, ..OrgAchLimits::default() };
        let ingestor = TreasuryIngestor::new(InMemoryReplayCache::new(), limits);
        let mut p = payload("ach_origination_initiated", "evt_5");
        p.amount_minor = Some(5000);
        let result = ingestor.handle_webhook("lithic", p, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_event_type_is_rejected() {
        let ingestor = TreasuryIngestor::new(InMemoryReplayCache::new(), OrgAchLimits::default());
        let result = ingestor.handle_webhook("lithic", payload("some_unrelated_event", "evt_6"), None).await;
        assert!(result.is_err());
    }
}
