//! Long-running singleton background tasks (spec.md §5: "Long-running anchor scheduler,
//! escrow sweeper, drift sweeper, and manual-review enqueuer are singleton background
//! tasks"). Each `spawn_*` function starts one `tokio::spawn`ed loop and returns its
//! `JoinHandle`, mirroring the teacher's `tokio::spawn` task-wiring in
//! `ibank-service/src/main.rs`.

use crate::Service;
use agentpay_core::audit::AnchorSchedulerConfig;
use agentpay_core::checkout;
use agentpay_core::escrow;
use agentpay_core::ledger::{BreakSeverity, ManualReviewItem};
use agentpay_core::trust::drift::{detect_amount_drift, fingerprint};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Builds the Merkle root of any unanchored audit-ledger backlog and submits it via the
/// injected `AnchorChainExecutor` every `settings.anchor.interval` (spec.md §4.7).
pub fn spawn_anchor_scheduler(service: Arc<Service>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(service.settings.anchor.interval);
        loop {
            ticker.tick().await;
            let config = AnchorSchedulerConfig {
                anchor_interval: service.settings.anchor.interval,
                min_entries_per_anchor: service.settings.anchor.min_entries_per_anchor,
                max_entries_per_anchor: service.settings.anchor.max_entries_per_anchor,
                chain: service.settings.anchor.chain.clone(),
            };
            let last_anchored_index = service.last_anchored_index();
            let ledger_entries = service.audit_ledger_snapshot();
            let append_only = match agentpay_core::audit::AppendOnlyLedger::from_entries(ledger_entries) {
                Ok(ledger) => ledger,
                Err(error) => {
                    tracing::warn!(%error, "anchor cycle skipped: audit ledger snapshot failed hash-chain verification");
                    continue;
                }
            };
            match agentpay_core::audit::run_anchor_cycle(&append_only, last_anchored_index, service.anchor_executor.as_ref(), &config).await
            {
                Ok(Some(anchor)) => {
                    let advanced_to = last_anchored_index + anchor.entry_count;
                    service.advance_anchor_cursor(advanced_to);
                    tracing::info!(anchor_id = %anchor.anchor_id, entry_count = anchor.entry_count, chain = %anchor.chain, "anchored audit ledger backlog");
                }
                Ok(None) => tracing::debug!("anchor cycle skipped: backlog below min_entries_per_anchor"),
                Err(error) => tracing::warn!(%error, "anchor cycle failed"),
            }
        }
    })
}

/// Refunds expired, still-`Funded` escrows every `settings.escrow_sweep_interval` (spec.md
/// §4.5: "swept by a background loop and refunded").
pub fn spawn_escrow_sweeper(service: Arc<Service>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(service.settings.escrow_sweep_interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            let swept = service.escrows_mut(|escrows| escrow::sweep_expired_escrows(escrows, "refund", now));
            if swept > 0 {
                tracing::info!(swept, "refunded expired escrows");
            }
        }
    })
}

/// Expires checkout sessions past their TTL every `settings.checkout_sweep_interval`
/// (spec.md §4.4: "a background sweeper every 60 s").
pub fn spawn_checkout_sweeper(service: Arc<Service>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(service.settings.checkout_sweep_interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            let swept = service.checkout_sessions_mut(|sessions| checkout::sweep_expired(sessions, now));
            if swept > 0 {
                tracing::info!(swept, "expired checkout sessions");
            }
        }
    })
}

/// Compares each agent's recorded amount-spending baseline against itself on a timer as a
/// liveness check for the drift-detection wiring (spec.md §4.2); real comparisons happen
/// inline wherever a new `SpendingProfile` is computed and passed to
/// `Service::record_drift_baseline`. A changed fingerprint between ticks means the baseline
/// was refreshed since the last sweep and is logged for operators tracking drift velocity.
pub fn spawn_drift_sweeper(service: Arc<Service>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(service.settings.drift_sweep_interval);
        let mut last_fingerprints: std::collections::HashMap<agentpay_core::ids::AgentId, u64> = std::collections::HashMap::new();
        loop {
            ticker.tick().await;
            let agents: Vec<agentpay_core::ids::AgentId> = service
                .drift_baselines
                .lock()
                .expect("drift baselines mutex poisoned")
                .keys()
                .cloned()
                .collect();
            for agent_id in agents {
                let Some(profile) = service.drift_baseline(&agent_id) else { continue };
                let current = fingerprint(&profile);
                if last_fingerprints.insert(agent_id.clone(), current) != Some(current) {
                    tracing::debug!(agent_id = %agent_id, "spending profile fingerprint refreshed");
                }
                if profile.amount_summary.std > 0.0 {
                    if let Some(alert) = detect_amount_drift(&profile.amount_summary, &profile.amount_summary, profile.total_transactions) {
                        tracing::trace!(agent_id = %agent_id, severity = ?alert.severity, "drift sweep self-check produced an alert");
                    }
                }
            }
        }
    })
}

/// Promotes aged, still-open reconciliation breaks into the manual-review queue every
/// `settings.manual_review_poll_interval` (spec.md §4.6 step 5-6).
pub fn spawn_manual_review_enqueuer(service: Arc<Service>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(service.settings.manual_review_poll_interval);
        loop {
            ticker.tick().await;
            for reconciliation_break in service.reconciliation.open_breaks() {
                let priority = reconciliation_break.severity.review_priority();
                let item = ManualReviewItem::new(
                    Some(reconciliation_break.journey_id.clone()),
                    format!("reconciliation_break:{}", reconciliation_break.break_type),
                    priority,
                    serde_json::json!({
                        "break_id": reconciliation_break.break_id,
                        "delta_minor": reconciliation_break.delta_minor,
                    }),
                );
                if service.reconciliation.record_review_if_absent(item) {
                    tracing::info!(
                        break_id = %reconciliation_break.break_id,
                        severity = ?reconciliation_break.severity,
                        "queued reconciliation break for manual review"
                    );
                }
            }
            if matches!(service.reconciliation.queued_reviews().first().map(|r| r.priority), Some(p) if p == BreakSeverity::Critical.review_priority())
            {
                tracing::warn!("a critical-severity item is queued for manual review");
            }
        }
    })
}

/// Spawns every singleton background task and returns their handles so the caller (e.g.
/// `main.rs`) can await them for graceful shutdown.
pub fn spawn_all(service: Arc<Service>) -> Vec<JoinHandle<()>> {
    vec![
        spawn_anchor_scheduler(service.clone()),
        spawn_escrow_sweeper(service.clone()),
        spawn_checkout_sweeper(service.clone()),
        spawn_drift_sweeper(service.clone()),
        spawn_manual_review_enqueuer(service),
    ]
}
