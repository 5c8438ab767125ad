//! Blockchain anchoring of audit-ledger Merkle roots (spec.md §3 `Anchor`, §4.7, §5).

use super::ledger::{AppendOnlyLedger, LedgerEntry};
use super::merkle::{leaf_hash, MerkleTree, ProofStep};
use crate::error::{AgentPayError, Result};
use crate::ids::AnchorId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    Pending,
    Anchored,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    pub anchor_id: AnchorId,
    pub merkle_root: String,
    pub entry_count: u64,
    pub first_entry_id: String,
    pub last_entry_id: String,
    pub chain: String,
    pub status: AnchorStatus,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Injected collaborator (spec.md §6 `ChainExecutor`): submits a Merkle root and returns a
/// transaction hash, idempotent on the submitted root.
#[async_trait]
pub trait AnchorChainExecutor: Send + Sync {
    async fn submit_root(&self, chain: &str, merkle_root: &str) -> Result<(String, Option<u64>)>;
}

pub struct AnchorSchedulerConfig {
    pub anchor_interval: std::time::Duration,
    pub min_entries_per_anchor: u64,
    pub max_entries_per_anchor: u64,
    pub chain: String,
}

impl Default for AnchorSchedulerConfig {
    fn default() -> Self {
        Self {
            anchor_interval: std::time::Duration::from_secs(300),
            min_entries_per_anchor: 1,
            max_entries_per_anchor: 10_000,
            chain: "base".to_string(),
        }
    }
}

/// Builds a Merkle tree over the unanchored backlog and submits its root, per spec.md §4.7.
/// This is pure orchestration logic; the background-loop wiring (every `anchor_interval`
/// via `tokio::spawn`) lives in `agentpay-service`, matching the teacher's task-spawning
/// pattern in `ibank-service/src/main.rs`.
pub async fn run_anchor_cycle(
    ledger: &AppendOnlyLedger,
    last_anchored_index: u64,
    executor: &dyn AnchorChainExecutor,
    config: &AnchorSchedulerConfig,
) -> Result<Option<Anchor>> {
    let backlog = ledger.unanchored_since(last_anchored_index);
    if (backlog.len() as u64) < config.min_entries_per_anchor {
        return Ok(None);
    }
    let capped: &[LedgerEntry] = if backlog.len() as u64 > config.max_entries_per_anchor {
        &backlog[..config.max_entries_per_anchor as usize]
    } else {
        backlog
    };

    let leaf_hashes: Vec<String> = capped.iter().map(leaf_hash).collect();
    let tree = MerkleTree::build(leaf_hashes);
    let root = tree.root().ok_or_else(|| AgentPayError::Internal("merkle tree produced no root".into()))?;

    let mut anchor = Anchor {
        anchor_id: AnchorId::new(),
        merkle_root: root.clone(),
        entry_count: capped.len() as u64,
        first_entry_id: capped.first().map(|e| e.entry_id.clone()).unwrap_or_default(),
        last_entry_id: capped.last().map(|e| e.entry_id.clone()).unwrap_or_default(),
        chain: config.chain.clone(),
        status: AnchorStatus::Pending,
        tx_hash: None,
        block_number: None,
        created_at: Utc::now(),
    };

    match executor.submit_root(&config.chain, &root).await {
        Ok((tx_hash, block_number)) => {
            anchor.status = AnchorStatus::Anchored;
            anchor.tx_hash = Some(tx_hash);
            anchor.block_number = block_number;
        }
        Err(_) => {
            anchor.status = AnchorStatus::Failed;
        }
    }
    Ok(Some(anchor))
}

/// Builds a tree over `entries` and returns `(tree, proof, leaf)` for the entry at `index`,
/// for a caller verifying inclusion against an already-anchored root offline.
pub fn inclusion_proof(entries: &[LedgerEntry], index: usize) -> Option<(String, Vec<ProofStep>, String)> {
    let leaf_hashes: Vec<String> = entries.iter().map(leaf_hash).collect();
    let leaf = leaf_hashes.get(index)?.clone();
    let tree = MerkleTree::build(leaf_hashes);
    let proof = tree.proof(index)?;
    let root = tree.root()?;
    Some((root, proof, leaf))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysSucceeds;

    #[async_trait]
    impl AnchorChainExecutor for AlwaysSucceeds {
        async fn submit_root(&self, _chain: &str, _root: &str) -> Result<(String, Option<u64>)> {
            Ok(("0xfeed".to_string(), Some(42)))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl AnchorChainExecutor for AlwaysFails {
        async fn submit_root(&self, _chain: &str, _root: &str) -> Result<(String, Option<u64>)> {
            Err(AgentPayError::service("chain_submit_failed", "simulated failure"))
        }
    }

    fn ledger_with(n: usize) -> AppendOnlyLedger {
        let mut ledger = AppendOnlyLedger::new();
        for i in 0..n {
            ledger.append("test_entry", "tester", format!("subject_{}", i), None, serde_json::json!({})).unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn anchors_backlog_when_above_minimum() {
        let ledger = ledger_with(5);
        let config = AnchorSchedulerConfig { min_entries_per_anchor: 3, ..Default::default() };
        let anchor = run_anchor_cycle(&ledger, 0, &AlwaysSucceeds, &config).await.unwrap().unwrap();
        assert_eq!(anchor.status, AnchorStatus::Anchored);
        assert_eq!(anchor.entry_count, 5);
    }

    #[tokio::test]
    async fn skips_when_backlog_below_minimum() {
        let ledger = ledger_with(1);
        let config = AnchorSchedulerConfig { min_entries_per_anchor: 5, ..Default::default() };
        let anchor = run_anchor_cycle(&ledger, 0, &AlwaysSucceeds, &config).await.unwrap();
        assert!(anchor.is_none());
    }

    #[tokio::test]
    async fn marks_failed_on_executor_error() {
        let ledger = ledger_with(3);
        let config = AnchorSchedulerConfig::default();
        let anchor = run_anchor_cycle(&ledger, 0, &AlwaysFails, &config).await.unwrap().unwrap();
        assert_eq!(anchor.status, AnchorStatus::Failed);
    }

    #[test]
    fn inclusion_proof_verifies_offline() {
        let ledger = ledger_with(7);
        let (root, proof, leaf) = inclusion_proof(ledger.entries(), 4).unwrap();
        assert!(super::super::merkle::verify_proof(&leaf, &proof, &root));
    }
}
