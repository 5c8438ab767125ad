//! Append-only, hash-chained audit ledger (spec.md §3 `LedgerEntry`, §4.7, §5).
//!
//! Close to a direct port of the teacher's `ibank-core/src/ledger.rs::AppendOnlyLedger`:
//! the same build-then-commit two-phase append (compute the entry and its hash first,
//! validate index/prev_hash/hash, then push) and the same `verify_chain` walk. The entry
//! shape and hash algorithm are generalized to spec.md §3's `LedgerEntry` and SHA-256
//! canonical-JSON hashing rather than the teacher's blake3 commitment/audit/outcome kinds.

use crate::error::{AgentPayError, Result};
use crate::mandate::canonical_json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub index: u64,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub actor: String,
    pub subject: String,
    pub amount_minor: Option<i64>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl LedgerEntry {
    /// Canonical JSON of the entry with `entry_hash` excluded, the exact preimage hashed
    /// to produce it (spec.md §3 invariant).
    fn hashable_value(&self) -> serde_json::Value {
        serde_json::json!({
            "entry_id": self.entry_id,
            "index": self.index,
            "type": self.entry_type,
            "actor": self.actor,
            "subject": self.subject,
            "amount_minor": self.amount_minor,
            "metadata": self.metadata,
            "created_at": self.created_at.to_rfc3339(),
            "prev_hash": self.prev_hash,
        })
    }

    pub fn compute_hash(&self) -> String {
        crate::mandate::hex_sha256(canonical_json(&self.hashable_value()).as_bytes())
    }
}

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000";

/// Append-only, hash-chained ledger. `append` builds the candidate entry, computes its
/// hash, and only then pushes it — so a caller can inspect `build_entry`'s output (e.g. to
/// log it) before it's committed, mirroring the teacher's `build_entry`/`commit_entry` split.
#[derive(Default)]
pub struct AppendOnlyLedger {
    entries: Vec<LedgerEntry>,
}

impl AppendOnlyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrates a ledger from previously-persisted entries, verifying the index sequence
    /// and hash chain as it goes.
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Result<Self> {
        let ledger = Self { entries };
        ledger.verify_chain()?;
        Ok(ledger)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn last_hash(&self) -> String {
        self.entries.last().map(|e| e.entry_hash.clone()).unwrap_or_else(|| GENESIS_HASH.to_string())
    }

    pub fn build_entry(
        &self,
        entry_type: impl Into<String>,
        actor: impl Into<String>,
        subject: impl Into<String>,
        amount_minor: Option<i64>,
        metadata: serde_json::Value,
    ) -> LedgerEntry {
        let index = self.entries.len() as u64;
        let prev_hash = self.last_hash();
        let mut entry = LedgerEntry {
            entry_id: format!("entry_{}", Ulid::new()),
            index,
            entry_type: entry_type.into(),
            actor: actor.into(),
            subject: subject.into(),
            amount_minor,
            metadata,
            created_at: Utc::now(),
            prev_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }

    /// Commits an entry built by [`Self::build_entry`], re-validating index/prev_hash/hash.
    /// Exposed so a persistence wrapper (see `audit::persistence`) can insert the row into
    /// its backing store between `build_entry` and `commit_entry`, mirroring the teacher's
    /// persist-before-commit ordering.
    pub fn commit_built(&mut self, entry: LedgerEntry) -> Result<LedgerEntry> {
        self.commit_entry(entry.clone())?;
        Ok(entry)
    }

    fn commit_entry(&mut self, entry: LedgerEntry) -> Result<()> {
        let expected_index = self.entries.len() as u64;
        if entry.index != expected_index {
            return Err(AgentPayError::Internal(format!(
                "ledger append out of sequence: expected index {}, got {}",
                expected_index, entry.index
            )));
        }
        if entry.prev_hash != self.last_hash() {
            return Err(AgentPayError::Internal("ledger append prev_hash mismatch".into()));
        }
        if entry.compute_hash() != entry.entry_hash {
            return Err(AgentPayError::Internal("ledger entry hash does not match its own contents".into()));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn append(
        &mut self,
        entry_type: impl Into<String>,
        actor: impl Into<String>,
        subject: impl Into<String>,
        amount_minor: Option<i64>,
        metadata: serde_json::Value,
    ) -> Result<LedgerEntry> {
        let entry = self.build_entry(entry_type, actor, subject, amount_minor, metadata);
        self.commit_entry(entry.clone())?;
        Ok(entry)
    }

    pub fn verify_chain(&self) -> Result<()> {
        let mut expected_prev = GENESIS_HASH.to_string();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.index != i as u64 {
                return Err(AgentPayError::Internal(format!("entry at position {} carries index {}", i, entry.index)));
            }
            if entry.prev_hash != expected_prev {
                return Err(AgentPayError::Internal(format!("hash chain broken at entry {}", entry.entry_id)));
            }
            if entry.compute_hash() != entry.entry_hash {
                return Err(AgentPayError::Internal(format!("entry {} has been tampered with", entry.entry_id)));
            }
            expected_prev = entry.entry_hash.clone();
        }
        Ok(())
    }

    pub fn find_entry(&self, entry_id: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.entry_id == entry_id)
    }

    pub fn unanchored_since(&self, last_anchored_index: u64) -> &[LedgerEntry] {
        let start = last_anchored_index as usize;
        if start >= self.entries.len() {
            &[]
        } else {
            &self.entries[start..]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_hash_chain() {
        let mut ledger = AppendOnlyLedger::new();
        ledger.append("mandate_accepted", "verifier", "agent_1", Some(5000), serde_json::json!({})).unwrap();
        ledger.append("policy_decision", "policy_engine", "agent_1", None, serde_json::json!({"decision": "allow"})).unwrap();
        assert!(ledger.verify_chain().is_ok());
        assert_eq!(ledger.entries().len(), 2);
    }

    #[test]
    fn detects_tampered_entries() {
        let mut ledger = AppendOnlyLedger::new();
        ledger.append("mandate_accepted", "verifier", "agent_1", Some(5000), serde_json::json!({})).unwrap();
        let mut entries = ledger.entries().to_vec();
        entries[0].amount_minor = Some(999_999);
        let rehydrated = AppendOnlyLedger::from_entries(entries);
        assert!(rehydrated.is_err());
    }

    #[test]
    fn rejects_broken_prev_hash_on_rehydrate() {
        let mut ledger = AppendOnlyLedger::new();
        ledger.append("a", "x", "y", None, serde_json::json!({})).unwrap();
        ledger.append("b", "x", "y", None, serde_json::json!({})).unwrap();
        let mut entries = ledger.entries().to_vec();
        entries[1].prev_hash = "deadbeef".repeat(8);
        assert!(AppendOnlyLedger::from_entries(entries).is_err());
    }
}
