//! Tamper-evident audit ledger and blockchain anchoring (spec.md §4.7).

pub mod anchor;
pub mod ledger;
pub mod merkle;
pub mod persistence;

pub use anchor::{Anchor, AnchorChainExecutor, AnchorSchedulerConfig, AnchorStatus};
pub use ledger::{AppendOnlyLedger, LedgerEntry};
pub use merkle::{verify_proof, MerkleTree, ProofDirection, ProofStep};
pub use persistence::{LedgerStorageConfig, PersistentLedger};
