//! Merkle tree construction and inclusion proofs (spec.md §4.7, §8, §9).
//!
//! A close port of `original_source/sardis_ledger/merkle_tree.py`: commutative pair hashing
//! via sorted-byte concatenation (so `H(lo||hi)` is independent of left/right order),
//! explicit duplication of the trailing node at odd levels, and proofs that include the
//! duplicated sibling so a verifier with no tree access can still reconstruct the root
//! (spec.md §9 Open Question: duplicated siblings are always included, no migration path
//! is modeled).

use super::ledger::LedgerEntry;
use crate::mandate::canonical_json;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofDirection {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct ProofStep {
    pub sibling_hash: String,
    pub direction: ProofDirection,
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// Levels of the tree, leaves first. Each level's length may be odd; `build` duplicates
    /// the trailing node to compute the next level but does not store the duplicate here —
    /// duplication is reconstructed on demand in `get_proof`.
    levels: Vec<Vec<String>>,
}

/// Leaf hash is `H(canonical_json(entry))` (spec.md §4.7).
pub fn leaf_hash(entry: &LedgerEntry) -> String {
    let value = serde_json::to_value(entry).expect("ledger entry always serializes");
    crate::mandate::hex_sha256(canonical_json(&value).as_bytes())
}

fn hash_pair(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::default();
    hasher.update(lo.as_bytes());
    hasher.update(hi.as_bytes());
    hex::encode(hasher.finalize())
}

impl MerkleTree {
    pub fn build(leaf_hashes: Vec<String>) -> Self {
        if leaf_hashes.is_empty() {
            return Self { levels: vec![vec![]] };
        }
        let mut levels = vec![leaf_hashes];
        while levels.last().unwrap().len() > 1 {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            let mut i = 0;
            while i < current.len() {
                let left = &current[i];
                let right = if i + 1 < current.len() { &current[i + 1] } else { left };
                next.push(hash_pair(left, right));
                i += 2;
            }
            levels.push(next);
        }
        Self { levels }
    }

    pub fn root(&self) -> Option<String> {
        self.levels.last().and_then(|level| level.first()).cloned()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(|l| l.len()).unwrap_or(0)
    }

    /// Proof of inclusion for the leaf at `index`, carrying `(sibling, direction)` tuples
    /// bottom-up, including duplicated siblings at odd levels.
    pub fn proof(&self, index: usize) -> Option<Vec<ProofStep>> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut steps = Vec::new();
        let mut current_index = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let is_left = current_index % 2 == 0;
            let sibling_index = if is_left { current_index + 1 } else { current_index - 1 };
            let sibling_hash = if sibling_index < level.len() {
                level[sibling_index].clone()
            } else {
                // odd trailing node: the duplicated sibling is itself
                level[current_index].clone()
            };
            steps.push(ProofStep {
                sibling_hash,
                direction: if is_left { ProofDirection::Right } else { ProofDirection::Left },
            });
            current_index /= 2;
        }
        Some(steps)
    }
}

/// Verifies `leaf` against `root` by folding `proof` bottom-up (spec.md §8 Testable
/// Property 4): flipping any byte of any entry or proof element must yield `false`.
pub fn verify_proof(leaf: &str, proof: &[ProofStep], root: &str) -> bool {
    let mut current = leaf.to_string();
    for step in proof {
        current = match step.direction {
            ProofDirection::Right => hash_pair(&current, &step.sibling_hash),
            ProofDirection::Left => hash_pair(&step.sibling_hash, &current),
        };
    }
    current == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(n: usize) -> Vec<String> {
        (0..n).map(|i| crate::mandate::hex_sha256(format!("entry-{}", i).as_bytes())).collect()
    }

    #[test]
    fn single_entry_tree_has_itself_as_root() {
        let leaves = hashes(1);
        let tree = MerkleTree::build(leaves.clone());
        assert_eq!(tree.root().unwrap(), leaves[0]);
        let proof = tree.proof(0).unwrap();
        assert!(proof.is_empty());
        assert!(verify_proof(&leaves[0], &proof, &tree.root().unwrap()));
    }

    #[test]
    fn seven_entries_forces_odd_level_duplication_and_all_proofs_verify() {
        let leaves = hashes(7);
        let tree = MerkleTree::build(leaves.clone());
        let root = tree.root().unwrap();
        for (i, leaf) in leaves.iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            assert!(verify_proof(leaf, &proof, &root), "proof {} should verify", i);
        }
    }

    #[test]
    fn tampering_any_proof_byte_breaks_verification() {
        let leaves = hashes(7);
        let tree = MerkleTree::build(leaves.clone());
        let root = tree.root().unwrap();
        let mut proof = tree.proof(3).unwrap();
        let mut bytes = proof[0].sibling_hash.clone().into_bytes();
        bytes[0] ^= 0x01;
        proof[0].sibling_hash = String::from_utf8(bytes).unwrap();
        assert!(!verify_proof(&leaves[3], &proof, &root));
    }

    #[test]
    fn tampering_leaf_breaks_verification() {
        let leaves = hashes(4);
        let tree = MerkleTree::build(leaves.clone());
        let root = tree.root().unwrap();
        let proof = tree.proof(2).unwrap();
        assert!(!verify_proof(&leaves[0], &proof, &root));
    }

    #[test]
    fn pair_hash_is_commutative_to_order() {
        let a = hashes(1).remove(0);
        let b = hashes(2).remove(1);
        assert_eq!(hash_pair(&a, &b), hash_pair(&b, &a));
    }
}
