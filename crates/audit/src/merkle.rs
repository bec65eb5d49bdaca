//! Binary Merkle commitments over record hashes.
//!
//! Trees are built over leaves in insertion order; a level of odd width
//! duplicates its last element. Both rules are fixed so independently
//! computed roots over the same records always match.

use thiserror::Error;

use palisade_core::{hash_bytes, Hash32};

#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("Cannot build a Merkle tree over an empty leaf set")]
    EmptyLeafSet,

    #[error("Leaf index {index} out of range for {leaf_count} leaves")]
    LeafOutOfRange { index: usize, leaf_count: usize },
}

pub type MerkleResult<T> = Result<T, MerkleError>;

fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    hash_bytes(&combined)
}

/// Binary Merkle tree retaining every level for proof generation.
pub struct MerkleTree {
    levels: Vec<Vec<Hash32>>,
    leaf_count: usize,
}

/// Inclusion proof: sibling hashes from leaf to root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub sibling_hashes: Vec<Hash32>,
    /// True at step i when that sibling sits to the left of the running hash
    pub sibling_on_left: Vec<bool>,
}

impl MerkleTree {
    /// Builds the tree bottom-up.
    pub fn build(leaves: &[Hash32]) -> MerkleResult<Self> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyLeafSet);
        }

        let mut levels: Vec<Vec<Hash32>> = vec![leaves.to_vec()];
        while levels[levels.len() - 1].len() > 1 {
            let current = &levels[levels.len() - 1];
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            let mut i = 0;
            while i < current.len() {
                let left = &current[i];
                // Odd-width level: the last node pairs with itself.
                let right = current.get(i + 1).unwrap_or(left);
                next.push(hash_pair(left, right));
                i += 2;
            }
            levels.push(next);
        }

        Ok(Self {
            leaf_count: leaves.len(),
            levels,
        })
    }

    /// Root of the tree. `build` guarantees the top level holds one node.
    pub fn root(&self) -> Hash32 {
        self.levels[self.levels.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn generate_proof(&self, leaf_index: usize) -> MerkleResult<MerkleProof> {
        if leaf_index >= self.leaf_count {
            return Err(MerkleError::LeafOutOfRange {
                index: leaf_index,
                leaf_count: self.leaf_count,
            });
        }

        let mut sibling_hashes = Vec::new();
        let mut sibling_on_left = Vec::new();
        let mut index = leaf_index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = level.get(index ^ 1).copied().unwrap_or(level[index]);
            sibling_hashes.push(sibling);
            sibling_on_left.push(index % 2 == 1);
            index /= 2;
        }

        Ok(MerkleProof {
            leaf_index,
            sibling_hashes,
            sibling_on_left,
        })
    }
}

/// Recomputes the root from a leaf and its proof.
pub fn verify_proof(leaf: &Hash32, proof: &MerkleProof, expected_root: &Hash32) -> bool {
    let mut current = *leaf;
    for (sibling, on_left) in proof.sibling_hashes.iter().zip(&proof.sibling_on_left) {
        current = if *on_left {
            hash_pair(sibling, &current)
        } else {
            hash_pair(&current, sibling)
        };
    }
    current == *expected_root
}

/// Convenience for callers that only need the root.
pub fn merkle_root(leaves: &[Hash32]) -> MerkleResult<Hash32> {
    Ok(MerkleTree::build(leaves)?.root())
}
