//! RFC 6962 Merkle tree hashing over SHA-256.
//!
//! Leaf and interior hashes are domain separated (`0x00` / `0x01` prefix) so
//! a leaf can never be passed off as an interior node.

use quill_types::Hash;
use sha2::{Digest, Sha256};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Root hash of the empty tree: `SHA-256("")`.
pub fn empty_root() -> Hash {
    Sha256::digest([]).into()
}

/// Leaf hash: `SHA-256(0x00 || data)`.
pub fn hash_leaf(data: &[u8]) -> Hash {
    let mut h = Sha256::new();
    h.update([LEAF_PREFIX]);
    h.update(data);
    h.finalize().into()
}

/// Interior node hash: `SHA-256(0x01 || left || right)`.
pub fn hash_children(left: &Hash, right: &Hash) -> Hash {
    let mut h = Sha256::new();
    h.update([NODE_PREFIX]);
    h.update(left);
    h.update(right);
    h.finalize().into()
}

/// Merkle tree hash computed from scratch over all leaf hashes.
///
/// O(n) recursion following the RFC definition. The incremental engine never
/// calls this; auditors and tests use it to cross-check stored roots.
pub fn root_from_leaf_hashes(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => empty_root(),
        1 => leaves[0],
        n => {
            // Largest power of two strictly smaller than n.
            let split = 1usize << (usize::BITS - 1 - (n - 1).leading_zeros());
            let left = root_from_leaf_hashes(&leaves[..split]);
            let right = root_from_leaf_hashes(&leaves[split..]);
            hash_children(&left, &right)
        }
    }
}
