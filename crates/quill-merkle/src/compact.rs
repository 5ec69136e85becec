//! Compact Merkle range: the right border of a log tree.
//!
//! A tree of `size` leaves decomposes into one perfect subtree per set bit
//! of `size`, largest first. Keeping only those subtree roots is enough to
//! append leaves and compute the root hash in O(log n) per leaf.

use quill_types::Hash;

use crate::error::{MerkleError, Result};
use crate::rfc6962::{empty_root, hash_children};

/// Subtree roots covering leaves `[0, size)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactRange {
    size: u64,
    hashes: Vec<Hash>,
}

impl CompactRange {
    /// Range over the empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a range from its subtree hashes, ordered as [`node_coords`].
    pub fn from_hashes(size: u64, hashes: Vec<Hash>) -> Result<Self> {
        let expected = size.count_ones() as usize;
        if hashes.len() != expected {
            return Err(MerkleError::BadRangeShape {
                size,
                expected,
                actual: hashes.len(),
            });
        }
        Ok(Self { size, hashes })
    }

    /// Number of leaves covered.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The subtree hashes, left to right.
    pub fn hashes(&self) -> &[Hash] {
        &self.hashes
    }

    /// Append one leaf hash.
    ///
    /// `visit(level, index, hash)` is called for the leaf itself and for
    /// every perfect subtree completed by the append.
    pub fn append(&mut self, leaf_hash: Hash, mut visit: impl FnMut(u32, u64, &Hash)) -> Result<()> {
        let index = self.size;
        let next = index
            .checked_add(1)
            .ok_or(MerkleError::SizeOverflow { size: index, count: 1 })?;

        visit(0, index, &leaf_hash);
        let mut hash = leaf_hash;
        let mut level = 0u32;
        while (index >> level) & 1 == 1 {
            let Some(left) = self.hashes.pop() else {
                return Err(MerkleError::BadRangeShape {
                    size: index,
                    expected: index.count_ones() as usize,
                    actual: self.hashes.len(),
                });
            };
            hash = hash_children(&left, &hash);
            level += 1;
            visit(level, index >> level, &hash);
        }
        self.hashes.push(hash);
        self.size = next;
        Ok(())
    }

    /// Root hash of the covered tree.
    ///
    /// Subtrees are folded right to left. `visit` is called for each
    /// intermediate node created by the fold; these nodes are not perfect
    /// subtrees and are superseded once the tree grows past them.
    pub fn root(&self, mut visit: impl FnMut(u32, u64, &Hash)) -> Hash {
        let Some((last, rest)) = self.hashes.split_last() else {
            return empty_root();
        };
        let coords = node_coords(self.size);
        let mut hash = *last;
        for (i, left) in rest.iter().enumerate().rev() {
            let (level, index) = coords[i];
            hash = hash_children(left, &hash);
            visit(level + 1, index >> 1, &hash);
        }
        hash
    }
}

/// `(level, index)` of each subtree in the compact range for `size`, left
/// to right.
pub fn node_coords(size: u64) -> Vec<(u32, u64)> {
    let mut coords = Vec::with_capacity(size.count_ones() as usize);
    let mut begin = 0u64;
    for level in (0..u64::BITS).rev() {
        if (size >> level) & 1 == 1 {
            coords.push((level, begin >> level));
            begin += 1 << level;
        }
    }
    coords
}
