// Merkle aggregation of transaction digests

use crate::core::{hash256, Hash256};

/// Fold an ordered list of transaction digests into a single Merkle root.
///
/// Builds the binary tree bottom-up: each internal node is
/// `hash256(left || right)`. A level with an odd node count pairs its last
/// node with itself, so no digest is ever dropped. The result is
/// order-sensitive: permuting the input changes the root.
///
/// Requires n >= 1; a block always carries at least its coinbase transaction.
pub fn merkle_root(digests: &[Hash256]) -> Hash256 {
    assert!(!digests.is_empty(), "merkle root of zero digests");

    let mut level: Vec<Hash256> = digests.to_vec();

    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);

        for chunk in level.chunks(2) {
            let left = chunk[0];
            let right = if chunk.len() == 2 { chunk[1] } else { chunk[0] };

            let mut combined = Vec::with_capacity(64);
            combined.extend_from_slice(left.as_bytes());
            combined.extend_from_slice(right.as_bytes());
            next.push(hash256(&combined));
        }

        level = next;
    }

    level[0]
}
