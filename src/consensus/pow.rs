// Proof of work over the canonical block header encoding

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::{hash256, Block, Hash256};
use crate::error::{Error, Result};

/// Fixed mining difficulty: a block hash must be below 2^(256 - TARGET_BITS).
/// Difficulty does not retarget in this system.
pub const TARGET_BITS: u32 = 16;

/// How often the mining loop checks its cancellation flag
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Cooperative cancellation for an in-progress mine.
///
/// Mining is CPU-bound and occupies its thread until a nonce is found;
/// callers on an async runtime dispatch it to a blocking worker and keep a
/// clone of this flag to stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Proof-of-work engine with the fixed difficulty target
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    target: [u8; 32],
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new()
    }
}

impl ProofOfWork {
    pub fn new() -> Self {
        Self {
            target: target_bytes(TARGET_BITS),
        }
    }

    /// Find a nonce whose header digest falls below the target.
    ///
    /// Iterates from 0 upward; in practice terminates within a small multiple
    /// of 2^TARGET_BITS attempts. Returns `None` only when cancelled.
    pub fn mine(&self, block: &Block, cancel: &CancelFlag) -> Option<(u64, Hash256)> {
        for nonce in 0u64.. {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return None;
            }

            let hash = hash256(&block.header_bytes(nonce));
            if self.meets_target(&hash) {
                return Some((nonce, hash));
            }

            if nonce > 0 && nonce % 1_000_000 == 0 {
                log::debug!("mining: {} attempts so far", nonce);
            }
        }
        unreachable!("nonce space exhausted")
    }

    /// Mine `block` and stamp the winning nonce and hash onto it
    pub fn seal(&self, block: &mut Block, cancel: &CancelFlag) -> Result<()> {
        let (nonce, hash) = self.mine(block, cancel).ok_or(Error::MiningCancelled)?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(())
    }

    /// Recompute the header digest with the stored nonce and check it against
    /// the target. A block failing this is consensus-invalid and must never
    /// be appended.
    pub fn validate(&self, block: &Block) -> bool {
        let hash = hash256(&block.header_bytes(block.nonce));
        self.meets_target(&hash)
    }

    /// Interpreting both as big-endian integers, hash < target
    fn meets_target(&self, hash: &Hash256) -> bool {
        hash.as_bytes()[..] < self.target[..]
    }
}

/// 2^(256 - bits) as a 32-byte big-endian array
fn target_bytes(bits: u32) -> [u8; 32] {
    debug_assert!(bits >= 1 && bits <= 255);
    let shift = 256 - bits;
    let mut target = [0u8; 32];
    target[31 - (shift / 8) as usize] = 1 << (shift % 8);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Hash256, Transaction};

    fn unsealed_block() -> Block {
        let coinbase = Transaction::coinbase(vec![1; 20], "pow test");
        Block::new(vec![coinbase], Hash256::zero(), 0, TARGET_BITS)
    }

    #[test]
    fn test_target_bytes_for_16_bits() {
        let target = target_bytes(16);
        assert_eq!(target[0], 0);
        assert_eq!(target[1], 1);
        assert!(target[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_target_extremes() {
        let pow = ProofOfWork::new();
        assert!(pow.meets_target(&Hash256::zero()));
        assert!(!pow.meets_target(&Hash256::new([0xff; 32])));
    }

    #[test]
    fn test_mined_block_validates() {
        let pow = ProofOfWork::new();
        let mut block = unsealed_block();

        pow.seal(&mut block, &CancelFlag::new()).unwrap();

        assert!(pow.validate(&block));
        assert_eq!(block.hash, hash256(&block.header_bytes(block.nonce)));
    }

    #[test]
    fn test_flipped_header_fails_validation() {
        let pow = ProofOfWork::new();
        let mut block = unsealed_block();
        pow.seal(&mut block, &CancelFlag::new()).unwrap();

        let mut tampered = block.clone();
        tampered.timestamp ^= 1;
        assert!(!pow.validate(&tampered));

        let mut tampered = block.clone();
        tampered.nonce ^= 1;
        assert!(!pow.validate(&tampered));
    }

    #[test]
    fn test_cancelled_mine_stops() {
        let pow = ProofOfWork::new();
        let mut block = unsealed_block();

        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = pow.seal(&mut block, &cancel);
        assert!(matches!(result, Err(Error::MiningCancelled)));
    }
}
