// Intrinsic block validation

use thiserror::Error;

use crate::consensus::ProofOfWork;
use crate::core::{hash256, merkle_root, Block, Hash256};

/// A consensus rule was broken. The offending block or transaction must not
/// be applied to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("invalid proof of work")]
    InvalidProofOfWork,

    #[error("stored block hash does not match its header digest")]
    HashMismatch,

    #[error("merkle root does not match block transactions")]
    MerkleMismatch,

    #[error("coinbase transaction outside first position")]
    CoinbaseNotFirst,

    #[error("transaction {0} failed signature verification")]
    InvalidTransaction(Hash256),

    #[error("output {index} of transaction {txid} is not spendable")]
    SpentOrUnknownOutput { txid: Hash256, index: i32 },
}

/// Checks a block can pass without looking at the rest of the chain:
/// coinbase placement, merkle root, stored hash, and proof of work.
/// Signature and double-spend checks need chain context and run at mine
/// time against the UTXO index.
pub fn validate_block(block: &Block) -> Result<(), ConsensusError> {
    for tx in block.transactions.iter().skip(1) {
        if tx.is_coinbase() {
            return Err(ConsensusError::CoinbaseNotFirst);
        }
    }

    let expected_root = if block.transactions.is_empty() {
        Hash256::zero()
    } else {
        let txids: Vec<Hash256> = block.transactions.iter().map(|tx| tx.id).collect();
        merkle_root(&txids)
    };
    if expected_root != block.merkle_root {
        return Err(ConsensusError::MerkleMismatch);
    }

    if hash256(&block.header_bytes(block.nonce)) != block.hash {
        return Err(ConsensusError::HashMismatch);
    }

    if !ProofOfWork::new().validate(block) {
        return Err(ConsensusError::InvalidProofOfWork);
    }

    Ok(())
}
