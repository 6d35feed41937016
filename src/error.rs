// Crate-wide error types

use thiserror::Error;

use crate::consensus::ConsensusError;
use crate::core::{DecodeError, Hash256};

pub type Result<T> = std::result::Result<T, Error>;

/// Every fallible boundary in the crate surfaces one of these.
///
/// Consensus violations block the offending object from being applied;
/// not-found and insufficient-funds conditions are recoverable and reported
/// to the caller; decode failures abort only the affected operation; store
/// errors are the one condition the process treats as fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error("block {0} not found")]
    BlockNotFound(Hash256),

    #[error("transaction {0} not found")]
    TransactionNotFound(Hash256),

    #[error("output {index} of transaction {txid} not found")]
    OutputNotFound { txid: Hash256, index: i32 },

    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("chain store is empty")]
    NoChain,

    #[error("mining cancelled")]
    MiningCancelled,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] secp256k1::Error),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("{0}")]
    Config(String),
}
