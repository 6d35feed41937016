// tinycoin - a minimal proof-of-work UTXO ledger node

pub mod cli;
pub mod consensus;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use crate::cli::{Cli, CliHandler};
pub use crate::consensus::{CancelFlag, ProofOfWork, TARGET_BITS};
pub use crate::core::{Block, Hash256, Transaction, TxInput, TxOutput, SUBSIDY};
pub use crate::error::{Error, Result};
pub use crate::network::{Message, Node};
pub use crate::storage::{Chain, Storage, UtxoIndex};
pub use crate::wallet::{KeyPair, Wallets};
