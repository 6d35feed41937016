// Core ledger data structures

pub mod block;
pub mod hash;
pub mod merkle;
pub mod serialize;
pub mod transaction;
pub mod types;

pub use block::{Block, BLOCK_VERSION};
pub use hash::{hash160, hash256};
pub use merkle::merkle_root;
pub use serialize::{DecodeError, Serializable};
pub use transaction::{Transaction, TxInput, TxOutput, TxOutputs, SUBSIDY};
pub use types::Hash256;
