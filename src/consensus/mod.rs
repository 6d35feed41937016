// Consensus rules: proof of work and block validation

pub mod pow;
pub mod validation;

pub use pow::{CancelFlag, ProofOfWork, TARGET_BITS};
pub use validation::{validate_block, ConsensusError};
