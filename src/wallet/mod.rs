// Keys, addresses, and transaction building

pub mod address;
pub mod keystore;
pub mod tx_builder;

pub use address::{decode_address, encode_address, validate_address, ADDRESS_VERSION};
pub use keystore::{KeyPair, Wallets};
pub use tx_builder::new_transaction;
