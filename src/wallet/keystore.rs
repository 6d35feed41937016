// Key pairs and the on-disk wallet file

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

use crate::core::hash160;
use crate::error::{Error, Result};
use crate::wallet::address::encode_address;

/// A secp256k1 key pair. The exported public key is the 64-byte x||y
/// coordinate concatenation, fixed width, big-endian.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let mut rng = OsRng;
        let secret_key = SecretKey::new(&mut rng);
        let public_key = secret_key.public_key(&secp);
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)?;
        let public_key = secret_key.public_key(&secp);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Public key as its two curve coordinates (uncompressed encoding with
    /// the 0x04 tag stripped)
    pub fn pubkey_xy(&self) -> [u8; 64] {
        let mut xy = [0u8; 64];
        xy.copy_from_slice(&self.public_key.serialize_uncompressed()[1..]);
        xy
    }

    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.pubkey_xy())
    }

    pub fn address(&self) -> String {
        encode_address(&self.pubkey_hash())
    }
}

/// JSON shape of the wallet file: address -> hex-encoded secret key
#[derive(Serialize, Deserialize, Default)]
struct WalletFile {
    keys: BTreeMap<String, String>,
}

/// All key pairs a node controls, keyed by address.
/// BTreeMap keeps listings and the default address deterministic.
#[derive(Default)]
pub struct Wallets {
    keys: BTreeMap<String, KeyPair>,
}

impl Wallets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the wallet file; a missing file is an empty wallet
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let json = fs::read_to_string(path)?;
        let file: WalletFile =
            serde_json::from_str(&json).map_err(|e| Error::Wallet(format!("bad wallet file: {e}")))?;

        let mut keys = BTreeMap::new();
        for (address, secret_hex) in file.keys {
            let secret = hex::decode(&secret_hex)
                .map_err(|_| Error::Wallet(format!("bad secret key for {address}")))?;
            let keypair = KeyPair::from_secret_bytes(&secret)?;
            if keypair.address() != address {
                return Err(Error::Wallet(format!(
                    "secret key does not match address {address}"
                )));
            }
            keys.insert(address, keypair);
        }

        Ok(Self { keys })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = WalletFile {
            keys: self
                .keys
                .iter()
                .map(|(address, kp)| (address.clone(), hex::encode(kp.secret_key.secret_bytes())))
                .collect(),
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::Wallet(format!("cannot serialize wallet: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Generate a fresh key pair and return its address
    pub fn create_wallet(&mut self) -> String {
        let keypair = KeyPair::generate();
        let address = keypair.address();
        self.keys.insert(address.clone(), keypair);
        address
    }

    pub fn get(&self, address: &str) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }

    /// First address in listing order, if any
    pub fn default_address(&self) -> Option<&str> {
        self.keys.keys().next().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
