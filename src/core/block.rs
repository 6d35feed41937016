// Blocks and their canonical encoding

use std::fmt;
use std::io::{Cursor, Read};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::merkle::merkle_root;
use crate::core::serialize::{read_varint, write_varint, DecodeError, Serializable};
use crate::core::{Hash256, Transaction};

/// Block format version
pub const BLOCK_VERSION: u32 = 2;

/// One link of the hash chain.
///
/// `hash` is the double digest of the canonical header encoding; it is
/// stamped once when the proof-of-work engine seals the block and never
/// recomputed implicitly. Once appended to the chain store a block is
/// immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: i64,
    pub bits: u32,
    pub nonce: u64,
    pub height: u32,
    pub transactions: Vec<Transaction>,
    pub hash: Hash256,
}

impl Block {
    /// Build an unsealed block: merkle root and timestamp are stamped here,
    /// nonce and hash by the proof-of-work engine.
    pub fn new(transactions: Vec<Transaction>, prev_hash: Hash256, height: u32, bits: u32) -> Self {
        let root = if transactions.is_empty() {
            Hash256::zero()
        } else {
            let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.id).collect();
            merkle_root(&txids)
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Self {
            version: BLOCK_VERSION,
            prev_hash,
            merkle_root: root,
            timestamp,
            bits,
            nonce: 0,
            height,
            transactions,
            hash: Hash256::zero(),
        }
    }

    /// Canonical little-endian header encoding with `nonce` substituted;
    /// the block hash is the double digest of this byte string.
    pub fn header_bytes(&self, nonce: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(88);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&nonce.to_le_bytes());
        buf
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_zero()
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = self.header_bytes(self.nonce);

        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());

        write_varint(&mut buf, self.transactions.len() as u64).expect("write to Vec cannot fail");
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.serialize());
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(data);

        let mut version_bytes = [0u8; 4];
        cursor.read_exact(&mut version_bytes)?;

        let mut prev_bytes = [0u8; 32];
        cursor.read_exact(&mut prev_bytes)?;

        let mut merkle_bytes = [0u8; 32];
        cursor.read_exact(&mut merkle_bytes)?;

        let mut timestamp_bytes = [0u8; 8];
        cursor.read_exact(&mut timestamp_bytes)?;

        let mut bits_bytes = [0u8; 4];
        cursor.read_exact(&mut bits_bytes)?;

        let mut nonce_bytes = [0u8; 8];
        cursor.read_exact(&mut nonce_bytes)?;

        let mut hash_bytes = [0u8; 32];
        cursor.read_exact(&mut hash_bytes)?;

        let mut height_bytes = [0u8; 4];
        cursor.read_exact(&mut height_bytes)?;

        let tx_count = read_varint(&mut cursor)? as usize;
        let mut transactions = Vec::with_capacity(tx_count);
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(&mut cursor)?);
        }

        Ok(Self {
            version: u32::from_le_bytes(version_bytes),
            prev_hash: Hash256::new(prev_bytes),
            merkle_root: Hash256::new(merkle_bytes),
            timestamp: i64::from_le_bytes(timestamp_bytes),
            bits: u32::from_le_bytes(bits_bytes),
            nonce: u64::from_le_bytes(nonce_bytes),
            height: u32::from_le_bytes(height_bytes),
            transactions,
            hash: Hash256::new(hash_bytes),
        })
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Block {}", self.hash)?;
        writeln!(f, "  Height:      {}", self.height)?;
        writeln!(f, "  Previous:    {}", self.prev_hash)?;
        writeln!(f, "  Merkle root: {}", self.merkle_root)?;
        writeln!(f, "  Timestamp:   {}", self.timestamp)?;
        writeln!(f, "  Bits:        {}", self.bits)?;
        writeln!(f, "  Nonce:       {}", self.nonce)?;
        writeln!(f, "  Transactions: {}", self.transactions.len())?;
        for tx in &self.transactions {
            write!(f, "{}", tx)?;
        }
        Ok(())
    }
}
