// UTXO-model transactions and their signing protocol

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read};

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::core::serialize::{
    read_var_bytes, read_varint, write_var_bytes, write_varint, DecodeError, Serializable,
};
use crate::core::{hash160, hash256, Hash256};
use crate::error::{Error, Result};

/// Mining reward paid by every coinbase transaction
pub const SUBSIDY: u64 = 100;

/// Output index carried by the coinbase sentinel input
pub const COINBASE_INDEX: i32 = -1;

/// Transaction input - references an output of an earlier transaction.
///
/// A coinbase input references nothing: its `prev_txid` is the zero sentinel,
/// its `prev_index` is -1, and its `pubkey` field carries an arbitrary note
/// instead of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub prev_txid: Hash256,
    pub prev_index: i32,
    pub signature: Vec<u8>,
    pub pubkey: Vec<u8>,
}

impl TxInput {
    pub fn new(prev_txid: Hash256, prev_index: i32, pubkey: Vec<u8>) -> Self {
        Self {
            prev_txid,
            prev_index,
            signature: Vec::new(),
            pubkey,
        }
    }

    /// The sentinel input of a coinbase transaction
    pub fn coinbase(note: Vec<u8>) -> Self {
        Self {
            prev_txid: Hash256::zero(),
            prev_index: COINBASE_INDEX,
            signature: Vec::new(),
            pubkey: note,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.prev_txid.is_zero() && self.prev_index == COINBASE_INDEX
    }

    /// Whether this input was created by the owner of `pubkey_hash`
    pub fn uses_key(&self, pubkey_hash: &[u8]) -> bool {
        hash160(&self.pubkey)[..] == *pubkey_hash
    }

    fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.prev_txid.as_bytes());
        buf.extend_from_slice(&self.prev_index.to_le_bytes());
        write_var_bytes(buf, &self.signature).expect("write to Vec cannot fail");
        write_var_bytes(buf, &self.pubkey).expect("write to Vec cannot fail");
    }

    fn from_reader(reader: &mut dyn Read) -> std::result::Result<Self, DecodeError> {
        let mut txid_bytes = [0u8; 32];
        reader.read_exact(&mut txid_bytes)?;

        let mut index_bytes = [0u8; 4];
        reader.read_exact(&mut index_bytes)?;

        let signature = read_var_bytes(reader)?;
        let pubkey = read_var_bytes(reader)?;

        Ok(Self {
            prev_txid: Hash256::new(txid_bytes),
            prev_index: i32::from_le_bytes(index_bytes),
            signature,
            pubkey,
        })
    }
}

/// Transaction output - a value locked to a public-key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pubkey_hash: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, pubkey_hash: Vec<u8>) -> Self {
        Self { value, pubkey_hash }
    }

    /// Whether this output belongs to the owner of `pubkey_hash`
    pub fn is_locked_with(&self, pubkey_hash: &[u8]) -> bool {
        self.pubkey_hash == pubkey_hash
    }

    fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(buf, &self.pubkey_hash).expect("write to Vec cannot fail");
    }

    fn from_reader(reader: &mut dyn Read) -> std::result::Result<Self, DecodeError> {
        let mut value_bytes = [0u8; 8];
        reader.read_exact(&mut value_bytes)?;
        let pubkey_hash = read_var_bytes(reader)?;

        Ok(Self {
            value: u64::from_le_bytes(value_bytes),
            pubkey_hash,
        })
    }
}

/// The outputs of one transaction that are still unspent, each paired with
/// its index in the defining transaction. Indices survive partial spends.
/// This is the value type of the UTXO index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOutputs {
    pub entries: Vec<(u32, TxOutput)>,
}

impl Serializable for TxOutputs {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, self.entries.len() as u64).expect("write to Vec cannot fail");
        for (index, output) in &self.entries {
            buf.extend_from_slice(&index.to_le_bytes());
            output.serialize_into(&mut buf);
        }
        buf
    }

    fn deserialize(data: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut cursor = Cursor::new(data);
        let count = read_varint(&mut cursor)? as usize;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let mut index_bytes = [0u8; 4];
            cursor.read_exact(&mut index_bytes)?;
            let output = TxOutput::from_reader(&mut cursor)?;
            entries.push((u32::from_le_bytes(index_bytes), output));
        }

        Ok(Self { entries })
    }
}

/// A transfer of value, immutable once signed.
///
/// `id` is the double digest of the transaction's serialization with the id
/// field zeroed; it is stamped at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Build a transaction and stamp its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// The mining-reward transaction: one sentinel input carrying `note`,
    /// one output paying the fixed subsidy to `to_pubkey_hash`.
    pub fn coinbase(to_pubkey_hash: Vec<u8>, note: &str) -> Self {
        Self::new(
            vec![TxInput::coinbase(note.as_bytes().to_vec())],
            vec![TxOutput::new(SUBSIDY, to_pubkey_hash)],
        )
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Digest of the serialization with the id cleared
    pub fn compute_id(&self) -> Hash256 {
        let mut copy = self.clone();
        copy.id = Hash256::zero();
        hash256(&copy.serialize())
    }

    /// Copy with every input's signature and pubkey cleared. Each signing
    /// round fills in exactly one input's pubkey before digesting, so every
    /// input signs its own prior-output view of the transaction.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_txid: input.prev_txid,
                prev_index: input.prev_index,
                signature: Vec::new(),
                pubkey: Vec::new(),
            })
            .collect();

        Transaction {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Look up the output referenced by input `index` in `prev_txs`
    fn referenced_output<'a>(
        &self,
        index: usize,
        prev_txs: &'a HashMap<Hash256, Transaction>,
    ) -> Result<&'a TxOutput> {
        let input = &self.inputs[index];
        let prev = prev_txs
            .get(&input.prev_txid)
            .ok_or(Error::TransactionNotFound(input.prev_txid))?;
        prev.outputs
            .get(input.prev_index as usize)
            .ok_or(Error::OutputNotFound {
                txid: input.prev_txid,
                index: input.prev_index,
            })
    }

    /// Sign every input with `secret_key`.
    ///
    /// `prev_txs` must contain every transaction referenced by an input;
    /// a missing entry is reported, not panicked on.
    pub fn sign(
        &mut self,
        secret_key: &SecretKey,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let secp = Secp256k1::new();
        let mut copy = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let referenced = self.referenced_output(index, prev_txs)?.clone();

            copy.inputs[index].signature.clear();
            copy.inputs[index].pubkey = referenced.pubkey_hash;
            copy.id = copy.compute_id();
            copy.inputs[index].pubkey.clear();

            let message = Message::from_digest_slice(copy.id.as_bytes())?;
            let signature = secp.sign_ecdsa(&message, secret_key);
            self.inputs[index].signature = signature.serialize_compact().to_vec();
        }

        Ok(())
    }

    /// Check every input's signature against the outputs it spends.
    ///
    /// Coinbase transactions verify trivially. Returns `Ok(false)` as soon as
    /// any single input fails; a missing referenced transaction is an error.
    pub fn verify(&self, prev_txs: &HashMap<Hash256, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let secp = Secp256k1::new();
        let mut copy = self.trimmed_copy();

        for (index, input) in self.inputs.iter().enumerate() {
            let referenced = self.referenced_output(index, prev_txs)?.clone();

            copy.inputs[index].signature.clear();
            copy.inputs[index].pubkey = referenced.pubkey_hash;
            copy.id = copy.compute_id();
            copy.inputs[index].pubkey.clear();

            // Re-tag the stored x||y coordinates as an uncompressed point
            let mut encoded = Vec::with_capacity(65);
            encoded.push(0x04);
            encoded.extend_from_slice(&input.pubkey);

            let pubkey = match PublicKey::from_slice(&encoded) {
                Ok(pk) => pk,
                Err(_) => return Ok(false),
            };
            let signature = match Signature::from_compact(&input.signature) {
                Ok(sig) => sig,
                Err(_) => return Ok(false),
            };

            let message = Message::from_digest_slice(copy.id.as_bytes())?;
            if secp.verify_ecdsa(&message, &signature, &pubkey).is_err() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|out| out.value).sum()
    }

    /// Deserialize from a reader, consuming exactly one transaction
    pub fn from_reader(reader: &mut dyn Read) -> std::result::Result<Self, DecodeError> {
        let mut id_bytes = [0u8; 32];
        reader.read_exact(&mut id_bytes)?;

        let input_count = read_varint(reader)? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxInput::from_reader(reader)?);
        }

        let output_count = read_varint(reader)? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOutput::from_reader(reader)?);
        }

        Ok(Self {
            id: Hash256::new(id_bytes),
            inputs,
            outputs,
        })
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(self.id.as_bytes());

        write_varint(&mut buf, self.inputs.len() as u64).expect("write to Vec cannot fail");
        for input in &self.inputs {
            input.serialize_into(&mut buf);
        }

        write_varint(&mut buf, self.outputs.len() as u64).expect("write to Vec cannot fail");
        for output in &self.outputs {
            output.serialize_into(&mut buf);
        }

        buf
    }

    fn deserialize(data: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut cursor = Cursor::new(data);
        Self::from_reader(&mut cursor)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--- Transaction {}", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "    Input {}", i)?;
            writeln!(f, "      TXID:      {}", input.prev_txid)?;
            writeln!(f, "      Out:       {}", input.prev_index)?;
            writeln!(f, "      Signature: {}", hex::encode(&input.signature))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "    Output {}", i)?;
            writeln!(f, "      Value:     {}", output.value)?;
            writeln!(f, "      Script:    {}", hex::encode(&output.pubkey_hash))?;
        }
        Ok(())
    }
}
