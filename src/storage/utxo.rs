// Materialized view of unspent transaction outputs

use sled::{Db, Tree};

use crate::consensus::ConsensusError;
use crate::core::{Block, Hash256, Serializable, TxOutput, TxOutputs};
use crate::error::Result;
use crate::storage::Chain;

const UTXO_TREE: &str = "utxo";

/// Fast-lookup index over the chain: transaction id -> outputs still unspent.
///
/// Derived state. The chain is authoritative; this index must always be
/// reconstructible by `reindex`, and incremental maintenance via
/// `apply_block` must produce the identical result.
pub struct UtxoIndex {
    tree: Tree,
}

impl UtxoIndex {
    pub fn open(db: &Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(UTXO_TREE)?,
        })
    }

    /// Discard the index and rebuild it by replaying the whole chain from
    /// genesis in height order.
    pub fn reindex(&self, chain: &Chain) -> Result<()> {
        self.tree.clear()?;

        let mut blocks: Vec<Block> = chain.iter().collect::<Result<_>>()?;
        blocks.reverse(); // tip-to-genesis traversal, replay wants genesis first

        for block in &blocks {
            self.apply_block(block)?;
        }

        log::info!("reindexed {} blocks", blocks.len());
        Ok(())
    }

    /// Fold one block into the index: drop every output consumed by a
    /// non-coinbase input (removing a transaction's entry entirely once all
    /// its outputs are spent), then record every new output as unspent.
    ///
    /// Must be applied exactly once per block, in height order; the caller
    /// serializes this with chain appends.
    pub fn apply_block(&self, block: &Block) -> Result<()> {
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let key = input.prev_txid;
                    let stored = self.tree.get(key.as_bytes())?.ok_or(
                        ConsensusError::SpentOrUnknownOutput {
                            txid: key,
                            index: input.prev_index,
                        },
                    )?;

                    let mut outs = TxOutputs::deserialize(&stored)?;
                    let before = outs.entries.len();
                    outs.entries
                        .retain(|(index, _)| *index as i32 != input.prev_index);
                    if outs.entries.len() == before {
                        return Err(ConsensusError::SpentOrUnknownOutput {
                            txid: key,
                            index: input.prev_index,
                        }
                        .into());
                    }

                    if outs.entries.is_empty() {
                        self.tree.remove(key.as_bytes())?;
                    } else {
                        self.tree.insert(key.as_bytes(), outs.serialize())?;
                    }
                }
            }

            let fresh = TxOutputs {
                entries: tx
                    .outputs
                    .iter()
                    .enumerate()
                    .map(|(index, output)| (index as u32, output.clone()))
                    .collect(),
            };
            self.tree.insert(tx.id.as_bytes(), fresh.serialize())?;
        }

        self.tree.flush()?;
        Ok(())
    }

    /// Whether output `index` of transaction `txid` is currently unspent
    pub fn contains(&self, txid: &Hash256, index: i32) -> Result<bool> {
        if index < 0 {
            return Ok(false);
        }
        match self.tree.get(txid.as_bytes())? {
            Some(stored) => {
                let outs = TxOutputs::deserialize(&stored)?;
                Ok(outs.entries.iter().any(|(i, _)| *i as i32 == index))
            }
            None => Ok(false),
        }
    }

    /// Accumulate outputs belonging to `pubkey_hash`, in index order, until
    /// the running total reaches `amount` or the index is exhausted. Returns
    /// whatever was accumulated either way; the caller compares the total
    /// against the amount it needs.
    pub fn find_spendable(
        &self,
        pubkey_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, Vec<(Hash256, u32)>)> {
        let mut total = 0u64;
        let mut selection = Vec::new();

        'scan: for item in self.tree.iter() {
            let (key, value) = item?;
            let txid = Hash256::from_slice(&key)?;
            let outs = TxOutputs::deserialize(&value)?;

            for (index, output) in &outs.entries {
                if output.is_locked_with(pubkey_hash) && total < amount {
                    total += output.value;
                    selection.push((txid, *index));

                    if total >= amount {
                        break 'scan;
                    }
                }
            }
        }

        Ok((total, selection))
    }

    /// Every unspent output belonging to `pubkey_hash`
    pub fn utxos_for(&self, pubkey_hash: &[u8]) -> Result<Vec<TxOutput>> {
        let mut utxos = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item?;
            let outs = TxOutputs::deserialize(&value)?;
            for (_, output) in outs.entries {
                if output.is_locked_with(pubkey_hash) {
                    utxos.push(output);
                }
            }
        }
        Ok(utxos)
    }

    /// Sum of all unspent outputs belonging to `pubkey_hash`
    pub fn balance(&self, pubkey_hash: &[u8]) -> Result<u64> {
        Ok(self
            .utxos_for(pubkey_hash)?
            .iter()
            .map(|output| output.value)
            .sum())
    }

    /// Full dump of the index, ordered by transaction id
    pub fn entries(&self) -> Result<Vec<(Hash256, TxOutputs)>> {
        let mut entries = Vec::new();
        for item in self.tree.iter() {
            let (key, value) = item?;
            entries.push((Hash256::from_slice(&key)?, TxOutputs::deserialize(&value)?));
        }
        Ok(entries)
    }
}
