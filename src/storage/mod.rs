// Persistent chain store and UTXO index, sharing one keyed store

pub mod chain;
pub mod utxo;

pub use chain::{Chain, ChainIter};
pub use utxo::UtxoIndex;

use std::path::Path;

use crate::consensus::{CancelFlag, ConsensusError};
use crate::core::{Block, Transaction};
use crate::error::Result;

/// The node's ledger state: block chain plus derived UTXO index, as two
/// namespaces of a single sled store.
///
/// Single-writer-at-a-time: callers that mutate (append, mine, apply,
/// reindex) hold exclusive access; reads may share.
pub struct Storage {
    pub chain: Chain,
    pub utxos: UtxoIndex,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory storage for tests
    pub fn memory() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            chain: Chain::open(&db)?,
            utxos: UtxoIndex::open(&db)?,
        })
    }

    /// Mine the genesis block paying `reward_to` and build the initial UTXO
    /// index. A no-op on an already initialized chain.
    pub fn init_chain(&mut self, reward_to: &[u8], note: &str, cancel: &CancelFlag) -> Result<()> {
        self.chain.init(reward_to, note, cancel)?;
        self.utxos.reindex(&self.chain)
    }

    /// Mine a block of transactions and fold it into the UTXO index.
    ///
    /// Beyond signature verification, every non-coinbase input must reference
    /// an output that is unspent right now; a double spend is rejected here,
    /// before any mining work is done.
    pub fn mine_block(
        &mut self,
        transactions: Vec<Transaction>,
        cancel: &CancelFlag,
    ) -> Result<Block> {
        for tx in &transactions {
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.inputs {
                if !self.utxos.contains(&input.prev_txid, input.prev_index)? {
                    return Err(ConsensusError::SpentOrUnknownOutput {
                        txid: input.prev_txid,
                        index: input.prev_index,
                    }
                    .into());
                }
            }
        }

        let block = self.chain.mine_block(transactions, cancel)?;
        self.utxos.apply_block(&block)?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TxInput, TxOutput, SUBSIDY};
    use crate::error::Error;
    use crate::wallet::KeyPair;

    #[test]
    fn test_end_to_end_balances() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let cancel = CancelFlag::new();

        // Genesis pays the subsidy of 100 to Alice
        let mut storage = Storage::memory().unwrap();
        storage
            .init_chain(&alice.pubkey_hash(), "genesis", &cancel)
            .unwrap();
        assert_eq!(
            storage.utxos.balance(&alice.pubkey_hash()).unwrap(),
            SUBSIDY
        );

        // Alice sends 40 to Bob
        let genesis = storage
            .chain
            .get_block(&storage.chain.tip().unwrap())
            .unwrap();
        let coinbase_id = genesis.transactions[0].id;

        let mut tx = Transaction::new(
            vec![TxInput::new(coinbase_id, 0, alice.pubkey_xy().to_vec())],
            vec![
                TxOutput::new(40, bob.pubkey_hash().to_vec()),
                TxOutput::new(60, alice.pubkey_hash().to_vec()),
            ],
        );
        storage
            .chain
            .sign_transaction(&mut tx, &alice.secret_key)
            .unwrap();
        storage.mine_block(vec![tx], &cancel).unwrap();

        assert_eq!(storage.utxos.balance(&alice.pubkey_hash()).unwrap(), 60);
        assert_eq!(storage.utxos.balance(&bob.pubkey_hash()).unwrap(), 40);
        assert!(!storage.utxos.contains(&coinbase_id, 0).unwrap());
    }

    #[test]
    fn test_double_spend_is_rejected() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let cancel = CancelFlag::new();

        let mut storage = Storage::memory().unwrap();
        storage
            .init_chain(&alice.pubkey_hash(), "genesis", &cancel)
            .unwrap();

        let genesis = storage
            .chain
            .get_block(&storage.chain.tip().unwrap())
            .unwrap();
        let coinbase_id = genesis.transactions[0].id;

        fn spend(storage: &Storage, alice: &KeyPair, coinbase_id: crate::core::Hash256, to: &KeyPair) -> Transaction {
            let mut tx = Transaction::new(
                vec![TxInput::new(coinbase_id, 0, alice.pubkey_xy().to_vec())],
                vec![TxOutput::new(SUBSIDY, to.pubkey_hash().to_vec())],
            );
            storage
                .chain
                .sign_transaction(&mut tx, &alice.secret_key)
                .unwrap();
            tx
        }

        let first = spend(&storage, &alice, coinbase_id, &bob);
        let second = spend(&storage, &alice, coinbase_id, &alice);

        storage.mine_block(vec![first], &cancel).unwrap();

        // The same output cannot be spent again
        assert!(matches!(
            storage.mine_block(vec![second], &cancel),
            Err(Error::Consensus(ConsensusError::SpentOrUnknownOutput { .. }))
        ));
    }

    #[test]
    fn test_invalid_signature_blocks_mining() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let cancel = CancelFlag::new();

        let mut storage = Storage::memory().unwrap();
        storage
            .init_chain(&alice.pubkey_hash(), "genesis", &cancel)
            .unwrap();

        let genesis = storage
            .chain
            .get_block(&storage.chain.tip().unwrap())
            .unwrap();

        // Mallory signs a spend of Alice's output with her own key but
        // claims Alice's pubkey, so the signature cannot verify.
        let mut tx = Transaction::new(
            vec![TxInput::new(
                genesis.transactions[0].id,
                0,
                alice.pubkey_xy().to_vec(),
            )],
            vec![TxOutput::new(SUBSIDY, mallory.pubkey_hash().to_vec())],
        );
        storage
            .chain
            .sign_transaction(&mut tx, &mallory.secret_key)
            .unwrap();

        assert!(matches!(
            storage.mine_block(vec![tx], &cancel),
            Err(Error::Consensus(ConsensusError::InvalidTransaction(_)))
        ));
    }
}
