// Persistent, append-only block store with a tip pointer

use std::collections::HashMap;

use secp256k1::SecretKey;
use sled::{Db, Tree};

use crate::consensus::{validate_block, CancelFlag, ConsensusError, ProofOfWork, TARGET_BITS};
use crate::core::{Block, Hash256, Serializable, Transaction};
use crate::error::{Error, Result};

const BLOCKS_TREE: &str = "blocks";

/// Reserved tip key. One byte, so it can never collide with a 32-byte
/// block-hash key.
const TIP_KEY: &[u8] = b"l";

/// The block chain: an arena of blocks keyed by hash, linked only by each
/// block's previous-hash, plus the hash of the highest block seen so far.
///
/// Mutations (append, mine) take `&mut self`; the owner serializes writers.
pub struct Chain {
    tree: Tree,
    tip: Option<Hash256>,
}

impl Chain {
    /// Open the block namespace of `db`. The chain may be empty; blocks can
    /// then arrive via sync, or `init` can mine a genesis block.
    pub fn open(db: &Db) -> Result<Self> {
        let tree = db.open_tree(BLOCKS_TREE)?;
        let tip = match tree.get(TIP_KEY)? {
            Some(bytes) => Some(Hash256::from_slice(&bytes)?),
            None => None,
        };
        Ok(Self { tree, tip })
    }

    pub fn is_initialized(&self) -> bool {
        self.tip.is_some()
    }

    /// Mine the genesis block paying the subsidy to `reward_to`.
    /// A no-op if the chain already has blocks.
    pub fn init(&mut self, reward_to: &[u8], note: &str, cancel: &CancelFlag) -> Result<()> {
        if self.tip.is_some() {
            return Ok(());
        }

        let coinbase = Transaction::coinbase(reward_to.to_vec(), note);
        let mut genesis = Block::new(vec![coinbase], Hash256::zero(), 0, TARGET_BITS);
        ProofOfWork::new().seal(&mut genesis, cancel)?;

        log::info!("created genesis block {}", genesis.hash);
        self.append(genesis)
    }

    /// Hash of the highest block currently known
    pub fn tip(&self) -> Option<Hash256> {
        self.tip
    }

    pub fn best_height(&self) -> Result<u32> {
        let tip = self.tip.ok_or(Error::NoChain)?;
        Ok(self.get_block(&tip)?.height)
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        let bytes = self
            .tree
            .get(hash.as_bytes())?
            .ok_or(Error::BlockNotFound(*hash))?;
        Ok(Block::deserialize(&bytes)?)
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.tree.contains_key(hash.as_bytes())?)
    }

    /// Persist a block keyed by its hash.
    ///
    /// Consensus-invalid blocks are rejected before touching the store.
    /// Re-appending a known hash is a no-op. The tip advances only when the
    /// new block is strictly higher than the current tip; it never regresses.
    pub fn append(&mut self, block: Block) -> Result<()> {
        validate_block(&block)?;

        if self.tree.contains_key(block.hash.as_bytes())? {
            return Ok(());
        }

        self.tree
            .insert(block.hash.as_bytes(), block.serialize())?;

        let advance = match self.tip {
            None => true,
            Some(tip_hash) => block.height > self.get_block(&tip_hash)?.height,
        };
        if advance {
            self.tree.insert(TIP_KEY, block.hash.as_bytes())?;
            self.tip = Some(block.hash);
        }

        self.tree.flush()?;
        Ok(())
    }

    /// Verify every transaction, then mine and append a block extending the
    /// current tip at `best_height + 1`.
    pub fn mine_block(
        &mut self,
        transactions: Vec<Transaction>,
        cancel: &CancelFlag,
    ) -> Result<Block> {
        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                return Err(ConsensusError::InvalidTransaction(tx.id).into());
            }
        }

        let tip = self.tip.ok_or(Error::NoChain)?;
        let height = self.best_height()? + 1;

        let mut block = Block::new(transactions, tip, height, TARGET_BITS);
        ProofOfWork::new().seal(&mut block, cancel)?;

        self.append(block.clone())?;
        Ok(block)
    }

    /// Lazy traversal from the tip back to genesis; stops after yielding the
    /// block whose previous-hash is empty. Restarts from the current tip on
    /// every call.
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            tree: &self.tree,
            current: self.tip,
        }
    }

    /// Every block hash the store holds, ordered tip to genesis
    pub fn block_hashes(&self) -> Result<Vec<Hash256>> {
        let mut hashes = Vec::new();
        for block in self.iter() {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    /// Scan the chain for a transaction by id
    pub fn find_transaction(&self, txid: &Hash256) -> Result<Transaction> {
        for block in self.iter() {
            let block = block?;
            for tx in block.transactions {
                if tx.id == *txid {
                    return Ok(tx);
                }
            }
        }
        Err(Error::TransactionNotFound(*txid))
    }

    /// Resolve every transaction referenced by `tx`'s inputs
    fn prev_transactions(&self, tx: &Transaction) -> Result<HashMap<Hash256, Transaction>> {
        let mut prev = HashMap::new();
        for input in &tx.inputs {
            if input.is_coinbase() {
                continue;
            }
            let referenced = self.find_transaction(&input.prev_txid)?;
            prev.insert(referenced.id, referenced);
        }
        Ok(prev)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<()> {
        let prev = self.prev_transactions(tx)?;
        tx.sign(secret_key, &prev)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev = self.prev_transactions(tx)?;
        tx.verify(&prev)
    }
}

pub struct ChainIter<'a> {
    tree: &'a Tree,
    current: Option<Hash256>,
}

impl Iterator for ChainIter<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;

        let bytes = match self.tree.get(current.as_bytes()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.current = None;
                return Some(Err(Error::BlockNotFound(current)));
            }
            Err(e) => {
                self.current = None;
                return Some(Err(e.into()));
            }
        };

        let block = match Block::deserialize(&bytes) {
            Ok(block) => block,
            Err(e) => {
                self.current = None;
                return Some(Err(e.into()));
            }
        };

        self.current = if block.prev_hash.is_zero() {
            None
        } else {
            Some(block.prev_hash)
        };
        Some(Ok(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::KeyPair;

    fn memory_db() -> Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn test_chain() -> (Db, Chain, KeyPair) {
        let db = memory_db();
        let keypair = KeyPair::generate();
        let mut chain = Chain::open(&db).unwrap();
        chain
            .init(&keypair.pubkey_hash(), "genesis", &CancelFlag::new())
            .unwrap();
        (db, chain, keypair)
    }

    fn reward_block(chain: &mut Chain, keypair: &KeyPair, note: &str) -> Block {
        let coinbase = Transaction::coinbase(keypair.pubkey_hash().to_vec(), note);
        chain
            .mine_block(vec![coinbase], &CancelFlag::new())
            .unwrap()
    }

    #[test]
    fn test_init_creates_genesis() {
        let (_db, chain, _kp) = test_chain();

        assert!(chain.is_initialized());
        assert_eq!(chain.best_height().unwrap(), 0);

        let genesis = chain.get_block(&chain.tip().unwrap()).unwrap();
        assert!(genesis.is_genesis());
        assert!(genesis.transactions[0].is_coinbase());
    }

    #[test]
    fn test_init_is_idempotent() {
        let (_db, mut chain, kp) = test_chain();
        let tip = chain.tip();

        chain
            .init(&kp.pubkey_hash(), "second genesis", &CancelFlag::new())
            .unwrap();
        assert_eq!(chain.tip(), tip);
    }

    #[test]
    fn test_reopen_recovers_tip() {
        let (db, mut chain, kp) = test_chain();
        let block = reward_block(&mut chain, &kp, "height 1");

        let reopened = Chain::open(&db).unwrap();
        assert_eq!(reopened.tip(), Some(block.hash));
        assert_eq!(reopened.best_height().unwrap(), 1);
    }

    #[test]
    fn test_mine_extends_height() {
        let (_db, mut chain, kp) = test_chain();

        let b1 = reward_block(&mut chain, &kp, "height 1");
        let b2 = reward_block(&mut chain, &kp, "height 2");

        assert_eq!(b1.height, 1);
        assert_eq!(b2.height, 2);
        assert_eq!(b2.prev_hash, b1.hash);
        assert_eq!(chain.best_height().unwrap(), 2);
    }

    #[test]
    fn test_append_is_idempotent() {
        let (_db, mut chain, kp) = test_chain();
        let block = reward_block(&mut chain, &kp, "height 1");

        chain.append(block.clone()).unwrap();
        assert_eq!(chain.block_hashes().unwrap().len(), 2);
        assert_eq!(chain.tip(), Some(block.hash));
    }

    #[test]
    fn test_tip_never_regresses() {
        let (_db, mut chain, kp) = test_chain();
        let genesis_hash = chain.tip().unwrap();
        let best = reward_block(&mut chain, &kp, "height 1");

        // A competing block at the same height must not steal the tip
        let coinbase = Transaction::coinbase(kp.pubkey_hash().to_vec(), "rival height 1");
        let mut rival = Block::new(vec![coinbase], genesis_hash, 1, TARGET_BITS);
        ProofOfWork::new()
            .seal(&mut rival, &CancelFlag::new())
            .unwrap();

        chain.append(rival).unwrap();
        assert_eq!(chain.tip(), Some(best.hash));
    }

    #[test]
    fn test_append_rejects_unmined_block() {
        let (_db, mut chain, kp) = test_chain();
        let tip = chain.tip().unwrap();

        let coinbase = Transaction::coinbase(kp.pubkey_hash().to_vec(), "no pow");
        let block = Block::new(vec![coinbase], tip, 1, TARGET_BITS);
        // nonce and hash never stamped by the engine

        assert!(matches!(
            chain.append(block),
            Err(Error::Consensus(_))
        ));
        assert_eq!(chain.best_height().unwrap(), 0);
    }

    #[test]
    fn test_iterator_runs_tip_to_genesis() {
        let (_db, mut chain, kp) = test_chain();
        reward_block(&mut chain, &kp, "height 1");
        reward_block(&mut chain, &kp, "height 2");

        let heights: Vec<u32> = chain
            .iter()
            .map(|block| block.unwrap().height)
            .collect();
        assert_eq!(heights, vec![2, 1, 0]);

        // Re-invocable: a fresh iterator restarts from the tip
        assert_eq!(chain.iter().count(), 3);
    }

    #[test]
    fn test_find_transaction() {
        let (_db, mut chain, kp) = test_chain();
        let block = reward_block(&mut chain, &kp, "height 1");
        let txid = block.transactions[0].id;

        let found = chain.find_transaction(&txid).unwrap();
        assert_eq!(found.id, txid);

        let missing = crate::core::hash256(b"no such tx");
        assert!(matches!(
            chain.find_transaction(&missing),
            Err(Error::TransactionNotFound(_))
        ));
    }

    #[test]
    fn test_empty_chain_has_no_height() {
        let db = memory_db();
        let chain = Chain::open(&db).unwrap();

        assert!(!chain.is_initialized());
        assert!(matches!(chain.best_height(), Err(Error::NoChain)));
        assert_eq!(chain.iter().count(), 0);
    }
}
