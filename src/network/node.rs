// The sync protocol node: one listener, one task per inbound connection

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use crate::core::{Block, Hash256, Serializable};
use crate::error::Result;
use crate::network::message::{InvKind, Message, PROTOCOL_VERSION};
use crate::storage::Storage;

/// Outbound sends give up after this long; the peer is then dropped
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// A ledger node speaking the sync protocol.
///
/// All state is shared by `Arc` and lock-protected: the storage write lock
/// serializes appends and index updates, the peers list and the
/// blocks-in-transit list each have their own lock. Cloning the node shares
/// the same state, which is how per-connection tasks get at it.
#[derive(Clone)]
pub struct Node {
    addr: String,
    storage: Arc<RwLock<Storage>>,
    peers: Arc<RwLock<Vec<String>>>,
    in_transit: Arc<Mutex<Vec<Hash256>>>,
}

impl Node {
    /// `addr` is both the listen address and the address advertised to
    /// peers. `seeds` are the initially known peer addresses.
    pub fn new(addr: String, seeds: Vec<String>, storage: Arc<RwLock<Storage>>) -> Self {
        Self {
            addr,
            storage,
            peers: Arc::new(RwLock::new(seeds)),
            in_transit: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Bind the listener, announce our height to the first seed, and serve
    /// connections until the task is dropped.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        log::info!("node listening on {}", self.addr);

        let seed = {
            let peers = self.peers.read().await;
            peers.iter().find(|peer| **peer != self.addr).cloned()
        };
        if let Some(seed) = seed {
            self.send_version(&seed).await;
        }

        loop {
            let (stream, remote) = listener.accept().await?;
            let node = self.clone();
            tokio::spawn(async move {
                if let Err(e) = node.handle_connection(stream).await {
                    log::warn!("dropping connection from {remote}: {e}");
                }
            });
        }
    }

    pub async fn known_peers(&self) -> Vec<String> {
        self.peers.read().await.clone()
    }

    /// One message per connection: read it whole, dispatch, done.
    /// Any error here drops this connection only.
    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let mut request = Vec::new();
        stream.read_to_end(&mut request).await?;
        drop(stream);

        let message = Message::decode(&request)?;
        log::debug!("received {}", message.command());

        match message {
            Message::Version {
                version,
                best_height,
                addr_from,
            } => self.handle_version(version, best_height, addr_from).await,
            Message::GetChain { addr_from } => self.handle_get_chain(addr_from).await,
            Message::Inventory {
                addr_from, hashes, ..
            } => self.handle_inventory(addr_from, hashes).await,
            Message::GetBlock {
                addr_from, hash, ..
            } => self.handle_get_block(addr_from, hash).await,
            Message::SendBlock { addr_from, block } => {
                self.handle_send_block(addr_from, block).await
            }
        }
    }

    /// A peer announced its height. Taller peer: ask for its inventory.
    /// Shorter peer: tell it ours. Equal: nothing to exchange (a reply here
    /// would echo between equal-height peers forever). Either way the sender
    /// becomes a known peer.
    async fn handle_version(
        &self,
        version: u32,
        their_height: u32,
        addr_from: String,
    ) -> Result<()> {
        log::info!(
            "version {} from {} at height {}",
            version,
            addr_from,
            their_height
        );

        let my_height = self.best_height().await;
        if their_height > my_height {
            let message = Message::GetChain {
                addr_from: self.addr.clone(),
            };
            self.send(&addr_from, &message).await;
        } else if their_height < my_height {
            self.send_version(&addr_from).await;
        }

        self.add_peer(addr_from).await;
        Ok(())
    }

    async fn handle_get_chain(&self, addr_from: String) -> Result<()> {
        let hashes = self.storage.read().await.chain.block_hashes()?;
        let message = Message::Inventory {
            addr_from: self.addr.clone(),
            kind: InvKind::Block,
            hashes,
        };
        self.send(&addr_from, &message).await;
        Ok(())
    }

    /// Record the announced hashes as in transit and fetch the newest one
    async fn handle_inventory(&self, addr_from: String, hashes: Vec<Hash256>) -> Result<()> {
        log::info!("inventory of {} hashes from {}", hashes.len(), addr_from);

        let first = match hashes.first() {
            Some(hash) => *hash,
            None => return Ok(()),
        };

        {
            let mut transit = self.in_transit.lock().await;
            *transit = hashes;
            transit.remove(0);
        }

        let message = Message::GetBlock {
            addr_from: self.addr.clone(),
            kind: InvKind::Block,
            hash: first,
        };
        self.send(&addr_from, &message).await;
        Ok(())
    }

    async fn handle_get_block(&self, addr_from: String, hash: Hash256) -> Result<()> {
        let block = self.storage.read().await.chain.get_block(&hash)?;
        let message = Message::SendBlock {
            addr_from: self.addr.clone(),
            block: block.serialize(),
        };
        self.send(&addr_from, &message).await;
        Ok(())
    }

    /// Store a received block, then either fetch the next in-transit hash or,
    /// once none remain, rebuild the UTXO index - the sync is complete.
    async fn handle_send_block(&self, addr_from: String, block: Vec<u8>) -> Result<()> {
        let block = Block::deserialize(&block)?;
        let hash = block.hash;

        self.storage.write().await.chain.append(block)?;
        log::info!("stored block {hash}");

        let next = {
            let mut transit = self.in_transit.lock().await;
            if transit.is_empty() {
                None
            } else {
                Some(transit.remove(0))
            }
        };

        match next {
            Some(next_hash) => {
                let message = Message::GetBlock {
                    addr_from: self.addr.clone(),
                    kind: InvKind::Block,
                    hash: next_hash,
                };
                self.send(&addr_from, &message).await;
            }
            None => {
                let storage = self.storage.write().await;
                storage.utxos.reindex(&storage.chain)?;
                log::info!(
                    "sync complete at height {}",
                    storage.chain.best_height().unwrap_or(0)
                );
            }
        }
        Ok(())
    }

    async fn send_version(&self, to: &str) {
        let best_height = self.best_height().await;
        let message = Message::Version {
            version: PROTOCOL_VERSION,
            best_height,
            addr_from: self.addr.clone(),
        };
        self.send(to, &message).await;
    }

    /// Fire-and-forget send: connect, write the whole message, half-close.
    /// An unreachable peer is removed from the known set instead of retried.
    async fn send(&self, to: &str, message: &Message) {
        log::debug!("sending {} to {}", message.command(), to);
        let payload = message.encode();

        let attempt = timeout(SEND_TIMEOUT, async {
            let mut stream = TcpStream::connect(to).await?;
            stream.write_all(&payload).await?;
            stream.shutdown().await?;
            std::io::Result::Ok(())
        })
        .await;

        if !matches!(attempt, Ok(Ok(()))) {
            log::warn!("peer {to} unreachable, dropping it");
            self.peers.write().await.retain(|peer| peer != to);
        }
    }

    async fn add_peer(&self, addr: String) {
        let mut peers = self.peers.write().await;
        if !peers.contains(&addr) {
            log::info!("new peer {addr}");
            peers.push(addr);
        }
    }

    async fn best_height(&self) -> u32 {
        self.storage
            .read()
            .await
            .chain
            .best_height()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::CancelFlag;
    use crate::core::Transaction;
    use crate::wallet::KeyPair;

    async fn wait_for_height(storage: &Arc<RwLock<Storage>>, height: u32) -> bool {
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let current = storage.read().await.chain.best_height().unwrap_or(0);
            if current == height {
                return true;
            }
        }
        false
    }

    #[tokio::test]
    async fn test_two_nodes_sync_to_identical_state() {
        let alice = KeyPair::generate();
        let cancel = CancelFlag::new();

        // Node 1: genesis plus three reward blocks
        let mut s1 = Storage::memory().unwrap();
        s1.init_chain(&alice.pubkey_hash(), "genesis", &cancel).unwrap();
        let genesis = s1.chain.get_block(&s1.chain.tip().unwrap()).unwrap();
        for n in 1..=3 {
            let coinbase =
                Transaction::coinbase(alice.pubkey_hash().to_vec(), &format!("reward {n}"));
            s1.mine_block(vec![coinbase], &cancel).unwrap();
        }
        assert_eq!(s1.chain.best_height().unwrap(), 3);

        // Node 2: the shared genesis block only
        let mut s2 = Storage::memory().unwrap();
        s2.chain.append(genesis).unwrap();
        s2.utxos.reindex(&s2.chain).unwrap();
        assert_eq!(s2.chain.best_height().unwrap(), 0);

        let addr1 = "127.0.0.1:46811".to_string();
        let addr2 = "127.0.0.1:46812".to_string();

        let s1 = Arc::new(RwLock::new(s1));
        let s2 = Arc::new(RwLock::new(s2));

        let node1 = Node::new(addr1.clone(), vec![], s1.clone());
        tokio::spawn(async move { node1.run().await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let node2 = Node::new(addr2.clone(), vec![addr1.clone()], s2.clone());
        tokio::spawn(async move { node2.run().await });

        assert!(wait_for_height(&s2, 3).await, "node 2 never reached height 3");

        let s1 = s1.read().await;
        let s2 = s2.read().await;

        assert_eq!(s1.chain.tip(), s2.chain.tip());
        assert_eq!(s1.chain.best_height().unwrap(), s2.chain.best_height().unwrap());
        assert_eq!(
            s1.utxos.balance(&alice.pubkey_hash()).unwrap(),
            s2.utxos.balance(&alice.pubkey_hash()).unwrap()
        );
        assert_eq!(s1.utxos.entries().unwrap(), s2.utxos.entries().unwrap());
    }
}
