// Command-line surface

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::RwLock;

use crate::consensus::CancelFlag;
use crate::core::Transaction;
use crate::error::{Error, Result};
use crate::network::Node;
use crate::storage::Storage;
use crate::wallet::{decode_address, new_transaction, validate_address, Wallets};

/// Seed node every fresh node knows about
const SEED_NODE: &str = "127.0.0.1:3000";

const GENESIS_NOTE: &str = "tinycoin genesis block";

#[derive(Parser)]
#[command(name = "tinycoin")]
#[command(about = "Minimal proof-of-work UTXO ledger node", version)]
pub struct Cli {
    /// Where chain data and the wallet file live
    #[arg(long, default_value = "./data", global = true)]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Mine a block containing a single coinbase reward
    Addblock {
        /// Reward address; defaults to the wallet's first address
        #[arg(long)]
        address: Option<String>,
    },

    /// Print every block from the tip back to genesis
    Printchain,

    /// Sum the unspent outputs belonging to an address
    Getbalance {
        #[arg(long)]
        address: String,
    },

    /// Transfer value and mine the containing block
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
    },

    /// Generate a new key pair and print its address
    Createwallet,

    /// List the wallet's addresses
    Listaddresses,

    /// Print the height of the chain tip
    Getbestheight,

    /// Serve the sync protocol; the listen port comes from NODE_ID
    Startnode {
        /// Reward address to validate on startup
        #[arg(long)]
        miner: Option<String>,
    },
}

/// Executes parsed commands against the node's data directory
pub struct CliHandler {
    data_dir: PathBuf,
}

impl CliHandler {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Createwallet => self.create_wallet(),
            Command::Listaddresses => self.list_addresses(),
            Command::Addblock { address } => self.add_block(address),
            Command::Printchain => self.print_chain(),
            Command::Getbalance { address } => self.get_balance(&address),
            Command::Send { from, to, amount } => self.send(&from, &to, amount),
            Command::Getbestheight => self.get_best_height(),
            Command::Startnode { miner } => self.start_node(miner),
        }
    }

    fn wallet_path(&self) -> PathBuf {
        self.data_dir.join("wallet.json")
    }

    fn open_storage(&self) -> Result<Storage> {
        std::fs::create_dir_all(&self.data_dir)?;
        Storage::open(self.data_dir.join("chain"))
    }

    /// Open the ledger, mining a genesis block for the wallet's first
    /// address when no chain exists yet
    fn open_ledger(&self) -> Result<(Storage, Wallets)> {
        let wallets = Wallets::load(self.wallet_path())?;
        let mut storage = self.open_storage()?;

        if !storage.chain.is_initialized() {
            let address = wallets.default_address().ok_or_else(|| {
                Error::Config("no chain and no wallet; run createwallet first".into())
            })?;
            let reward_to = decode_address(address)?;

            println!("No chain found; mining a genesis block for {address}");
            storage.init_chain(&reward_to, GENESIS_NOTE, &CancelFlag::new())?;
        }

        Ok((storage, wallets))
    }

    fn create_wallet(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let mut wallets = Wallets::load(self.wallet_path())?;
        let address = wallets.create_wallet();
        wallets.save(self.wallet_path())?;

        println!("New address: {address}");
        Ok(())
    }

    fn list_addresses(&self) -> Result<()> {
        let wallets = Wallets::load(self.wallet_path())?;
        for address in wallets.addresses() {
            println!("{address}");
        }
        Ok(())
    }

    fn add_block(&self, address: Option<String>) -> Result<()> {
        let (mut storage, wallets) = self.open_ledger()?;

        let address = match address {
            Some(address) => address,
            None => wallets
                .default_address()
                .ok_or_else(|| Error::Config("no wallet address; run createwallet first".into()))?
                .to_string(),
        };
        let reward_to = decode_address(&address)?;

        let height = storage.chain.best_height()? + 1;
        let note = format!("reward to {address} at height {height}");
        let coinbase = Transaction::coinbase(reward_to.to_vec(), &note);

        let block = storage.mine_block(vec![coinbase], &CancelFlag::new())?;
        println!("Mined block {} at height {}", block.hash, block.height);
        Ok(())
    }

    fn print_chain(&self) -> Result<()> {
        let (storage, _) = self.open_ledger()?;
        for block in storage.chain.iter() {
            println!("{}", block?);
        }
        Ok(())
    }

    fn get_balance(&self, address: &str) -> Result<()> {
        let (storage, _) = self.open_ledger()?;
        let pubkey_hash = decode_address(address)?;
        let balance = storage.utxos.balance(&pubkey_hash)?;

        println!("Balance of {address}: {balance}");
        Ok(())
    }

    fn send(&self, from: &str, to: &str, amount: u64) -> Result<()> {
        let (mut storage, wallets) = self.open_ledger()?;

        let tx = new_transaction(&storage, &wallets, from, to, amount)?;
        let block = storage.mine_block(vec![tx], &CancelFlag::new())?;

        println!("Sent {amount} from {from} to {to} in block {}", block.hash);
        Ok(())
    }

    fn get_best_height(&self) -> Result<()> {
        let (storage, _) = self.open_ledger()?;
        println!("Best height: {}", storage.chain.best_height()?);
        Ok(())
    }

    /// Run the sync server. The chain may start empty here: a fresh node
    /// fills it by syncing from the seed.
    fn start_node(&self, miner: Option<String>) -> Result<()> {
        let node_id = std::env::var("NODE_ID")
            .map_err(|_| Error::Config("NODE_ID environment variable not set".into()))?;

        if let Some(miner) = &miner {
            if !validate_address(miner) {
                return Err(Error::InvalidAddress(miner.clone()));
            }
            println!("Miner address: {miner}");
        }

        let addr = format!("127.0.0.1:{node_id}");
        println!("Starting node {node_id} on {addr}");

        let storage = Arc::new(RwLock::new(self.open_storage()?));
        let node = Node::new(addr, vec![SEED_NODE.to_string()], storage);

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(node.run())
    }
}
