// Blockchain module
//
// This module contains the block-hashing and chain-integrity engine:
// - SHA-256 hash engine
// - Canonical block encoding
// - Proof of work search
// - Chain validation and repair
// - Ledger reconciliation
// - Block and account storage

pub mod account;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod miner;
pub mod repair;
pub mod storage;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main components for easier access
pub use account::{Account, Session};
pub use block::{Block, BlockFields};
pub use chain::Blockchain;
pub use error::BlockchainError;
pub use memory::MemoryStore;
pub use miner::{CancelToken, Miner};
pub use storage::{BlockStore, Order, SledStore};
pub use validator::{BreakKind, ChainBreak, Window};

/// Required number of leading zero hex nibbles in a block hash
pub const DEFAULT_DIFFICULTY: usize = 2;

/// PisitiCoins credited to the miner of every block
pub const DEFAULT_MINER_REWARD: u64 = 10_000;

/// Nonces handed to the thread pool per parallel mining batch
pub const DEFAULT_MINING_BATCH: u64 = 4096;

/// Sender of the genesis block; never registered as an account
pub const MINT_ACCOUNT_ID: &str = "0x0";

/// `previous_hash` of the genesis block
pub fn genesis_previous_hash() -> String {
    format!("{}{}", block::HEX_PREFIX, "0".repeat(crypto::DIGEST_HEX_LEN))
}

/// Process-wide chain settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    /// Leading zero nibbles required when mining
    pub difficulty: usize,

    /// Reward written into every new block
    pub miner_reward: u64,

    /// Sentinel used as the genesis block's `previous_hash`
    pub genesis_previous_hash: String,

    /// Mining threads; 1 searches on the calling thread
    pub mining_threads: usize,

    /// Nonces per parallel batch
    pub mining_batch: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            difficulty: DEFAULT_DIFFICULTY,
            miner_reward: DEFAULT_MINER_REWARD,
            genesis_previous_hash: genesis_previous_hash(),
            mining_threads: 1,
            mining_batch: DEFAULT_MINING_BATCH,
        }
    }
}
