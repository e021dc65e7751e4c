use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::{Batch, Db, IVec, Tree};
use thiserror::Error;

use super::account::Account;
use super::block::Block;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Iteration order over block ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Ascending,
    Descending,
}

/// Lazy sequence of blocks, fetched one at a time
pub type BlockIter<'a> = Box<dyn Iterator<Item = Result<Block, StorageError>> + 'a>;

/// Row store holding the chain and the account records
///
/// Blocks are addressed by id, which the store hands out sequentially from 0.
/// Account balances stored here are a cache of the ledger fold and are only
/// written by reconciliation.
pub trait BlockStore: Send + Sync {
    /// Gets a block by id
    fn get_block(&self, id: u64) -> Result<Block, StorageError>;

    /// Lists every block id in ascending order
    fn list_block_ids(&self) -> Result<Vec<u64>, StorageError>;

    /// Gets the newest block, if any
    fn last_block(&self) -> Result<Option<Block>, StorageError>;

    /// Appends a block; its id must be exactly one past the current tip
    fn append_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Overwrites an existing block with the same id
    fn update_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Overwrites several existing blocks as one atomic write
    fn update_blocks(&self, blocks: &[Block]) -> Result<(), StorageError>;

    /// Streams every block in the requested id order
    fn get_all_blocks(&self, order: Order) -> Result<BlockIter<'_>, StorageError>;

    /// Inserts a new account record
    fn create_account(&self, account: &Account) -> Result<(), StorageError>;

    /// Gets an account by id
    fn get_account(&self, id: &str) -> Result<Account, StorageError>;

    /// Gets the cached balance of an account
    fn get_account_balance(&self, id: &str) -> Result<i64, StorageError> {
        Ok(self.get_account(id)?.balance)
    }

    /// Overwrites the cached balance of an existing account
    fn set_account_balance(&self, id: &str, balance: i64) -> Result<(), StorageError>;

    /// Lists every account id in ascending order
    fn list_account_ids(&self) -> Result<Vec<String>, StorageError>;

    /// Flushes pending writes to durable storage
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

fn block_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_block_key(key: &[u8]) -> Result<u64, StorageError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| StorageError::DeserializationError(format!("Invalid block key {:?}", key)))?;
    Ok(u64::from_be_bytes(bytes))
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode_block(value: &[u8]) -> Result<Block, StorageError> {
    bincode::deserialize(value).map_err(|e| StorageError::DeserializationError(e.to_string()))
}

fn decode_account(value: &[u8]) -> Result<Account, StorageError> {
    bincode::deserialize(value).map_err(|e| StorageError::DeserializationError(e.to_string()))
}

fn decode_entry(entry: Result<(IVec, IVec), sled::Error>) -> Result<Block, StorageError> {
    let (_, value) = entry?;
    decode_block(&value)
}

/// Sled backed store
pub struct SledStore {
    /// The database instance
    db: Db,

    /// Tree for blocks, keyed by big-endian id
    blocks: Tree,

    /// Tree for accounts, keyed by account id
    accounts: Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Opens (or creates) a store
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the database directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;

        let blocks = db.open_tree("blocks")?;
        let accounts = db.open_tree("accounts")?;

        info!(
            "Opened store at {} with {} blocks and {} accounts",
            path.as_ref().display(),
            blocks.len(),
            accounts.len()
        );

        Ok(Self { db, blocks, accounts })
    }

    fn next_block_id(&self) -> Result<u64, StorageError> {
        match self.blocks.last()? {
            Some((key, _)) => Ok(decode_block_key(&key)? + 1),
            None => Ok(0),
        }
    }

    fn ensure_block_exists(&self, id: u64) -> Result<(), StorageError> {
        if self.blocks.contains_key(block_key(id))? {
            Ok(())
        } else {
            Err(StorageError::NotFound(format!("Block with id {} not found", id)))
        }
    }
}

impl BlockStore for SledStore {
    fn get_block(&self, id: u64) -> Result<Block, StorageError> {
        match self.blocks.get(block_key(id))? {
            Some(value) => decode_block(&value),
            None => Err(StorageError::NotFound(format!("Block with id {} not found", id))),
        }
    }

    fn list_block_ids(&self) -> Result<Vec<u64>, StorageError> {
        self.blocks
            .iter()
            .keys()
            .map(|key| decode_block_key(&key?))
            .collect()
    }

    fn last_block(&self) -> Result<Option<Block>, StorageError> {
        match self.blocks.last()? {
            Some((_, value)) => Ok(Some(decode_block(&value)?)),
            None => Ok(None),
        }
    }

    fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        let expected = self.next_block_id()?;
        if block.id != expected {
            return Err(StorageError::Conflict(format!(
                "Cannot append block {}, next id is {}",
                block.id, expected
            )));
        }

        let value = encode_value(block)?;
        self.blocks
            .compare_and_swap(block_key(block.id), None as Option<&[u8]>, Some(value))?
            .map_err(|_| StorageError::Conflict(format!("Block {} already exists", block.id)))?;

        debug!("Appended block {}", block.id);
        Ok(())
    }

    fn update_block(&self, block: &Block) -> Result<(), StorageError> {
        self.ensure_block_exists(block.id)?;
        self.blocks.insert(block_key(block.id), encode_value(block)?)?;
        Ok(())
    }

    fn update_blocks(&self, blocks: &[Block]) -> Result<(), StorageError> {
        let mut batch = Batch::default();
        for block in blocks {
            self.ensure_block_exists(block.id)?;
            batch.insert(block_key(block.id).to_vec(), encode_value(block)?);
        }

        self.blocks.apply_batch(batch)?;
        Ok(())
    }

    fn get_all_blocks(&self, order: Order) -> Result<BlockIter<'_>, StorageError> {
        let iter = self.blocks.iter();
        Ok(match order {
            Order::Ascending => Box::new(iter.map(decode_entry)),
            Order::Descending => Box::new(iter.rev().map(decode_entry)),
        })
    }

    fn create_account(&self, account: &Account) -> Result<(), StorageError> {
        let value = encode_value(account)?;
        self.accounts
            .compare_and_swap(account.id.as_bytes(), None as Option<&[u8]>, Some(value))?
            .map_err(|_| StorageError::Conflict(format!("Account {} already exists", account.id)))
    }

    fn get_account(&self, id: &str) -> Result<Account, StorageError> {
        match self.accounts.get(id.as_bytes())? {
            Some(value) => decode_account(&value),
            None => Err(StorageError::NotFound(format!("Account {} not found", id))),
        }
    }

    fn set_account_balance(&self, id: &str, balance: i64) -> Result<(), StorageError> {
        let mut account = self.get_account(id)?;
        account.balance = balance;
        self.accounts.insert(id.as_bytes(), encode_value(&account)?)?;
        Ok(())
    }

    fn list_account_ids(&self) -> Result<Vec<String>, StorageError> {
        self.accounts
            .iter()
            .keys()
            .map(|key| {
                let key = key?;
                String::from_utf8(key.to_vec())
                    .map_err(|e| StorageError::DeserializationError(e.to_string()))
            })
            .collect()
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
