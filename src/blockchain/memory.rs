use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;

use super::account::Account;
use super::block::Block;
use super::storage::{BlockIter, BlockStore, Order, StorageError};

/// In-memory store, used by tests and throwaway nodes
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Blocks indexed by id
    blocks: RwLock<Vec<Block>>,

    accounts: DashMap<String, Account>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_blocks(&self) -> Result<RwLockReadGuard<'_, Vec<Block>>, StorageError> {
        self.blocks
            .read()
            .map_err(|_| StorageError::SystemError("Block lock poisoned".to_string()))
    }

    fn write_blocks(&self) -> Result<RwLockWriteGuard<'_, Vec<Block>>, StorageError> {
        self.blocks
            .write()
            .map_err(|_| StorageError::SystemError("Block lock poisoned".to_string()))
    }
}

fn not_found(id: u64) -> StorageError {
    StorageError::NotFound(format!("Block with id {} not found", id))
}

impl BlockStore for MemoryStore {
    fn get_block(&self, id: u64) -> Result<Block, StorageError> {
        let blocks = self.read_blocks()?;
        usize::try_from(id)
            .ok()
            .and_then(|index| blocks.get(index))
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    fn list_block_ids(&self) -> Result<Vec<u64>, StorageError> {
        Ok(self.read_blocks()?.iter().map(|block| block.id).collect())
    }

    fn last_block(&self) -> Result<Option<Block>, StorageError> {
        Ok(self.read_blocks()?.last().cloned())
    }

    fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut blocks = self.write_blocks()?;
        let expected = blocks.len() as u64;
        if block.id != expected {
            return Err(StorageError::Conflict(format!(
                "Cannot append block {}, next id is {}",
                block.id, expected
            )));
        }

        blocks.push(block.clone());
        Ok(())
    }

    fn update_block(&self, block: &Block) -> Result<(), StorageError> {
        self.update_blocks(std::slice::from_ref(block))
    }

    fn update_blocks(&self, updates: &[Block]) -> Result<(), StorageError> {
        let mut blocks = self.write_blocks()?;
        if let Some(missing) = updates.iter().find(|b| b.id >= blocks.len() as u64) {
            return Err(not_found(missing.id));
        }

        for block in updates {
            blocks[block.id as usize] = block.clone();
        }
        Ok(())
    }

    fn get_all_blocks(&self, order: Order) -> Result<BlockIter<'_>, StorageError> {
        // Snapshot the ids, then fetch each block on demand
        let count = self.read_blocks()?.len() as u64;
        Ok(match order {
            Order::Ascending => Box::new((0..count).map(move |id| self.get_block(id))),
            Order::Descending => Box::new((0..count).rev().map(move |id| self.get_block(id))),
        })
    }

    fn create_account(&self, account: &Account) -> Result<(), StorageError> {
        match self.accounts.entry(account.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StorageError::Conflict(format!(
                "Account {} already exists",
                account.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(account.clone());
                Ok(())
            }
        }
    }

    fn get_account(&self, id: &str) -> Result<Account, StorageError> {
        self.accounts
            .get(id)
            .map(|account| account.clone())
            .ok_or_else(|| StorageError::NotFound(format!("Account {} not found", id)))
    }

    fn set_account_balance(&self, id: &str, balance: i64) -> Result<(), StorageError> {
        match self.accounts.get_mut(id) {
            Some(mut account) => {
                account.balance = balance;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("Account {} not found", id))),
        }
    }

    fn list_account_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut ids: Vec<String> = self.accounts.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}
