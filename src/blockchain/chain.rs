use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use rand::seq::SliceRandom;

use super::account::{Account, Session};
use super::block::{Block, BlockFields};
use super::error::BlockchainError;
use super::ledger::LedgerReconciler;
use super::memory::MemoryStore;
use super::miner::{CancelToken, Miner};
use super::repair::{ChainRepairer, RepairReport};
use super::storage::{BlockStore, Order, SledStore};
use super::validator::{ChainBreak, ChainValidator, Window};
use super::{ChainParams, MINT_ACCOUNT_ID};

/// Represents the ledger: a block store plus the engine operating on it
///
/// Reads go straight to the store. Appends and repairs are serialised by a
/// single lock held for the whole mine-and-write sequence, so a repair never
/// races an append for the tip.
#[derive(Clone)]
pub struct Blockchain {
    /// Storage for blocks and accounts
    store: Arc<dyn BlockStore>,

    /// Chain settings
    params: ChainParams,

    /// Proof of work search
    miner: Miner,

    /// Held by every mutation of the chain
    write_lock: Arc<Mutex<()>>,
}

impl fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blockchain")
            .field("params", &self.params)
            .field("miner", &self.miner)
            .finish()
    }
}

impl Blockchain {
    /// Creates a blockchain over an existing store
    ///
    /// # Arguments
    ///
    /// * `store` - The block and account store
    /// * `params` - Difficulty, reward and mining settings
    pub fn new(store: Arc<dyn BlockStore>, params: ChainParams) -> Result<Self, BlockchainError> {
        if i64::try_from(params.miner_reward).is_err() {
            return Err(BlockchainError::MalformedInput(format!(
                "Miner reward must be at most {}: {}",
                i64::MAX,
                params.miner_reward
            )));
        }
        let miner = Miner::new(&params)?;

        Ok(Blockchain {
            store,
            params,
            miner,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Creates a blockchain held entirely in memory
    pub fn in_memory(params: ChainParams) -> Result<Self, BlockchainError> {
        Self::new(Arc::new(MemoryStore::new()), params)
    }

    /// Creates a blockchain persisted in a sled database
    ///
    /// # Arguments
    ///
    /// * `storage_path` - The path to the storage directory
    /// * `params` - Difficulty, reward and mining settings
    pub fn with_storage<P: AsRef<Path>>(storage_path: P, params: ChainParams) -> Result<Self, BlockchainError> {
        let store = SledStore::open(storage_path)?;
        Self::new(Arc::new(store), params)
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn store(&self) -> &dyn BlockStore {
        self.store.as_ref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, BlockchainError> {
        self.write_lock
            .lock()
            .map_err(|_| BlockchainError::SystemError("Chain lock poisoned".to_string()))
    }

    fn ledger(&self) -> LedgerReconciler<'_> {
        LedgerReconciler::new(self.store.as_ref())
    }

    fn repairer(&self) -> ChainRepairer<'_> {
        ChainRepairer::new(self.store.as_ref(), &self.miner, &self.params.genesis_previous_hash)
    }

    /// Registers a new account with a zero balance
    pub fn register_account(&self, id: &str, username: Option<String>) -> Result<Account, BlockchainError> {
        let account = Account::new(id, username)?;
        self.store.create_account(&account)?;
        self.store.flush()?;

        info!("Registered account {}", account.id);
        Ok(account)
    }

    /// Gets every registered account with its cached balance
    pub fn accounts(&self) -> Result<Vec<Account>, BlockchainError> {
        self.store
            .list_account_ids()?
            .iter()
            .map(|id| self.store.get_account(id).map_err(BlockchainError::from))
            .collect()
    }

    /// Mines the genesis block, minting `amount` to `to_id`
    ///
    /// Fails if the chain already has blocks.
    pub fn mine_genesis(
        &self,
        to_id: &str,
        amount: u64,
        miner_id: &str,
        cancel: &CancelToken,
    ) -> Result<Block, BlockchainError> {
        let _guard = self.lock()?;

        if self.store.last_block()?.is_some() {
            return Err(BlockchainError::MalformedInput(
                "Chain already has a genesis block".to_string(),
            ));
        }
        check_amount(amount)?;
        self.store.get_account(to_id)?;
        self.store.get_account(miner_id)?;

        let fields = BlockFields::new(
            0,
            self.params.genesis_previous_hash.clone(),
            MINT_ACCOUNT_ID,
            to_id,
            amount,
            miner_id,
            self.params.miner_reward,
        )?;

        self.append(fields, cancel)
    }

    /// Transfers `amount` from the session's account to `to_id`
    ///
    /// The sender's balance is recomputed from the chain and must be strictly
    /// greater than `amount`. When no miner is given, a registered account is
    /// picked at random. Nothing is written unless a nonce is found.
    pub fn transfer(
        &self,
        session: &Session,
        to_id: &str,
        amount: u64,
        miner_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Block, BlockchainError> {
        let _guard = self.lock()?;

        check_amount(amount)?;
        let tip = self.store.last_block()?.ok_or_else(|| {
            BlockchainError::LookupFailure("Chain has no genesis block".to_string())
        })?;

        let from_id = session.account_id();
        self.store.get_account(to_id)?;

        let miner_id = match miner_id {
            Some(id) => {
                self.store.get_account(id)?;
                id.to_string()
            }
            None => self.random_miner()?,
        };

        let mut sender = self.store.get_account(from_id)?;
        sender.balance = self.ledger().balance(from_id)?;
        if let Err(err) = sender.check_funds(amount) {
            warn!("Rejected transfer of {} from {}: {}", amount, from_id, err);
            return Err(err.into());
        }

        let fields = BlockFields::new(
            tip.id + 1,
            tip.hash,
            from_id,
            to_id,
            amount,
            miner_id,
            self.params.miner_reward,
        )?;

        self.append(fields, cancel)
    }

    fn random_miner(&self) -> Result<String, BlockchainError> {
        let ids = self.store.list_account_ids()?;
        ids.choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| BlockchainError::LookupFailure("No accounts to pick a miner from".to_string()))
    }

    /// Mines, appends and reconciles the accounts the block touches
    ///
    /// Must be called with the write lock held.
    fn append(&self, fields: BlockFields, cancel: &CancelToken) -> Result<Block, BlockchainError> {
        let block = self.miner.mine(&fields, cancel)?;
        self.store.append_block(&block)?;
        self.store.flush()?;

        let mut touched: Vec<&str> = Vec::with_capacity(3);
        for id in [&block.from_id, &block.to_id, &block.miner_id] {
            if id != MINT_ACCOUNT_ID && !touched.contains(&id.as_str()) {
                touched.push(id.as_str());
            }
        }
        self.ledger().reconcile_accounts(&touched)?;

        info!(
            "Block {} mined: {} -> {} ({} PisitiCoins), {} rewarded {}",
            block.id, block.from_id, block.to_id, block.amount, block.miner_id, block.miner_reward
        );
        Ok(block)
    }

    /// Returns the first broken block in `window`, if any
    pub fn check(&self, window: Window) -> Result<Option<ChainBreak>, BlockchainError> {
        Ok(ChainValidator::new(self.store.as_ref()).check(window)?)
    }

    /// Fails with `ChainInconsistency` if any block in `window` is broken
    pub fn ensure_valid(&self, window: Window) -> Result<(), BlockchainError> {
        match self.check(window)? {
            Some(broken) => Err(BlockchainError::ChainInconsistency {
                block_id: broken.block_id,
            }),
            None => Ok(()),
        }
    }

    /// Relinks and re-mines every block from `from_block` to the tip, then
    /// reconciles every account against the repaired chain
    pub fn repair(&self, from_block: u64, cancel: &CancelToken) -> Result<RepairReport, BlockchainError> {
        let _guard = self.lock()?;
        self.repair_locked(from_block, cancel)
    }

    /// Must be called with the write lock held.
    fn repair_locked(&self, from_block: u64, cancel: &CancelToken) -> Result<RepairReport, BlockchainError> {
        let report = self.repairer().repair(from_block, cancel)?;
        self.ledger().reconcile_all()?;
        Ok(report)
    }

    /// Re-mines the whole chain from genesis
    pub fn remine_all(&self, cancel: &CancelToken) -> Result<RepairReport, BlockchainError> {
        self.repair(0, cancel)
    }

    /// Checks `window` and repairs forward from the first broken block
    pub fn audit_and_repair(
        &self,
        window: Window,
        cancel: &CancelToken,
    ) -> Result<Option<RepairReport>, BlockchainError> {
        let _guard = self.lock()?;

        match ChainValidator::new(self.store.as_ref()).check(window)? {
            Some(broken) => {
                warn!("Repairing chain from block {} ({:?})", broken.block_id, broken.kind);
                Ok(Some(self.repair_locked(broken.block_id, cancel)?))
            }
            None => Ok(None),
        }
    }

    /// Recomputes and stores the balance of one account
    pub fn balance(&self, account_id: &str) -> Result<i64, BlockchainError> {
        self.ledger().balance(account_id)
    }

    /// Recomputes and stores every account balance in one pass
    pub fn reconcile_all(&self) -> Result<BTreeMap<String, i64>, BlockchainError> {
        self.ledger().reconcile_all()
    }

    /// Gets the newest `count` blocks, newest first
    pub fn latest_blocks(&self, count: usize) -> Result<Vec<Block>, BlockchainError> {
        let blocks = self
            .store
            .get_all_blocks(Order::Descending)?
            .take(count)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(blocks)
    }

    /// Number of blocks in the chain
    pub fn len(&self) -> Result<u64, BlockchainError> {
        Ok(self.store.last_block()?.map_or(0, |block| block.id + 1))
    }

    pub fn is_empty(&self) -> Result<bool, BlockchainError> {
        Ok(self.len()? == 0)
    }
}

fn check_amount(amount: u64) -> Result<(), BlockchainError> {
    if amount == 0 || i64::try_from(amount).is_err() {
        return Err(BlockchainError::MalformedInput(format!(
            "Amount must be between 1 and {}: {}",
            i64::MAX,
            amount
        )));
    }
    Ok(())
}
