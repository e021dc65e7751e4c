use std::collections::{BTreeMap, HashMap};

use log::debug;

use super::block::Block;
use super::error::BlockchainError;
use super::storage::{BlockStore, Order, StorageError};

fn credit(
    balances: &mut HashMap<String, i64>,
    block: &Block,
    account_id: &str,
    value: u64,
    debit: bool,
) -> Result<(), BlockchainError> {
    let overflow = || BlockchainError::BalanceOverflow {
        account_id: account_id.to_string(),
        block_id: block.id,
    };

    let value = i64::try_from(value).map_err(|_| overflow())?;
    let entry = balances.entry(account_id.to_string()).or_default();
    let updated = if debit {
        entry.checked_sub(value)
    } else {
        entry.checked_add(value)
    };
    *entry = updated.ok_or_else(overflow)?;
    Ok(())
}

/// Adds the effect of one block to a balance map
///
/// The sender is debited `amount`, the recipient credited `amount` and the
/// miner credited `miner_reward`. When `only` is set, other accounts are skipped.
fn apply_block(
    balances: &mut HashMap<String, i64>,
    block: &Block,
    only: Option<&[&str]>,
) -> Result<(), BlockchainError> {
    let wanted = |id: &str| only.map_or(true, |ids| ids.iter().any(|candidate| *candidate == id));

    if wanted(block.from_id.as_str()) {
        credit(balances, block, &block.from_id, block.amount, true)?;
    }
    if wanted(block.to_id.as_str()) {
        credit(balances, block, &block.to_id, block.amount, false)?;
    }
    if wanted(block.miner_id.as_str()) {
        credit(balances, block, &block.miner_id, block.miner_reward, false)?;
    }
    Ok(())
}

/// Folds a sequence of blocks into the balance of every account it mentions
///
/// Fails rather than wrapping or clamping when a balance leaves the `i64` range.
pub fn fold_balances<I>(blocks: I) -> Result<HashMap<String, i64>, BlockchainError>
where
    I: IntoIterator<Item = Result<Block, StorageError>>,
{
    let mut balances = HashMap::new();
    for block in blocks {
        apply_block(&mut balances, &block?, None)?;
    }
    Ok(balances)
}

/// Recomputes cached account balances from the chain
///
/// The chain is the only source of truth: every reconciliation folds over all
/// blocks and overwrites the cached balance with the result.
pub struct LedgerReconciler<'a> {
    store: &'a dyn BlockStore,
}

impl<'a> LedgerReconciler<'a> {
    pub fn new(store: &'a dyn BlockStore) -> Self {
        LedgerReconciler { store }
    }

    /// Recomputes and stores the balance of one registered account
    pub fn balance(&self, account_id: &str) -> Result<i64, BlockchainError> {
        let balances = self.reconcile_accounts(&[account_id])?;
        Ok(balances.get(account_id).copied().unwrap_or_default())
    }

    /// Recomputes and stores the balances of several registered accounts in a
    /// single pass over the chain
    pub fn reconcile_accounts(&self, account_ids: &[&str]) -> Result<BTreeMap<String, i64>, BlockchainError> {
        for id in account_ids {
            self.store.get_account(id)?;
        }

        let mut balances = HashMap::new();
        for block in self.store.get_all_blocks(Order::Ascending)? {
            apply_block(&mut balances, &block?, Some(account_ids))?;
        }

        let mut result = BTreeMap::new();
        for id in account_ids {
            let balance = balances.get(*id).copied().unwrap_or_default();
            self.store.set_account_balance(id, balance)?;
            result.insert(id.to_string(), balance);
        }

        debug!("Reconciled {} accounts", result.len());
        Ok(result)
    }

    /// Recomputes and stores the balance of every registered account in one
    /// pass over the chain
    ///
    /// Ids that appear in the chain without a registered account (such as the
    /// mint account) are folded but not stored.
    pub fn reconcile_all(&self) -> Result<BTreeMap<String, i64>, BlockchainError> {
        let balances = fold_balances(self.store.get_all_blocks(Order::Ascending)?)?;

        let mut result = BTreeMap::new();
        for id in self.store.list_account_ids()? {
            let balance = balances.get(&id).copied().unwrap_or_default();
            self.store.set_account_balance(&id, balance)?;
            result.insert(id, balance);
        }

        debug!("Reconciled all {} accounts", result.len());
        Ok(result)
    }
}
