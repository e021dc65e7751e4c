use log::info;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::block::Block;
use super::error::BlockchainError;
use super::miner::{CancelToken, Miner};
use super::storage::BlockStore;

/// Relinked and re-mined suffix of the chain, not yet written
#[derive(Debug, Clone)]
pub struct RepairPlan {
    pub from_block: u64,
    pub blocks: Vec<Block>,
}

/// Outcome of a committed repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RepairReport {
    /// First block that was rewritten
    pub from_block: u64,

    /// Ids of every rewritten block, ascending
    pub repaired: Vec<u64>,
}

/// Restores link consistency and proof of work from a broken block to the tip
///
/// A repair cannot tell tampering from corruption: it keeps every block's
/// content and only rewrites `previous_hash`, `nonce` and `hash`. Aliased
/// account ids are restored to the spelling that encodes the same way. The whole
/// suffix is mined before anything is written, and the rewrite is committed
/// as one batch, so an interrupted repair leaves the chain untouched.
pub struct ChainRepairer<'a> {
    store: &'a dyn BlockStore,
    miner: &'a Miner,
    genesis_previous_hash: &'a str,
}

impl<'a> ChainRepairer<'a> {
    pub fn new(store: &'a dyn BlockStore, miner: &'a Miner, genesis_previous_hash: &'a str) -> Self {
        ChainRepairer {
            store,
            miner,
            genesis_previous_hash,
        }
    }

    /// Relinks and re-mines every block from `from_block` to the tip
    pub fn plan(&self, from_block: u64, cancel: &CancelToken) -> Result<RepairPlan, BlockchainError> {
        // Fails with a lookup failure when the block does not exist
        self.store.get_block(from_block)?;

        let mut previous_hash = match from_block {
            0 => self.genesis_previous_hash.to_string(),
            id => self.store.get_block(id - 1)?.hash,
        };

        let mut blocks = Vec::new();
        for id in self.store.list_block_ids()? {
            if id < from_block {
                continue;
            }

            let mut fields = self.store.get_block(id)?.fields();
            fields.canonicalize_ids();
            fields.previous_hash = previous_hash;
            fields.validate()?;

            let block = self.miner.mine(&fields, cancel)?;
            previous_hash = block.hash.clone();
            blocks.push(block);
        }

        Ok(RepairPlan { from_block, blocks })
    }

    /// Writes a plan in one atomic batch
    pub fn commit(&self, plan: RepairPlan) -> Result<RepairReport, BlockchainError> {
        self.store.update_blocks(&plan.blocks)?;
        self.store.flush()?;

        let repaired: Vec<u64> = plan.blocks.iter().map(|block| block.id).collect();
        info!(
            "Repaired {} blocks starting at block {}",
            repaired.len(),
            plan.from_block
        );

        Ok(RepairReport {
            from_block: plan.from_block,
            repaired,
        })
    }

    /// Plans and commits a repair
    pub fn repair(&self, from_block: u64, cancel: &CancelToken) -> Result<RepairReport, BlockchainError> {
        let plan = self.plan(from_block, cancel)?;
        self.commit(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::memory::MemoryStore;
    use crate::blockchain::miner::MiningError;
    use crate::blockchain::storage::Order;
    use crate::blockchain::testing::{mine_chain, test_params};
    use crate::blockchain::validator::{ChainValidator, Window};

    fn chain(store: &MemoryStore) -> Vec<Block> {
        mine_chain(
            store,
            &test_params(),
            ("A", 100, "M"),
            &[("A", "B", 10, "M"), ("B", "A", 5, "M"), ("A", "C", 20, "B")],
        )
    }

    fn all_blocks(store: &MemoryStore) -> Vec<Block> {
        store
            .get_all_blocks(Order::Ascending)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_repair_restores_validity_and_keeps_content() {
        let params = test_params();
        let miner = Miner::new(&params).unwrap();

        for target in 0..4usize {
            let store = MemoryStore::new();
            let blocks = chain(&store);

            let mut tampered = blocks[target].clone();
            tampered.amount = 999;
            store.update_block(&tampered).unwrap();

            let validator = ChainValidator::new(&store);
            let broken = validator.check(Window::All).unwrap().unwrap();
            assert_eq!(broken.block_id, target as u64);

            let repairer = ChainRepairer::new(&store, &miner, &params.genesis_previous_hash);
            let report = repairer.repair(broken.block_id, &CancelToken::new()).unwrap();
            assert_eq!(report.repaired, (target as u64..4).collect::<Vec<_>>());
            assert_eq!(validator.check(Window::All).unwrap(), None);

            let repaired = all_blocks(&store);
            for (before, after) in blocks.iter().zip(&repaired) {
                assert_eq!(before.id, after.id);
                assert_eq!(before.from_id, after.from_id);
                assert_eq!(before.to_id, after.to_id);
                assert_eq!(before.miner_id, after.miner_id);
                if after.id < target as u64 {
                    assert_eq!(before, after);
                }
            }
            assert_eq!(repaired[target].amount, 999);
        }
    }

    #[test]
    fn test_repair_from_genesis_resets_sentinel() {
        let params = test_params();
        let miner = Miner::new(&params).unwrap();
        let store = MemoryStore::new();
        let blocks = chain(&store);

        let mut tampered = blocks[0].clone();
        tampered.previous_hash = format!("0x{}", "a".repeat(64));
        store.update_block(&tampered).unwrap();

        ChainRepairer::new(&store, &miner, &params.genesis_previous_hash)
            .repair(0, &CancelToken::new())
            .unwrap();

        assert_eq!(store.get_block(0).unwrap(), blocks[0]);
        assert_eq!(ChainValidator::new(&store).check(Window::All).unwrap(), None);
    }

    #[test]
    fn test_repair_restores_aliased_identifier() {
        let params = test_params();
        let miner = Miner::new(&params).unwrap();
        let store = MemoryStore::new();
        let blocks = chain(&store);

        let mut tampered = blocks[1].clone();
        tampered.to_id = "0xB".to_string();
        store.update_block(&tampered).unwrap();

        let validator = ChainValidator::new(&store);
        assert_eq!(validator.check(Window::All).unwrap().map(|b| b.block_id), Some(1));

        ChainRepairer::new(&store, &miner, &params.genesis_previous_hash)
            .repair(1, &CancelToken::new())
            .unwrap();

        assert_eq!(validator.check(Window::All).unwrap(), None);
        assert_eq!(all_blocks(&store), blocks);
    }

    #[test]
    fn test_repair_of_missing_block_is_lookup_failure() {
        let params = test_params();
        let miner = Miner::new(&params).unwrap();
        let store = MemoryStore::new();
        chain(&store);

        let result = ChainRepairer::new(&store, &miner, &params.genesis_previous_hash)
            .repair(10, &CancelToken::new());
        assert!(matches!(result, Err(BlockchainError::LookupFailure(_))));
    }

    #[test]
    fn test_cancelled_repair_writes_nothing() {
        let params = test_params();
        let miner = Miner::new(&params).unwrap();
        let store = MemoryStore::new();
        let blocks = chain(&store);

        let mut tampered = blocks[1].clone();
        tampered.amount = 999;
        store.update_block(&tampered).unwrap();
        let before = all_blocks(&store);

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = ChainRepairer::new(&store, &miner, &params.genesis_previous_hash)
            .repair(1, &cancel);

        assert!(matches!(
            result,
            Err(BlockchainError::MiningError(MiningError::Cancelled { .. }))
        ));
        assert_eq!(all_blocks(&store), before);
    }
}
