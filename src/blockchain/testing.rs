//! Helpers shared by the unit tests.

use super::block::{Block, BlockFields};
use super::miner::{CancelToken, Miner};
use super::storage::BlockStore;
use super::{ChainParams, MINT_ACCOUNT_ID};

/// Parameters that keep mining fast in tests
pub fn test_params() -> ChainParams {
    ChainParams {
        difficulty: 1,
        ..ChainParams::default()
    }
}

/// Mines a genesis block minting `amount` to `to_id`, followed by one block per
/// `(from, to, amount, miner)` transfer, appending everything to `store`
pub fn mine_chain(
    store: &dyn BlockStore,
    params: &ChainParams,
    genesis: (&str, u64, &str),
    transfers: &[(&str, &str, u64, &str)],
) -> Vec<Block> {
    let miner = Miner::new(params).unwrap();
    let cancel = CancelToken::new();
    let mut blocks = Vec::new();

    let (to_id, amount, miner_id) = genesis;
    let fields = BlockFields::new(
        0,
        params.genesis_previous_hash.clone(),
        MINT_ACCOUNT_ID,
        to_id,
        amount,
        miner_id,
        params.miner_reward,
    )
    .unwrap();
    let block = miner.mine(&fields, &cancel).unwrap();
    store.append_block(&block).unwrap();
    blocks.push(block);

    for (from_id, to_id, amount, miner_id) in transfers {
        let tip = blocks.last().unwrap();
        let fields = BlockFields::new(
            tip.id + 1,
            tip.hash.clone(),
            *from_id,
            *to_id,
            *amount,
            *miner_id,
            params.miner_reward,
        )
        .unwrap();
        let block = miner.mine(&fields, &cancel).unwrap();
        store.append_block(&block).unwrap();
        blocks.push(block);
    }

    blocks
}
