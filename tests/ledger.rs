//! End-to-end ledger scenarios against both block stores.
//!
//! Each scenario mines a genesis block, appends a transfer, tampers with a
//! stored block and repairs the chain, checking balances and validity at
//! every step.

use std::sync::Arc;

use tempfile::TempDir;

use pisiticoin::blockchain::{
    BlockStore, Blockchain, BlockchainError, BreakKind, CancelToken, ChainBreak, ChainParams, MemoryStore, Order,
    Session, SledStore, Window,
};

fn register(blockchain: &Blockchain) {
    for id in ["A", "B", "M"] {
        blockchain.register_account(id, Some(format!("user {}", id))).unwrap();
    }
}

fn run_scenario(blockchain: &Blockchain) {
    let cancel = CancelToken::new();
    register(blockchain);

    let genesis = blockchain.mine_genesis("A", 100, "M", &cancel).unwrap();
    assert_eq!(genesis.id, 0);
    assert_eq!(genesis.previous_hash, format!("0x{}", "0".repeat(64)));
    assert_eq!(genesis.from_id, "0x0");
    assert_eq!(genesis.miner_reward, 10_000);
    assert!(genesis.hash.starts_with("0x00"));
    assert_eq!(blockchain.check(Window::All).unwrap(), None);

    let transfer = blockchain
        .transfer(&Session::new("A"), "B", 50, Some("M"), &cancel)
        .unwrap();
    assert_eq!(transfer.id, 1);
    assert_eq!(transfer.previous_hash, genesis.hash);

    assert_eq!(blockchain.balance("A").unwrap(), 50);
    assert_eq!(blockchain.balance("B").unwrap(), 50);
    assert_eq!(blockchain.balance("M").unwrap(), 20_000);

    let mut tampered = blockchain.store().get_block(1).unwrap();
    tampered.amount = 999;
    blockchain.store().update_block(&tampered).unwrap();

    assert_eq!(
        blockchain.check(Window::All).unwrap(),
        Some(ChainBreak {
            block_id: 1,
            kind: BreakKind::Digest
        })
    );

    let report = blockchain.repair(1, &cancel).unwrap();
    assert_eq!(report.repaired, vec![1]);
    assert_eq!(blockchain.check(Window::All).unwrap(), None);
    assert_eq!(blockchain.store().get_block(0).unwrap(), genesis);

    let repaired = blockchain.store().get_block(1).unwrap();
    assert_eq!(repaired.amount, 999);
    assert_eq!(repaired.from_id, "A");
    assert_eq!(repaired.to_id, "B");
    assert_eq!(repaired.miner_id, "M");

    // The repaired chain is the new truth
    let balances = blockchain.reconcile_all().unwrap();
    assert_eq!(balances["A"], 100 - 999);
    assert_eq!(balances["B"], 999);
    assert_eq!(balances["M"], 20_000);
}

#[test]
fn test_scenario_in_memory() {
    let blockchain = Blockchain::in_memory(ChainParams::default()).unwrap();
    run_scenario(&blockchain);
}

#[test]
fn test_scenario_on_sled() {
    let dir = TempDir::new().unwrap();
    let blockchain = Blockchain::with_storage(dir.path(), ChainParams::default()).unwrap();
    run_scenario(&blockchain);
}

#[test]
fn test_sled_chain_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelToken::new();

    let tip = {
        let blockchain = Blockchain::with_storage(dir.path(), ChainParams::default()).unwrap();
        register(&blockchain);
        blockchain.mine_genesis("A", 100, "M", &cancel).unwrap();
        blockchain
            .transfer(&Session::new("A"), "B", 30, Some("M"), &cancel)
            .unwrap()
    };

    let blockchain = Blockchain::with_storage(dir.path(), ChainParams::default()).unwrap();
    assert_eq!(blockchain.len().unwrap(), 2);
    assert_eq!(blockchain.latest_blocks(1).unwrap(), vec![tip]);
    assert_eq!(blockchain.check(Window::All).unwrap(), None);
    assert_eq!(blockchain.store().get_account_balance("B").unwrap(), 30);
    assert_eq!(blockchain.accounts().unwrap().len(), 3);
}

#[test]
fn test_parallel_mining_matches_sequential() {
    let cancel = CancelToken::new();
    let mut chains = Vec::new();

    for threads in [1, 4] {
        let params = ChainParams {
            mining_threads: threads,
            mining_batch: 64,
            ..ChainParams::default()
        };
        let blockchain = Blockchain::new(Arc::new(MemoryStore::new()), params).unwrap();
        register(&blockchain);
        blockchain.mine_genesis("A", 100, "M", &cancel).unwrap();
        for amount in [10, 20, 30] {
            blockchain
                .transfer(&Session::new("A"), "B", amount, Some("M"), &cancel)
                .unwrap();
        }

        let blocks: Vec<_> = blockchain
            .store()
            .get_all_blocks(Order::Ascending)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        chains.push(blocks);
    }

    assert_eq!(chains[0], chains[1]);
}

#[test]
fn test_transfer_before_genesis_is_lookup_failure() {
    let blockchain = Blockchain::in_memory(ChainParams::default()).unwrap();
    register(&blockchain);

    let result = blockchain.transfer(&Session::new("A"), "B", 1, Some("M"), &CancelToken::new());
    assert!(matches!(result, Err(BlockchainError::LookupFailure(_))));
    assert!(blockchain.is_empty().unwrap());
}

#[test]
fn test_latest_window_ignores_old_tampering() {
    let cancel = CancelToken::new();
    let blockchain = Blockchain::in_memory(ChainParams::default()).unwrap();
    register(&blockchain);
    blockchain.mine_genesis("A", 100, "M", &cancel).unwrap();
    for amount in [1, 2, 3] {
        blockchain
            .transfer(&Session::new("A"), "B", amount, Some("M"), &cancel)
            .unwrap();
    }

    let mut tampered = blockchain.store().get_block(0).unwrap();
    tampered.to_id = "B".to_string();
    blockchain.store().update_block(&tampered).unwrap();

    assert_eq!(blockchain.check(Window::Latest(3)).unwrap(), None);
    assert!(matches!(
        blockchain.ensure_valid(Window::All),
        Err(BlockchainError::ChainInconsistency { block_id: 0 })
    ));

    let report = blockchain.audit_and_repair(Window::All, &cancel).unwrap().unwrap();
    assert_eq!(report.repaired, vec![0, 1, 2, 3]);
    blockchain.ensure_valid(Window::All).unwrap();
}

#[test]
fn test_sled_store_rejects_out_of_order_append() {
    let dir = TempDir::new().unwrap();
    let store = SledStore::open(dir.path()).unwrap();
    let blockchain = Blockchain::new(Arc::new(MemoryStore::new()), ChainParams::default()).unwrap();
    register(&blockchain);
    let genesis = blockchain.mine_genesis("A", 100, "M", &CancelToken::new()).unwrap();

    let mut skipped = genesis.clone();
    skipped.id = 5;
    assert!(store.append_block(&skipped).is_err());
    store.append_block(&genesis).unwrap();
    assert!(store.append_block(&genesis).is_err());
}
