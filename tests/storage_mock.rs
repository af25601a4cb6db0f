//! In-memory storage contract tests.
//!
//! Run with: cargo test --test storage_mock

mod storage;

use std::sync::Arc;

use punchcard::storage::MockStore;

#[tokio::test]
async fn test_mock_ledger_store() {
    println!("=== Mock LedgerStore Tests ===");
    let store = Arc::new(MockStore::new());
    run_ledger_store_tests!(store, 50);
    println!("=== All Mock LedgerStore tests PASSED ===");
}

#[tokio::test]
async fn test_mock_reward_store() {
    println!("=== Mock RewardStore Tests ===");
    let store = Arc::new(MockStore::new());
    run_reward_store_tests!(store);
    println!("=== All Mock RewardStore tests PASSED ===");
}
