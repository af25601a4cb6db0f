//! LedgerStore and AuditLog contract tests.

use std::sync::Arc;

use punchcard::storage::{AuditLog, LedgerStore, OverdraftPolicy, StorageError};

use super::{credit, pair};

pub async fn test_get_or_create_is_idempotent<S: LedgerStore>(store: &S) {
    let (customer_id, tenant_id) = pair();

    let (entry, created) = store
        .get_or_create(customer_id, tenant_id)
        .await
        .expect("create should succeed");
    assert!(created, "first call creates");
    assert_eq!(entry.total_points, 0);
    assert_eq!(entry.visits_count, 0);
    assert!(entry.is_active);

    let (_, created) = store
        .get_or_create(customer_id, tenant_id)
        .await
        .expect("second call should succeed");
    assert!(!created, "second call finds the existing entry");
}

pub async fn test_apply_delta_tracks_lifetime_and_visits<S: LedgerStore>(store: &S) {
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();

    let mut visit = credit(customer_id, tenant_id, 30);
    visit.visit = true;
    let applied = store.apply_delta(visit).await.expect("credit should succeed");
    assert_eq!(applied.entry.total_points, 30);
    assert_eq!(applied.entry.lifetime_points, 30);
    assert_eq!(applied.entry.visits_count, 1);
    assert!(applied.entry.first_visit_at.is_some());
    assert!(applied.entry.last_visit_at.is_some());

    let applied = store
        .apply_delta(credit(customer_id, tenant_id, -10))
        .await
        .expect("debit should succeed");
    assert_eq!(applied.entry.total_points, 20);
    assert_eq!(applied.entry.lifetime_points, 30, "debits never reduce lifetime points");
    assert_eq!(applied.entry.visits_count, 1, "no visit flag, no visit");
}

pub async fn test_overdraft_policy<S: LedgerStore + AuditLog>(store: &S) {
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();
    store
        .apply_delta(credit(customer_id, tenant_id, 5))
        .await
        .unwrap();

    let result = store.apply_delta(credit(customer_id, tenant_id, -10)).await;
    assert!(
        matches!(result, Err(StorageError::Overdraft { balance: 5, delta: -10 })),
        "overdraft is rejected by default, got {result:?}"
    );
    let entry = LedgerStore::get(store, customer_id, tenant_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.total_points, 5);
    assert_eq!(
        AuditLog::list_for(store, customer_id, tenant_id).await.unwrap().len(),
        1,
        "rejected delta writes no audit entry"
    );

    let mut allowed = credit(customer_id, tenant_id, -10);
    allowed.overdraft = OverdraftPolicy::Allow;
    let applied = store.apply_delta(allowed).await.expect("explicit overdraft");
    assert_eq!(applied.entry.total_points, -5);
}

pub async fn test_apply_delta_requires_entry<S: LedgerStore>(store: &S) {
    let (customer_id, tenant_id) = pair();
    let result = store.apply_delta(credit(customer_id, tenant_id, 1)).await;
    assert!(matches!(result, Err(StorageError::LedgerNotFound { .. })));
}

/// Audit deltas always sum to the balance of a pair opened at zero.
pub async fn test_audit_reconciles_with_balance<S: LedgerStore + AuditLog>(store: &S) {
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();

    for delta in [10, 25, -5, 40, -30, 7] {
        store
            .apply_delta(credit(customer_id, tenant_id, delta))
            .await
            .unwrap();
    }
    // A rejected overdraft leaves no trace.
    let _ = store
        .apply_delta(credit(customer_id, tenant_id, -1_000))
        .await;

    let entry = LedgerStore::get(store, customer_id, tenant_id)
        .await
        .unwrap()
        .unwrap();
    let audit = AuditLog::list_for(store, customer_id, tenant_id).await.unwrap();
    assert_eq!(audit.len(), 6);
    assert_eq!(audit.iter().map(|a| a.points_delta).sum::<i64>(), entry.total_points);
    assert_eq!(entry.total_points, 47);
}

/// M concurrent +1 deltas leave the balance at exactly M.
pub async fn test_concurrent_increments_are_not_lost<S>(store: Arc<S>, tasks: i64)
where
    S: LedgerStore + AuditLog + 'static,
{
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();

    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.apply_delta(credit(customer_id, tenant_id, 1)).await })
        })
        .collect();
    for handle in futures::future::join_all(handles).await {
        handle.expect("task panicked").expect("increment should succeed");
    }

    let entry = LedgerStore::get(store.as_ref(), customer_id, tenant_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.total_points, tasks);
    let audit = AuditLog::list_for(store.as_ref(), customer_id, tenant_id)
        .await
        .unwrap();
    assert_eq!(audit.len() as i64, tasks, "one audit entry per effective delta");
}

pub async fn test_deactivate_hides_entry_until_visit<S: LedgerStore>(store: &S) {
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();
    store.deactivate(customer_id, tenant_id).await.unwrap();
    assert!(store.list_for_customer(customer_id).await.unwrap().is_empty());

    let mut visit = credit(customer_id, tenant_id, 10);
    visit.visit = true;
    let applied = store.apply_delta(visit).await.unwrap();
    assert!(applied.entry.is_active, "a visit reactivates the entry");
    assert_eq!(store.list_for_customer(customer_id).await.unwrap().len(), 1);
}

/// Run every ledger contract test against `$store` (an `Arc` of the backend).
#[macro_export]
macro_rules! run_ledger_store_tests {
    ($store:expr, $tasks:expr) => {
        use $crate::storage::ledger_store_tests::*;

        test_get_or_create_is_idempotent(&*$store).await;
        println!("  test_get_or_create_is_idempotent: PASSED");

        test_apply_delta_tracks_lifetime_and_visits(&*$store).await;
        println!("  test_apply_delta_tracks_lifetime_and_visits: PASSED");

        test_overdraft_policy(&*$store).await;
        println!("  test_overdraft_policy: PASSED");

        test_apply_delta_requires_entry(&*$store).await;
        println!("  test_apply_delta_requires_entry: PASSED");

        test_audit_reconciles_with_balance(&*$store).await;
        println!("  test_audit_reconciles_with_balance: PASSED");

        test_concurrent_increments_are_not_lost($store.clone(), $tasks).await;
        println!("  test_concurrent_increments_are_not_lost: PASSED");

        test_deactivate_hides_entry_until_visit(&*$store).await;
        println!("  test_deactivate_hides_entry_until_visit: PASSED");
    };
}
