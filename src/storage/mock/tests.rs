use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::model::Attribution;
use crate::storage::{
    AuditLog, Directory, IssueRequest, LedgerMutation, LedgerStore, OverdraftPolicy, RewardStore,
    StorageError,
};

use super::*;

fn award(customer_id: Uuid, tenant_id: Uuid, delta: i64) -> LedgerMutation {
    LedgerMutation {
        customer_id,
        tenant_id,
        delta,
        visit: false,
        overdraft: OverdraftPolicy::Reject,
        attribution: Attribution::system("test"),
    }
}

#[tokio::test]
async fn test_audit_failure_leaves_ledger_untouched() {
    let store = MockStore::new();
    let (c, t) = (Uuid::new_v4(), Uuid::new_v4());
    LedgerStore::get_or_create(&store, c, t).await.unwrap();

    store.set_fail_on_audit(true).await;
    let result = store.apply_delta(award(c, t, 10)).await;
    assert!(matches!(result, Err(StorageError::Unavailable(_))));

    let entry = LedgerStore::get(&store, c, t).await.unwrap().unwrap();
    assert_eq!(entry.total_points, 0);
    assert_eq!(store.audit_len().await, 0);
}

#[tokio::test]
async fn test_fail_on_write_blocks_mutations() {
    let store = MockStore::new();
    store.set_fail_on_write(true).await;
    let result = LedgerStore::get_or_create(&store, Uuid::new_v4(), Uuid::new_v4()).await;
    assert!(matches!(result, Err(StorageError::Unavailable(_))));
}

#[tokio::test]
async fn test_fail_on_read_blocks_queries() {
    let store = MockStore::new();
    store.set_fail_on_read(true).await;
    let result = store.list_for_customer(Uuid::new_v4()).await;
    assert!(matches!(result, Err(StorageError::Unavailable(_))));
}

#[tokio::test]
async fn test_latency_is_applied() {
    let store = MockStore::new();
    store.set_latency(Some(Duration::from_millis(30))).await;
    let started = std::time::Instant::now();
    store.code_exists("GC-AAAA-BBBB-CCCC").await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_issue_rejects_known_code_without_deducting() {
    let store = MockStore::new();
    let (c, t) = (Uuid::new_v4(), Uuid::new_v4());
    LedgerStore::get_or_create(&store, c, t).await.unwrap();
    store.apply_delta(award(c, t, 250)).await.unwrap();

    let now = Utc::now();
    let request = |id: Uuid| IssueRequest {
        code_id: id,
        code: "GC-SAME-CODE-XXXX".to_string(),
        customer_id: c,
        tenant_id: t,
        value: 5,
        points_required: 100,
        max_active_cards: 5,
        expires_at: now + chrono::Duration::days(30),
        now,
    };

    store.issue(request(Uuid::new_v4())).await.unwrap();
    let second = store.issue(request(Uuid::new_v4())).await;
    assert!(matches!(second, Err(StorageError::CodeCollision(_))));

    let entry = LedgerStore::get(&store, c, t).await.unwrap().unwrap();
    assert_eq!(entry.total_points, 150);
    assert_eq!(AuditLog::list_for(&store, c, t).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_prune_keeps_recent_message_ids() {
    let store = MockStore::new();
    let now = Utc::now();
    store
        .record_inbound_event("old", now - chrono::Duration::hours(2))
        .await
        .unwrap();
    store.record_inbound_event("recent", now).await.unwrap();

    let pruned = store
        .prune_inbound_events(now - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(pruned, 1);
    assert!(!store.record_inbound_event("recent", now).await.unwrap());

    store.forget_inbound_event("recent").await.unwrap();
    assert!(store.record_inbound_event("recent", now).await.unwrap());
}
