//! RewardStore contract tests: issuance, uniqueness and terminal states.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use punchcard::model::{Attribution, RewardStatus};
use punchcard::storage::{AuditLog, LedgerStore, RewardStore, StorageError};

use super::{credit, fresh_code, issue_request, pair};

pub async fn test_issue_deducts_and_audits<S: LedgerStore + AuditLog + RewardStore>(store: &S) {
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();
    store
        .apply_delta(credit(customer_id, tenant_id, 130))
        .await
        .unwrap();

    let now = Utc::now();
    let code = fresh_code();
    let issued = store
        .issue(issue_request(customer_id, tenant_id, &code, now, now + Duration::days(30)))
        .await
        .expect("issue should succeed");
    assert_eq!(issued.reward.code, code);
    assert_eq!(issued.reward.status, RewardStatus::Active);
    assert_eq!(issued.reward.points_consumed, 100);
    assert_eq!(issued.entry.total_points, 30);

    assert!(store.code_exists(&code).await.unwrap());
    assert_eq!(store.count_active(customer_id, tenant_id, now).await.unwrap(), 1);

    let audit = AuditLog::list_for(store, customer_id, tenant_id).await.unwrap();
    let last = audit.last().expect("issuance is audited");
    assert_eq!(last.id, issued.audit_id);
    assert_eq!(last.points_delta, -100);
    assert_eq!(last.related_reward_code_id, Some(issued.reward.id));
    assert_eq!(audit.iter().map(|a| a.points_delta).sum::<i64>(), 30);
}

pub async fn test_issue_revalidates_balance<S: LedgerStore + AuditLog + RewardStore>(store: &S) {
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();
    store
        .apply_delta(credit(customer_id, tenant_id, 99))
        .await
        .unwrap();

    let now = Utc::now();
    let code = fresh_code();
    let result = store
        .issue(issue_request(customer_id, tenant_id, &code, now, now + Duration::days(30)))
        .await;
    assert!(matches!(
        result,
        Err(StorageError::InsufficientPoints { available: 99, required: 100 })
    ));
    assert!(!store.code_exists(&code).await.unwrap(), "no code row left behind");
    assert_eq!(AuditLog::list_for(store, customer_id, tenant_id).await.unwrap().len(), 1);
}

pub async fn test_duplicate_code_rolls_back<S: LedgerStore + AuditLog + RewardStore>(store: &S) {
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();
    store
        .apply_delta(credit(customer_id, tenant_id, 200))
        .await
        .unwrap();

    let now = Utc::now();
    let code = fresh_code();
    store
        .issue(issue_request(customer_id, tenant_id, &code, now, now + Duration::days(30)))
        .await
        .unwrap();

    let result = store
        .issue(issue_request(customer_id, tenant_id, &code, now, now + Duration::days(30)))
        .await;
    assert!(matches!(result, Err(StorageError::CodeCollision(ref c)) if *c == code));

    let entry = LedgerStore::get(store, customer_id, tenant_id).await.unwrap().unwrap();
    assert_eq!(entry.total_points, 100, "the colliding card deducted nothing");
    assert_eq!(AuditLog::list_for(store, customer_id, tenant_id).await.unwrap().len(), 2);
}

pub async fn test_active_card_cap<S: LedgerStore + RewardStore>(store: &S) {
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();
    store
        .apply_delta(credit(customer_id, tenant_id, 300))
        .await
        .unwrap();

    let now = Utc::now();
    for _ in 0..2 {
        store
            .issue(issue_request(
                customer_id,
                tenant_id,
                &fresh_code(),
                now,
                now + Duration::days(30),
            ))
            .await
            .unwrap();
    }
    let result = store
        .issue(issue_request(customer_id, tenant_id, &fresh_code(), now, now + Duration::days(30)))
        .await;
    assert!(matches!(result, Err(StorageError::ActiveCardCap { active: 2, cap: 2 })));

    let entry = LedgerStore::get(store, customer_id, tenant_id).await.unwrap().unwrap();
    assert_eq!(entry.total_points, 100);
}

/// Once terminal, a code refuses every transition and keeps its fields.
pub async fn test_terminal_states_are_final<S: LedgerStore + AuditLog + RewardStore>(store: &S) {
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();
    store
        .apply_delta(credit(customer_id, tenant_id, 200))
        .await
        .unwrap();

    let now = Utc::now();
    let redeemed = store
        .issue(issue_request(customer_id, tenant_id, &fresh_code(), now, now + Duration::days(30)))
        .await
        .unwrap()
        .reward;
    let cancelled = store
        .issue(issue_request(customer_id, tenant_id, &fresh_code(), now, now + Duration::days(30)))
        .await
        .unwrap()
        .reward;

    let redemption = store
        .redeem(redeemed.id, Utc::now(), Attribution::system("redeem"))
        .await
        .expect("first redeem succeeds");
    assert_eq!(redemption.reward.status, RewardStatus::Redeemed);
    assert!(redemption.reward.redeemed_at.is_some());
    assert_eq!(redemption.audit.points_delta, 0);
    assert_eq!(redemption.audit.related_reward_code_id, Some(redeemed.id));

    store
        .cancel(cancelled.id, Utc::now(), Attribution::system("cancel"))
        .await
        .expect("cancel succeeds");

    let audit_before = AuditLog::list_for(store, customer_id, tenant_id).await.unwrap().len();
    for id in [redeemed.id, cancelled.id] {
        let before = RewardStore::get(store, id).await.unwrap().unwrap();

        let again = store.redeem(id, Utc::now(), Attribution::system("again")).await;
        assert!(matches!(again, Err(StorageError::InvalidTransition { .. })));
        let cancel = store.cancel(id, Utc::now(), Attribution::system("again")).await;
        assert!(matches!(cancel, Err(StorageError::InvalidTransition { .. })));

        let after = RewardStore::get(store, id).await.unwrap().unwrap();
        assert_eq!(before, after);
    }
    assert_eq!(
        AuditLog::list_for(store, customer_id, tenant_id).await.unwrap().len(),
        audit_before
    );
}

pub async fn test_expired_code_cannot_be_redeemed<S: LedgerStore + AuditLog + RewardStore>(
    store: &S,
) {
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();
    store
        .apply_delta(credit(customer_id, tenant_id, 100))
        .await
        .unwrap();

    let now = Utc::now();
    let reward = store
        .issue(issue_request(
            customer_id,
            tenant_id,
            &fresh_code(),
            now,
            now - Duration::minutes(1),
        ))
        .await
        .unwrap()
        .reward;
    let audit_before = AuditLog::list_for(store, customer_id, tenant_id).await.unwrap().len();

    let result = store.redeem(reward.id, Utc::now(), Attribution::system("late")).await;
    assert!(matches!(result, Err(StorageError::PastExpiry { .. })));
    assert_eq!(
        AuditLog::list_for(store, customer_id, tenant_id).await.unwrap().len(),
        audit_before
    );

    let expired = store.expire_due(Utc::now()).await.unwrap();
    assert!(expired.iter().any(|r| r.id == reward.id && r.status == RewardStatus::Expired));
    let stored = RewardStore::get(store, reward.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RewardStatus::Expired);
}

pub async fn test_unknown_code_is_not_found<S: RewardStore>(store: &S) {
    let result = store
        .redeem(uuid::Uuid::new_v4(), Utc::now(), Attribution::system("ghost"))
        .await;
    assert!(matches!(result, Err(StorageError::RewardNotFound(_))));
}

/// Concurrent issuers racing on a small code space never persist a duplicate.
pub async fn test_concurrent_issuance_keeps_codes_unique<S>(store: Arc<S>)
where
    S: LedgerStore + RewardStore + 'static,
{
    let (customer_id, tenant_id) = pair();
    store.get_or_create(customer_id, tenant_id).await.unwrap();
    store
        .apply_delta(credit(customer_id, tenant_id, 2_000))
        .await
        .unwrap();

    let pool: Vec<String> = (0..4).map(|_| fresh_code()).collect();
    let now = Utc::now();
    let handles: Vec<_> = (0..12)
        .map(|i| {
            let store = store.clone();
            let code = pool[i % pool.len()].clone();
            tokio::spawn(async move {
                let mut request =
                    issue_request(customer_id, tenant_id, &code, now, now + Duration::days(30));
                request.max_active_cards = 100;
                store.issue(request).await
            })
        })
        .collect();

    let mut issued = 0;
    for handle in futures::future::join_all(handles).await {
        match handle.expect("task panicked") {
            Ok(_) => issued += 1,
            Err(StorageError::CodeCollision(_)) => {}
            Err(e) => panic!("unexpected issuance error: {e}"),
        }
    }
    assert_eq!(issued, pool.len(), "each code is persisted exactly once");

    let codes = RewardStore::list_for(store.as_ref(), customer_id, tenant_id)
        .await
        .unwrap();
    let distinct: HashSet<_> = codes.iter().map(|c| c.code.clone()).collect();
    assert_eq!(distinct.len(), codes.len());

    let entry = LedgerStore::get(store.as_ref(), customer_id, tenant_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.total_points, 2_000 - 100 * pool.len() as i64);
}

/// Run every reward contract test against `$store` (an `Arc` of the backend).
#[macro_export]
macro_rules! run_reward_store_tests {
    ($store:expr) => {
        use $crate::storage::reward_store_tests::*;

        test_issue_deducts_and_audits(&*$store).await;
        println!("  test_issue_deducts_and_audits: PASSED");

        test_issue_revalidates_balance(&*$store).await;
        println!("  test_issue_revalidates_balance: PASSED");

        test_duplicate_code_rolls_back(&*$store).await;
        println!("  test_duplicate_code_rolls_back: PASSED");

        test_active_card_cap(&*$store).await;
        println!("  test_active_card_cap: PASSED");

        test_terminal_states_are_final(&*$store).await;
        println!("  test_terminal_states_are_final: PASSED");

        test_expired_code_cannot_be_redeemed(&*$store).await;
        println!("  test_expired_code_cannot_be_redeemed: PASSED");

        test_unknown_code_is_not_found(&*$store).await;
        println!("  test_unknown_code_is_not_found: PASSED");

        test_concurrent_issuance_keeps_codes_unique($store.clone()).await;
        println!("  test_concurrent_issuance_keeps_codes_unique: PASSED");
    };
}
