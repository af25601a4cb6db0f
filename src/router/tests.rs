use std::sync::Arc;

use super::*;
use crate::app::{App, AppBuilder};
use crate::config::Config;
use crate::dispatch::RecordingSender;
use crate::model::Tenant;
use crate::rewards::RewardSettings;
use crate::storage::{AuditLog, Directory, LedgerStore, MockStore, RewardStore, SettingsStore};

const CUSTOMER: &str = "15550003333@s.whatsapp.net";

struct Fixture {
    app: App,
    backend: Arc<MockStore>,
    sender: Arc<RecordingSender>,
    tenant: Tenant,
}

async fn fixture() -> Fixture {
    let (stores, backend) = Stores::memory();
    let tenant = backend.create_tenant("Acme Bakery").await.unwrap();
    backend.create_branch(tenant.id, "Downtown").await.unwrap();
    let sender = Arc::new(RecordingSender::new());
    let app = AppBuilder::new(Config::for_test())
        .with_stores(stores)
        .with_sender(sender.clone())
        .build();
    Fixture {
        app,
        backend,
        sender,
        tenant,
    }
}

fn message(id: &str, text: &str) -> InboundEvent {
    InboundEvent {
        message_id: id.to_string(),
        event_type: MESSAGE_EVENT.to_string(),
        sender: CUSTOMER.to_string(),
        from_self: false,
        text: text.to_string(),
        received_at: Utc::now(),
    }
}

fn reply(outcome: &RouteOutcome) -> &str {
    match outcome {
        RouteOutcome::Processed { reply, .. } => reply,
        other => panic!("expected a processed outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_check_in_creates_ledger_entry() {
    let f = fixture().await;

    let outcome = f
        .app
        .router
        .handle(message("m1", "Acme Bakery - Downtown"))
        .await
        .unwrap();
    assert!(reply(&outcome).starts_with("Welcome to Acme Bakery (Downtown)!"));

    let customer = f.backend.customer_by_identity(CUSTOMER).await.unwrap().unwrap();
    let entry = LedgerStore::get(f.backend.as_ref(), customer.id, f.tenant.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.total_points, 10);
    assert_eq!(entry.visits_count, 1);

    let sent = f.sender.wait_for(1, Duration::from_secs(2)).await;
    assert_eq!(sent[0].recipient, CUSTOMER);
    assert_eq!(sent[0].text, reply(&outcome));
}

#[tokio::test]
async fn test_check_in_is_case_insensitive_and_branch_optional() {
    let f = fixture().await;

    let outcome = f
        .app
        .router
        .handle(message("m1", "acme bakery - Uptown"))
        .await
        .unwrap();
    let text = reply(&outcome);
    assert!(text.starts_with("Welcome to Acme Bakery!"), "{text}");

    let customer = f.backend.customer_by_identity(CUSTOMER).await.unwrap().unwrap();
    let audit = AuditLog::list_for(f.backend.as_ref(), customer.id, f.tenant.id)
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].note, "Check-in");
}

#[tokio::test]
async fn test_unknown_tenant_replies_without_mutation() {
    let f = fixture().await;

    let outcome = f
        .app
        .router
        .handle(message("m1", "Nowhere Diner - Main St"))
        .await
        .unwrap();
    assert!(reply(&outcome).contains("Nowhere Diner"));
    assert!(f.backend.customer_by_identity(CUSTOMER).await.unwrap().is_none());
    assert_eq!(f.backend.audit_len().await, 0);
}

#[tokio::test]
async fn test_balance_query_without_tenants_mutates_nothing() {
    let f = fixture().await;

    let outcome = f.app.router.handle(message("m1", "balance")).await.unwrap();
    assert_eq!(reply(&outcome), replies::NO_POINTS);
    assert!(f.backend.customer_by_identity(CUSTOMER).await.unwrap().is_none());
    assert_eq!(f.backend.audit_len().await, 0);
}

#[tokio::test]
async fn test_balance_and_challenge_after_check_ins() {
    let f = fixture().await;
    let other = f.backend.create_tenant("Corner Cafe").await.unwrap();
    SettingsStore::put(
        f.backend.as_ref(),
        other.id,
        &RewardSettings {
            points_required: 50,
            checkin_points: Some(20),
            ..RewardSettings::default()
        },
    )
    .await
    .unwrap();

    f.app.router.handle(message("m1", "Acme Bakery - Downtown")).await.unwrap();
    f.app.router.handle(message("m2", "Corner Cafe - Plaza")).await.unwrap();

    let outcome = f.app.router.handle(message("m3", "BALANCE")).await.unwrap();
    assert_eq!(
        reply(&outcome),
        "Your points:\n- Acme Bakery: 10 points\n- Corner Cafe: 20 points"
    );

    let outcome = f.app.router.handle(message("m4", "challenge")).await.unwrap();
    let text = reply(&outcome);
    assert!(text.contains("Acme Bakery: 10/100 points, 90 more"), "{text}");
    assert!(text.contains("Corner Cafe: 20/50 points, 30 more"), "{text}");
}

#[tokio::test]
async fn test_replayed_message_is_duplicate() {
    let f = fixture().await;

    f.app.router.handle(message("m1", "Acme Bakery - Downtown")).await.unwrap();
    let replay = f
        .app
        .router
        .handle(message("m1", "Acme Bakery - Downtown"))
        .await
        .unwrap();
    assert_eq!(replay, RouteOutcome::Duplicate);

    let customer = f.backend.customer_by_identity(CUSTOMER).await.unwrap().unwrap();
    let entry = LedgerStore::get(f.backend.as_ref(), customer.id, f.tenant.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.total_points, 10);
}

#[tokio::test]
async fn test_filtered_events_are_ignored() {
    let f = fixture().await;

    let mut own = message("m1", "Acme Bakery - Downtown");
    own.from_self = true;
    assert_eq!(
        f.app.router.handle(own).await.unwrap(),
        RouteOutcome::Ignored { reason: "from_self" }
    );

    let mut group = message("m2", "Acme Bakery - Downtown");
    group.sender = "120363025@g.us".to_string();
    assert_eq!(
        f.app.router.handle(group).await.unwrap(),
        RouteOutcome::Ignored { reason: "group_sender" }
    );

    let mut receipt = message("m3", "");
    receipt.event_type = "status".to_string();
    assert_eq!(
        f.app.router.handle(receipt).await.unwrap(),
        RouteOutcome::Ignored { reason: "not_a_message" }
    );

    assert_eq!(f.backend.audit_len().await, 0);
}

#[tokio::test]
async fn test_missing_message_id_is_rejected() {
    let f = fixture().await;
    let result = f.app.router.handle(message("  ", "balance")).await;
    assert!(matches!(result, Err(LoyaltyError::Validation(_))));
}

#[tokio::test]
async fn test_unrecognized_text_gets_help() {
    let f = fixture().await;
    let outcome = f.app.router.handle(message("m1", "hello?")).await.unwrap();
    assert_eq!(
        outcome,
        RouteOutcome::Processed {
            command: "unrecognized",
            reply: replies::HELP.to_string(),
        }
    );
}

#[tokio::test]
async fn test_opt_out_survives_later_check_in() {
    let f = fixture().await;

    let outcome = f.app.router.handle(message("m1", "stop")).await.unwrap();
    assert_eq!(reply(&outcome), replies::OPTED_OUT);

    f.app.router.handle(message("m2", "Acme Bakery - Downtown")).await.unwrap();
    let customer = f.backend.customer_by_identity(CUSTOMER).await.unwrap().unwrap();
    assert!(customer.opted_out);
}

#[tokio::test]
async fn test_opted_out_customer_gets_no_reward_announcement() {
    let f = fixture().await;
    SettingsStore::put(
        f.backend.as_ref(),
        f.tenant.id,
        &RewardSettings {
            points_required: 10,
            ..RewardSettings::default()
        },
    )
    .await
    .unwrap();
    f.app.router.handle(message("m1", "stop")).await.unwrap();

    let outcome = f
        .app
        .router
        .handle(message("m2", "Acme Bakery - Downtown"))
        .await
        .unwrap();
    assert!(reply(&outcome).contains("You unlocked a reward!"));

    let customer = f.backend.customer_by_identity(CUSTOMER).await.unwrap().unwrap();
    let codes = RewardStore::list_for(f.backend.as_ref(), customer.id, f.tenant.id)
        .await
        .unwrap();
    assert_eq!(codes.len(), 1);

    // Only the two direct replies go out.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent = f.sender.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| !m.text.contains(&codes[0].code)));
}

#[tokio::test]
async fn test_structured_info_updates_profile() {
    let f = fixture().await;

    let outcome = f
        .app
        .router
        .handle(message("m1", "name: Jane Doe\nemail: jane@example.com"))
        .await
        .unwrap();
    assert_eq!(reply(&outcome), replies::PROFILE_UPDATED);

    let customer = f.backend.customer_by_identity(CUSTOMER).await.unwrap().unwrap();
    assert_eq!(customer.display_name.as_deref(), Some("Jane Doe"));
    assert_eq!(customer.email.as_deref(), Some("jane@example.com"));
}

#[tokio::test]
async fn test_invalid_profile_replies_and_changes_nothing() {
    let f = fixture().await;

    let outcome = f
        .app
        .router
        .handle(message("m1", "email: not-an-address"))
        .await
        .unwrap();
    assert!(reply(&outcome).starts_with("Sorry, we couldn't process that"));
    assert!(f.backend.customer_by_identity(CUSTOMER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_storage_outage_surfaces_as_transient() {
    let f = fixture().await;
    f.backend.set_fail_on_write(true).await;

    let result = f.app.router.handle(message("m1", "Acme Bakery - Downtown")).await;
    assert!(matches!(result, Err(ref e) if e.is_transient()));
}

#[tokio::test]
async fn test_failed_delivery_is_processed_on_redelivery() {
    let f = fixture().await;
    f.backend.set_fail_on_audit(true).await;

    let result = f
        .app
        .router
        .handle(message("m1", "Acme Bakery - Downtown"))
        .await;
    assert!(matches!(result, Err(ref e) if e.is_transient()));

    f.backend.set_fail_on_audit(false).await;
    let outcome = f
        .app
        .router
        .handle(message("m1", "Acme Bakery - Downtown"))
        .await
        .unwrap();
    assert!(matches!(outcome, RouteOutcome::Processed { command: "check_in", .. }));

    let replay = f
        .app
        .router
        .handle(message("m1", "Acme Bakery - Downtown"))
        .await
        .unwrap();
    assert_eq!(replay, RouteOutcome::Duplicate);

    let customer = f.backend.customer_by_identity(CUSTOMER).await.unwrap().unwrap();
    let entry = LedgerStore::get(f.backend.as_ref(), customer.id, f.tenant.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.total_points, 10);
    assert_eq!(entry.visits_count, 1);
    assert_eq!(f.backend.audit_len().await, 1);
}

#[tokio::test]
async fn test_prune_processed_allows_old_ids_again() {
    let f = fixture().await;
    let mut old = message("m1", "help");
    old.received_at = Utc::now() - chrono::Duration::days(10);
    f.app.router.handle(old).await.unwrap();
    f.app.router.handle(message("m2", "help")).await.unwrap();

    let pruned = f
        .app
        .router
        .prune_processed(Utc::now() - chrono::Duration::days(7))
        .await
        .unwrap();
    assert_eq!(pruned, 1);

    let again = f.app.router.handle(message("m1", "help")).await.unwrap();
    assert!(matches!(again, RouteOutcome::Processed { .. }));
    let replay = f.app.router.handle(message("m2", "help")).await.unwrap();
    assert_eq!(replay, RouteOutcome::Duplicate);
}
