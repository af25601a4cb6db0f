//! Shared storage contract tests.
//!
//! Every backend must satisfy the same ledger, audit and reward-code
//! contract. Each backend's test file imports these functions and runs them
//! through the `run_*` macros.

pub mod ledger_store_tests;
pub mod reward_store_tests;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use punchcard::model::Attribution;
use punchcard::storage::{IssueRequest, LedgerMutation, OverdraftPolicy};

/// A fresh (customer, tenant) pair.
pub fn pair() -> (Uuid, Uuid) {
    (Uuid::new_v4(), Uuid::new_v4())
}

pub fn credit(customer_id: Uuid, tenant_id: Uuid, delta: i64) -> LedgerMutation {
    LedgerMutation {
        customer_id,
        tenant_id,
        delta,
        visit: false,
        overdraft: OverdraftPolicy::Reject,
        attribution: Attribution::system("contract test"),
    }
}

pub fn issue_request(
    customer_id: Uuid,
    tenant_id: Uuid,
    code: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> IssueRequest {
    IssueRequest {
        code_id: Uuid::new_v4(),
        code: code.to_string(),
        customer_id,
        tenant_id,
        value: 5,
        points_required: 100,
        max_active_cards: 2,
        expires_at,
        now,
    }
}

/// Unique code per call, so backends shared across tests never collide by accident.
pub fn fresh_code() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("T-{}-{}-{}", &hex[0..4], &hex[4..8], &hex[8..12])
}
