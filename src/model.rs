//! Domain records shared by the stores and services.
//!
//! These are plain data types; all invariants that span more than one record
//! (balance/audit pairing, code uniqueness, terminal reward states) are
//! enforced by the storage layer inside a single transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Merchant account owning its own ledger, settings and reward codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
}

/// Physical location of a tenant. Check-ins may name one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
}

/// A customer, keyed by their messaging identity (phone number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub identity: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub opted_out: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-(customer, tenant) point balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub total_points: i64,
    /// Sum of every positive delta ever applied. Never decreases.
    pub lifetime_points: i64,
    pub visits_count: i64,
    pub first_visit_at: Option<DateTime<Utc>>,
    pub last_visit_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// A fresh entry for a pair that has never been seen.
    pub fn opening(customer_id: Uuid, tenant_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            customer_id,
            tenant_id,
            total_points: 0,
            lifetime_points: 0,
            visits_count: 0,
            first_visit_at: None,
            last_visit_at: None,
            is_active: true,
            created_at: now,
        }
    }
}

/// Who caused a ledger mutation and why.
///
/// Check-ins carry no operator; point-of-sale awards and redemptions carry
/// the staff operator and the PIN-validated approver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub operator_id: Option<Uuid>,
    pub approver_id: Option<Uuid>,
    pub note: String,
}

impl Attribution {
    /// Attribution for system-originated changes (check-ins, issuance).
    pub fn system(note: impl Into<String>) -> Self {
        Self {
            operator_id: None,
            approver_id: None,
            note: note.into(),
        }
    }

    pub fn staff(operator_id: Uuid, approver_id: Option<Uuid>, note: impl Into<String>) -> Self {
        Self {
            operator_id: Some(operator_id),
            approver_id,
            note: note.into(),
        }
    }
}

/// An audit entry before it is assigned an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub points_delta: i64,
    pub related_reward_code_id: Option<Uuid>,
    pub attribution: Attribution,
}

/// Immutable record of one point delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub points_delta: i64,
    pub related_reward_code_id: Option<Uuid>,
    pub operator_id: Option<Uuid>,
    pub approver_id: Option<Uuid>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn from_new(id: Uuid, entry: NewAuditEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_id: entry.customer_id,
            tenant_id: entry.tenant_id,
            points_delta: entry.points_delta,
            related_reward_code_id: entry.related_reward_code_id,
            operator_id: entry.attribution.operator_id,
            approver_id: entry.attribution.approver_id,
            note: entry.attribution.note,
            created_at,
        }
    }
}

/// Reward code lifecycle. Every state other than `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    Active,
    Redeemed,
    Expired,
    Cancelled,
}

impl RewardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardStatus::Active => "active",
            RewardStatus::Redeemed => "redeemed",
            RewardStatus::Expired => "expired",
            RewardStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RewardStatus::Active),
            "redeemed" => Some(RewardStatus::Redeemed),
            "expired" => Some(RewardStatus::Expired),
            "cancelled" => Some(RewardStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RewardStatus::Active)
    }
}

impl std::fmt::Display for RewardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A redeemable code ("gift card") minted from accumulated points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardCode {
    pub id: Uuid,
    pub code: String,
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub value: i64,
    pub points_consumed: i64,
    pub status: RewardStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl RewardCode {
    /// Active and not yet past its expiry instant.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == RewardStatus::Active && now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            RewardStatus::Active,
            RewardStatus::Redeemed,
            RewardStatus::Expired,
            RewardStatus::Cancelled,
        ] {
            assert_eq!(RewardStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RewardStatus::parse("pending"), None);
    }

    #[test]
    fn test_only_active_is_non_terminal() {
        assert!(!RewardStatus::Active.is_terminal());
        assert!(RewardStatus::Redeemed.is_terminal());
        assert!(RewardStatus::Expired.is_terminal());
        assert!(RewardStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_is_live_respects_expiry() {
        let now = Utc::now();
        let code = RewardCode {
            id: Uuid::new_v4(),
            code: "GC-ABCD-EFGH-JKLM".to_string(),
            customer_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            value: 5,
            points_consumed: 100,
            status: RewardStatus::Active,
            expires_at: now + chrono::Duration::days(1),
            created_at: now,
            redeemed_at: None,
        };
        assert!(code.is_live(now));
        assert!(!code.is_live(now + chrono::Duration::days(2)));

        let redeemed = RewardCode {
            status: RewardStatus::Redeemed,
            ..code
        };
        assert!(!redeemed.is_live(now));
    }
}
