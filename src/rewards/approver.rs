//! Approver identity validation for PIN-gated operations.
//!
//! Redemptions and staff point awards name an approver by PIN. The validator
//! turns a (tenant, PIN) pair into the approver's id or refuses it.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use crate::error::{LoyaltyError, Result};

/// One staff member allowed to approve operations for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PinApprover {
    pub tenant_id: Uuid,
    pub approver_id: Uuid,
    /// Lowercase hex SHA-256 of the PIN.
    pub pin_sha256: String,
}

impl PinApprover {
    /// Build an entry from a clear-text PIN.
    pub fn from_pin(tenant_id: Uuid, approver_id: Uuid, pin: &str) -> Self {
        Self {
            tenant_id,
            approver_id,
            pin_sha256: hex::encode(Sha256::digest(pin.as_bytes())),
        }
    }
}

/// Checks an approver PIN.
#[async_trait]
pub trait ApproverValidator: Send + Sync {
    /// Returns the approver id for a valid PIN, or `Authorization` otherwise.
    async fn validate(&self, tenant_id: Uuid, pin: &str) -> Result<Uuid>;
}

/// Validator backed by a fixed list of hashed PINs.
#[derive(Debug, Default)]
pub struct StaticPinValidator {
    by_tenant: HashMap<Uuid, Vec<(Uuid, [u8; 32])>>,
}

impl StaticPinValidator {
    /// Entries with a malformed hash are skipped with a warning.
    pub fn new(approvers: &[PinApprover]) -> Self {
        let mut by_tenant: HashMap<Uuid, Vec<(Uuid, [u8; 32])>> = HashMap::new();
        for approver in approvers {
            let digest = hex::decode(&approver.pin_sha256)
                .ok()
                .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok());
            match digest {
                Some(digest) => by_tenant
                    .entry(approver.tenant_id)
                    .or_default()
                    .push((approver.approver_id, digest)),
                None => warn!(
                    approver_id = %approver.approver_id,
                    "Ignoring approver with malformed pin_sha256"
                ),
            }
        }
        Self { by_tenant }
    }
}

#[async_trait]
impl ApproverValidator for StaticPinValidator {
    async fn validate(&self, tenant_id: Uuid, pin: &str) -> Result<Uuid> {
        let offered: [u8; 32] = Sha256::digest(pin.as_bytes()).into();
        let approvers = self.by_tenant.get(&tenant_id).map(Vec::as_slice).unwrap_or(&[]);

        // Compare against every candidate so timing does not reveal the match position.
        let mut matched = None;
        for (approver_id, digest) in approvers {
            if bool::from(digest[..].ct_eq(&offered[..])) && matched.is_none() {
                matched = Some(*approver_id);
            }
        }

        matched.ok_or_else(|| {
            warn!(tenant_id = %tenant_id, "Approver PIN rejected");
            LoyaltyError::Authorization("invalid approver PIN".to_string())
        })
    }
}
