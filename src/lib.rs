//! Punchcard - loyalty points ledger and reward automation
//!
//! Customers earn points by checking in over a messaging webhook or through
//! staff awards at the point of sale. Once a balance crosses the tenant's
//! threshold, reward codes are minted from it, and codes move through a
//! one-way redemption lifecycle. Every point change is paired with an
//! append-only audit entry in the same storage transaction.

pub mod app;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod model;
pub mod rewards;
pub mod router;
pub mod storage;
pub mod utils;
pub mod webhook;

pub use error::{LoyaltyError, Result};
