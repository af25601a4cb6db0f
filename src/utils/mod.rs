//! Shared helpers: process bootstrap, retry policies and keyed locks.

pub mod bootstrap;
pub mod locks;
pub mod retry;
