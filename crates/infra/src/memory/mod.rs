//! In-memory implementations of every store contract.
//!
//! Intended for tests/dev. Each store guards its state with one lock, so every
//! multi-row change (cascading deletes, refresh rotation) is a single critical
//! section.

mod accounts;
mod rbac;

pub use accounts::{InMemoryAppStore, InMemoryIdentityStore, InMemoryRefreshTokenStore};
pub use rbac::InMemoryRbacStore;

use sso_core::StoreError;

fn poisoned<T>(_: T) -> StoreError {
    StoreError::backend("lock poisoned")
}
