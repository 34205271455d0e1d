//! `beacon-lock` — cross-node mutual exclusion for scheduled jobs.
//!
//! The scheduler only needs three operations from a shared store: an atomic
//! set-if-absent with expiry, an expiry refresh and a delete. They are
//! modelled by the [`LockService`] trait; two backends ship in-tree.
//!
//! | Backend               | Scope                                         |
//! |-----------------------|-----------------------------------------------|
//! | [`MemoryLockService`] | One process (tests, single-node deployments)  |
//! | [`SqliteLockService`] | Every process sharing the same SQLite file    |

pub mod db;
pub mod error;
pub mod memory;
pub mod service;
pub mod sqlite;

pub use error::{LockError, Result};
pub use memory::MemoryLockService;
pub use service::{server_lock_key, LockService, LockScope};
pub use sqlite::SqliteLockService;
