//! `beacon-core` — configuration, shared errors and trace identifiers used by
//! every other beacon crate.

pub mod config;
pub mod error;
pub mod trace;

pub use config::{BeaconConfig, LockBackend, SchedulerConfig, Timezone};
pub use error::{BeaconError, Result};
pub use trace::{TraceIdGenerator, TraceSource};
