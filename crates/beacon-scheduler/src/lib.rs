//! `beacon-scheduler` — in-process job scheduler with cluster-wide
//! single-instance execution.
//!
//! # Overview
//!
//! Jobs are registered on a [`Scheduler`] at startup on every node. Once
//! started, a master tick (1 Hz by default) walks the jobs in registration
//! order and dispatches those that are due. Each dispatch runs in its own
//! task with a fresh trace id, behind a panic boundary.
//!
//! # Schedule variants
//!
//! | Variant     | Behaviour                                                   |
//! |-------------|-------------------------------------------------------------|
//! | `Immediate` | Every master tick; overlap disabled (restart on Done)       |
//! | `DailyAt`   | When local `HH:MM:SS` equals a configured entry              |
//! | `Every`     | On a private timer armed once, first fire one period in     |
//!
//! # Policies
//!
//! - `without_overlapping()`: skip while the previous dispatch is in flight.
//! - `on_one_server()`: take `<prefix>schedule:jobLock:<name>:Server` in the
//!   shared [`LockService`](beacon_lock::LockService) first; renew it every
//!   second while running.
//! - `random_delay(min, max)`: uniform jitter before the handler runs.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use beacon_core::{SchedulerConfig, TraceIdGenerator};
//! use beacon_lock::MemoryLockService;
//! use beacon_scheduler::{handler_fn, Scheduler};
//!
//! # async fn demo() -> Result<(), beacon_scheduler::SchedulerError> {
//! let mut scheduler = Scheduler::new(
//!     SchedulerConfig::default(),
//!     Arc::new(MemoryLockService::new("node-a")),
//!     Arc::new(TraceIdGenerator::new()),
//! )?;
//! scheduler
//!     .add_job("Cleanup", handler_fn(|_ctx| async { Ok::<_, anyhow::Error>(()) }))
//!     .every_minutes(1)
//!     .on_one_server()
//!     .register()?;
//! let handle = scheduler.start();
//! # handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod clock;
mod dispatch;
pub mod engine;
pub mod error;
pub mod handler;
pub mod job;
mod lease;
mod panic;
pub mod schedule;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use engine::{Scheduler, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use handler::{handler_fn, FnHandler, Handler, HandlerEvent, Reporter, RunContext};
pub use job::{Job, JobBuilder, Scheduled, Unscheduled};
pub use types::{Jitter, JobStatsSnapshot, Policy, Schedule};
