use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::NaiveTime;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// When a job is due. Fixed at registration and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Due on every master tick.
    Immediate,

    /// Due whenever the wall clock reads one of these times, to the second.
    DailyAt(Vec<NaiveTime>),

    /// Due on every tick of a private timer with this period.
    Every(Duration),
}

impl Schedule {
    /// Short human-readable form for log lines.
    pub fn describe(&self) -> String {
        match self {
            Schedule::Immediate => "immediate".to_string(),
            Schedule::DailyAt(times) => {
                let times: Vec<String> = times
                    .iter()
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .collect();
                format!("daily at {}", times.join(", "))
            }
            Schedule::Every(period) => format!("every {}s", period.as_secs()),
        }
    }
}

/// Uniform random delay inserted before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    min: Duration,
    max: Duration,
}

impl Jitter {
    /// Longest accepted upper bound: the same 365 days as an interval period.
    pub const MAX: Duration = crate::schedule::MAX_PERIOD;

    /// `None` when `max < min` or `max` exceeds [`Jitter::MAX`].
    pub fn new(min: Duration, max: Duration) -> Option<Self> {
        (min <= max && max <= Self::MAX).then_some(Self { min, max })
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draw a delay in `[min, max]` at millisecond resolution.
    pub fn sample(&self) -> Duration {
        // both bounds are at most `Jitter::MAX`, far inside u64 milliseconds
        let lo = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let hi = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// Execution policy flags of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// When false a dispatch is skipped while the previous one is in flight.
    pub allow_overlap: bool,
    /// When true only the holder of the server lock runs a dispatch.
    pub single_instance: bool,
    pub jitter: Option<Jitter>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allow_overlap: true,
            single_instance: false,
            jitter: None,
        }
    }
}

/// Live per-job counters, updated by the dispatch path.
#[derive(Debug, Default)]
pub struct JobStats {
    pub(crate) dispatched: AtomicU64,
    pub(crate) started: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) skipped_overlap: AtomicU64,
    pub(crate) skipped_lock: AtomicU64,
    pub(crate) errors: AtomicU64,
    pub(crate) panics: AtomicU64,
    pub(crate) lock_faults: AtomicU64,
}

impl JobStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JobStatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        JobStatsSnapshot {
            dispatched: get(&self.dispatched),
            started: get(&self.started),
            completed: get(&self.completed),
            skipped_overlap: get(&self.skipped_overlap),
            skipped_lock: get(&self.skipped_lock),
            errors: get(&self.errors),
            panics: get(&self.panics),
            lock_faults: get(&self.lock_faults),
        }
    }
}

/// Point-in-time copy of [`JobStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatsSnapshot {
    /// Schedule matches that spawned a dispatch.
    pub dispatched: u64,
    /// Dispatches that passed every gate and reached the start log line.
    pub started: u64,
    /// Dispatches whose handler signalled Done (or whose stream closed).
    pub completed: u64,
    /// Dispatches dropped because the previous one was still in flight.
    pub skipped_overlap: u64,
    /// Dispatches dropped because the server lock was already held.
    pub skipped_lock: u64,
    /// Values received on the handler's error stream.
    pub errors: u64,
    /// Dispatches that ended in a panic.
    pub panics: u64,
    /// Lock service calls that failed outright.
    pub lock_faults: u64,
}
