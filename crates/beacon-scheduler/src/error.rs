use thiserror::Error;

/// Configuration errors raised while building the scheduler or registering
/// jobs.
///
/// Every variant is detected at construction time; nothing here can surface
/// once the scheduler is running.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The schedule definition is invalid (bad `HH:MM:SS`, zero period, …).
    #[error("Invalid schedule for job {job}: {reason}")]
    InvalidSchedule { job: String, reason: String },

    /// `random_delay` was given an inverted window, or an upper bound beyond
    /// [`Jitter::MAX`](crate::types::Jitter::MAX).
    #[error("Invalid random delay for job {job}: [{min_secs}s, {max_secs}s]")]
    InvalidJitter {
        job: String,
        min_secs: u64,
        max_secs: u64,
    },

    /// Job names key the server lock and must be unique per scheduler.
    #[error("Duplicate job name: {name}")]
    DuplicateJob { name: String },

    #[error("Job name must not be empty")]
    EmptyJobName,

    /// Scheduler timing or lock settings the engine cannot run with.
    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
