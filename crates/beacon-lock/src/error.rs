use thiserror::Error;

/// Transport or store failures talking to the lock backend.
///
/// Contention is not an error: a lost race is reported as `Ok(false)`.
#[derive(Debug, Error)]
pub enum LockError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The backend is unreachable or refused the operation.
    #[error("Lock backend error: {0}")]
    Backend(String),

    /// A blocking store call could not be joined (panicked or was cancelled).
    #[error("Lock task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, LockError>;
