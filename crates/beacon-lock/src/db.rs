use rusqlite::Connection;

use crate::error::Result;

/// Initialise the lock schema in `conn`.
///
/// Creates the `schedule_locks` table (idempotent). Expiry is stored as Unix
/// milliseconds so every node compares against the same wall clock.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedule_locks (
            key         TEXT    NOT NULL PRIMARY KEY,
            owner       TEXT    NOT NULL,
            expires_at  INTEGER NOT NULL    -- unix millis
        ) STRICT;
        ",
    )?;
    Ok(())
}
