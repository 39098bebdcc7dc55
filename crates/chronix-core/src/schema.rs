//! Database schema management.

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Initialize the database schema. Safe to run on every start.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

// `run_at` and `claimed_at` are epoch milliseconds so range scans and
// ordering are plain integer comparisons.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    task_type TEXT NOT NULL,
    payload BLOB NOT NULL,
    run_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed')),
    recurrence_interval INTEGER,
    recurrence_limit INTEGER,
    recurrence_count INTEGER NOT NULL DEFAULT 0,
    claimed_at INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (recurrence_limit IS NULL OR recurrence_interval IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due
    ON scheduled_tasks(status, run_at, id);

CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_claimed
    ON scheduled_tasks(status, claimed_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='scheduled_tasks'")
            .unwrap();
        assert!(stmt.exists([]).unwrap());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_schema_rejects_limit_without_interval() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO scheduled_tasks (id, owner_id, task_type, payload, run_at,
             recurrence_limit, created_at, updated_at)
             VALUES ('x', 'o', 't', x'', 0, 3, '', '')",
            [],
        );
        assert!(result.is_err());
    }
}
