//! SQLite task store.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};
use crate::schema::init_schema;
use crate::store::TaskStore;
use crate::task::{Finalization, ScheduledTask, TaskStatus};

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

const SELECT_COLUMNS: &str = "id, owner_id, task_type, payload, run_at, status,
    recurrence_interval, recurrence_limit, recurrence_count, claimed_at,
    created_at, updated_at";

/// SQLite-backed task store.
///
/// Every transition is a single conditional `UPDATE ... WHERE status = ?`,
/// so the row itself arbitrates between competing dispatchers.
pub struct SqliteTaskStore {
    conn: Connection,
}

impl SqliteTaskStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> SchedulerResult<Self> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| Ok(init_schema(conn)?)).await?;
        Ok(Self { conn })
    }

    /// Open (or create) a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let path_display = path.display().to_string();
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            Ok(init_schema(conn)?)
        })
        .await?;

        info!("Task store opened at {}", path_display);
        Ok(Self { conn })
    }

    /// Close the underlying connection.
    pub async fn close(self) -> SchedulerResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn conversion_error(
    column: usize,
    kind: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, kind, Box::new(err))
}

fn from_millis(column: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        conversion_error(
            column,
            Type::Integer,
            SchedulerError::Persistence(format!("timestamp {} out of range", millis)),
        )
    })
}

fn from_rfc3339(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, Type::Text, e))
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id).map_err(|e| conversion_error(0, Type::Text, e))?;
    let status: String = row.get(5)?;
    let status = status
        .parse::<TaskStatus>()
        .map_err(|e| conversion_error(5, Type::Text, e))?;
    let interval: Option<i64> = row.get(6)?;
    let limit: Option<i64> = row.get(7)?;
    let count: i64 = row.get(8)?;
    let claimed_at: Option<i64> = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(ScheduledTask {
        id,
        owner_id: row.get(1)?,
        task_type: row.get(2)?,
        payload: row.get(3)?,
        run_at: from_millis(4, row.get(4)?)?,
        status,
        recurrence_interval: interval
            .map(u64::try_from)
            .transpose()
            .map_err(|e| conversion_error(6, Type::Integer, e))?,
        recurrence_limit: limit
            .map(u32::try_from)
            .transpose()
            .map_err(|e| conversion_error(7, Type::Integer, e))?,
        recurrence_count: u32::try_from(count)
            .map_err(|e| conversion_error(8, Type::Integer, e))?,
        claimed_at: claimed_at.map(|ms| from_millis(9, ms)).transpose()?,
        created_at: from_rfc3339(10, &created_at)?,
        updated_at: from_rfc3339(11, &updated_at)?,
    })
}

/// What a conditional finalize found.
enum FinalizeOutcome {
    Applied,
    Missing,
    WrongStatus(String),
    Superseded(i64),
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &ScheduledTask) -> SchedulerResult<Uuid> {
        task.validate()?;

        let id = task.id;
        let owner_id = task.owner_id.clone();
        let task_type = task.task_type.clone();
        let payload = task.payload.clone();
        let run_at = to_millis(task.run_at);
        let status = task.status.as_str();
        let interval = task
            .recurrence_interval
            .map(i64::try_from)
            .transpose()
            .map_err(|e| SchedulerError::Validation(e.to_string()))?;
        let limit = task.recurrence_limit.map(i64::from);
        let count = i64::from(task.recurrence_count);
        let created = task.created_at.to_rfc3339();
        let updated = task.updated_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO scheduled_tasks (id, owner_id, task_type, payload, run_at, status,
                     recurrence_interval, recurrence_limit, recurrence_count, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        id.to_string(),
                        owner_id,
                        task_type,
                        payload,
                        run_at,
                        status,
                        interval,
                        limit,
                        count,
                        created,
                        updated
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!("Inserted task {} ({})", task.id, task.task_type);
        Ok(id)
    }

    async fn get(&self, id: &Uuid) -> SchedulerResult<Option<ScheduledTask>> {
        let id = id.to_string();
        let task = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM scheduled_tasks WHERE id = ?1", SELECT_COLUMNS);
                let task = conn
                    .query_row(&sql, [&id], row_to_task)
                    .optional()?;
                Ok(task)
            })
            .await?;
        Ok(task)
    }

    async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduledTask>> {
        let now = to_millis(now);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let tasks = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM scheduled_tasks
                     WHERE status = 'pending' AND run_at <= ?1
                     ORDER BY run_at ASC, id ASC
                     LIMIT ?2",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let tasks = stmt
                    .query_map(params![now, limit], row_to_task)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(tasks)
            })
            .await?;
        Ok(tasks)
    }

    async fn claim(&self, id: &Uuid, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let id = id.to_string();
        let claimed_at = to_millis(now);
        let updated = now.to_rfc3339();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE scheduled_tasks
                     SET status = 'processing', claimed_at = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'pending'",
                    params![claimed_at, updated, id],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn release(&self, id: &Uuid, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let id = id.to_string();
        let updated = now.to_rfc3339();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE scheduled_tasks
                     SET status = 'pending', claimed_at = NULL, updated_at = ?1
                     WHERE id = ?2 AND status = 'processing'",
                    params![updated, id],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        lease: TimeDelta,
    ) -> SchedulerResult<usize> {
        let Some(cutoff) = now.checked_sub_signed(lease) else {
            return Ok(0);
        };
        let cutoff = to_millis(cutoff);
        let updated = now.to_rfc3339();
        let reclaimed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE scheduled_tasks
                     SET status = 'pending', claimed_at = NULL, updated_at = ?1
                     WHERE status = 'processing' AND claimed_at IS NOT NULL AND claimed_at <= ?2",
                    params![updated, cutoff],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(reclaimed)
    }

    async fn finalize(
        &self,
        id: &Uuid,
        occurrence: DateTime<Utc>,
        finalization: Finalization,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let key = id.to_string();
        let expected = to_millis(occurrence);
        let status = finalization.status.as_str();
        let run_at = finalization.run_at.map(to_millis);
        let count = i64::from(finalization.recurrence_count);
        let updated = now.to_rfc3339();

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE scheduled_tasks
                     SET status = ?1, run_at = COALESCE(?2, run_at), recurrence_count = ?3,
                         claimed_at = NULL, updated_at = ?4
                     WHERE id = ?5 AND status = 'processing' AND run_at = ?6",
                    params![status, run_at, count, updated, key, expected],
                )?;

                let outcome = if changed == 1 {
                    FinalizeOutcome::Applied
                } else {
                    let current: Option<(String, i64)> = tx
                        .query_row(
                            "SELECT status, run_at FROM scheduled_tasks WHERE id = ?1",
                            [&key],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?;
                    match current {
                        Some((status, _)) if status != TaskStatus::Processing.as_str() => {
                            FinalizeOutcome::WrongStatus(status)
                        }
                        Some((_, run_at)) => FinalizeOutcome::Superseded(run_at),
                        None => FinalizeOutcome::Missing,
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        match outcome {
            FinalizeOutcome::Applied => {
                debug!("Finalized task {} as {}", id, finalization.status);
                Ok(())
            }
            FinalizeOutcome::Missing => Err(SchedulerError::TaskNotFound(*id)),
            FinalizeOutcome::WrongStatus(status) => Err(SchedulerError::InvalidTransition {
                id: *id,
                status: status.parse()?,
            }),
            FinalizeOutcome::Superseded(current) => Err(SchedulerError::StaleOccurrence {
                id: *id,
                occurrence,
                current: DateTime::from_timestamp_millis(current).ok_or_else(|| {
                    SchedulerError::Persistence(format!("timestamp {} out of range", current))
                })?,
            }),
        }
    }
}
