//! SQLite persistence for the task queue
//!
//! Job state lives entirely in the database so a task survives the crash of
//! the process that enqueued it, and so multiple worker processes can share
//! one queue. Claiming is a compare-and-swap on the status column; exactly
//! one worker wins each task.

use crate::error::{DatabaseError, Error, Result};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, SqliteConnection};
use std::path::Path;

/// Task lifecycle states as stored in the `status` column
pub mod task_status {
    /// Durably enqueued, not yet picked up
    pub const QUEUED: i32 = 0;
    /// Claimed by a worker
    pub const RUNNING: i32 = 1;
    /// Worker returned a result
    pub const COMPLETED: i32 = 2;
    /// Worker raised an error; terminal, never retried
    pub const FAILED: i32 = 3;
}

/// Task record from the database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Caller-chosen unique id, the handle for all status queries
    pub task_id: String,
    /// Queue this task belongs to
    pub queue: String,
    /// JSON-encoded worker payload
    pub payload: String,
    /// Current status (see [`task_status`])
    pub status: i32,
    /// Most recent progress report, if any
    pub progress: Option<String>,
    /// JSON-encoded worker return value, set on completion
    pub result: Option<String>,
    /// Failure reason, set when the worker raises
    pub error: Option<String>,
    /// Unix timestamp when the task was enqueued
    pub created_at: i64,
    /// Unix timestamp of the last state change
    pub updated_at: i64,
}

/// Durable task storage backed by SQLite
#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    /// Open (or create) the task database and run migrations
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?;

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: Create the tasks table
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying task database migration v1");

        // Wrap in a transaction so partial failures don't leave a broken schema
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            sqlx::query(
                r#"
                CREATE TABLE tasks (
                    task_id TEXT PRIMARY KEY,
                    queue TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    status INTEGER NOT NULL DEFAULT 0,
                    progress TEXT,
                    result TEXT,
                    error TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
            )
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to create tasks table: {}",
                    e
                )))
            })?;

            sqlx::query("CREATE INDEX idx_tasks_queue_status ON tasks(queue, status)")
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to create tasks index: {}",
                        e
                    )))
                })?;

            let now = chrono::Utc::now().timestamp();
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, ?)")
                .bind(now)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to record migration: {}",
                        e
                    )))
                })?;

            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v1: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Task database migration v1 complete");
        Ok(())
    }

    /// Durably enqueue a task
    ///
    /// Returns once the row is written, not once the task has run. A reused
    /// `task_id` raises [`Error::DuplicateTask`].
    pub async fn enqueue(&self, queue: &str, task_id: &str, payload: &Value) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let payload_json = serde_json::to_string(payload)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, queue, payload, status, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(task_id)
        .bind(queue)
        .bind(&payload_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::DuplicateTask(task_id.to_string())
            }
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to enqueue task: {}",
                e
            ))),
        })?;

        Ok(())
    }

    /// Claim the oldest queued task, if any
    ///
    /// The claim is a status compare-and-swap, so concurrent workers on the
    /// same queue each get distinct tasks.
    pub async fn claim_next(&self, queue: &str) -> Result<Option<TaskRow>> {
        let candidate: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT * FROM tasks
            WHERE queue = ? AND status = 0
            ORDER BY created_at, task_id
            LIMIT 1
            "#,
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to select next task: {}",
                e
            )))
        })?;

        let Some(mut task) = candidate else {
            return Ok(None);
        };

        let now = chrono::Utc::now().timestamp();
        let claimed = sqlx::query(
            r#"
            UPDATE tasks SET status = 1, updated_at = ?
            WHERE task_id = ? AND status = 0
            "#,
        )
        .bind(now)
        .bind(&task.task_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim task: {}",
                e
            )))
        })?;

        if claimed.rows_affected() == 0 {
            // Another worker won the swap
            return Ok(None);
        }

        task.status = task_status::RUNNING;
        task.updated_at = now;
        Ok(Some(task))
    }

    /// Re-queue running tasks whose claim lease has expired
    ///
    /// A running task whose `updated_at` is older than `lease_secs` belongs
    /// to a worker that died after claiming it; flipping it back to queued
    /// lets the next poll pick it up again. Progress reports and state
    /// changes refresh `updated_at`, so a live task that reports within the
    /// lease keeps its claim. Terminal rows are never touched.
    pub async fn reclaim_stale(&self, queue: &str, lease_secs: i64) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let cutoff = now - lease_secs;

        let reclaimed = sqlx::query(
            r#"
            UPDATE tasks SET status = 0, updated_at = ?
            WHERE queue = ? AND status = 1 AND updated_at <= ?
            "#,
        )
        .bind(now)
        .bind(queue)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reclaim stale tasks: {}",
                e
            )))
        })?;

        Ok(reclaimed.rows_affected())
    }

    /// Overwrite the task's progress value
    pub async fn set_progress(&self, task_id: &str, progress: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE tasks SET progress = ?, updated_at = ? WHERE task_id = ?")
            .bind(progress)
            .bind(now)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update task progress: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Mark a task completed with the worker's return value
    pub async fn complete(&self, task_id: &str, result: &Value) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result_json = serde_json::to_string(result)?;

        sqlx::query("UPDATE tasks SET status = 2, result = ?, updated_at = ? WHERE task_id = ?")
            .bind(&result_json)
            .bind(now)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to complete task: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Mark a task failed; terminal, never retried
    pub async fn fail(&self, task_id: &str, error: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE tasks SET status = 3, error = ?, updated_at = ? WHERE task_id = ?")
            .bind(error)
            .bind(now)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark task failed: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Fetch a task by id
    pub async fn fetch(&self, task_id: &str) -> Result<Option<TaskRow>> {
        sqlx::query_as("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to fetch task: {}",
                    e
                )))
            })
    }

    /// Discard all still-queued tasks for a queue
    ///
    /// Running tasks are left alone; their rows stay for status queries.
    pub async fn delete_pending(&self, queue: &str) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM tasks WHERE queue = ? AND status = 0")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete pending tasks: {}",
                    e
                )))
            })?;

        Ok(deleted.rows_affected())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
