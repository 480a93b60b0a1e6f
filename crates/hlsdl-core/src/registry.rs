//! Persistent task registry (SQLite via sqlx), grounded on `resume_db`'s
//! job table: the CLI's `add`/`run`/`status`/`list` subcommands are
//! separate process invocations, so a task's identity and terminal state
//! must outlive the `TaskManager`, which only exists for the lifetime of
//! one `run`/`run-all` invocation.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::task::{Priority, TaskStatus};

pub type TaskId = i64;

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: TaskId,
    pub name: String,
    pub source_playlist_url: String,
    pub output_path: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

fn priority_as_str(p: Priority) -> &'static str {
    match p {
        Priority::Low => "low",
        Priority::Normal => "normal",
        Priority::High => "high",
    }
}

fn priority_from_str(s: &str) -> Priority {
    match s {
        "low" => Priority::Low,
        "high" => Priority::High,
        _ => Priority::Normal,
    }
}

fn status_as_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Canceled => "canceled",
    }
}

fn status_from_str(s: &str) -> TaskStatus {
    match s {
        "running" => TaskStatus::Running,
        "paused" => TaskStatus::Paused,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "canceled" => TaskStatus::Canceled,
        _ => TaskStatus::Pending,
    }
}

/// Handle to the SQLite-backed task database, stored under the XDG state
/// directory (`~/.local/state/hlsdl/tasks.db`), mirroring `resume_db`'s
/// `~/.local/state/ddm/jobs.db` layout.
#[derive(Clone)]
pub struct TaskRegistry {
    pool: Pool<Sqlite>,
}

impl TaskRegistry {
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("hlsdl")?;
        let state_dir = xdg_dirs.get_state_home();
        let db_path = state_dir.join("tasks.db");
        tokio::fs::create_dir_all(&state_dir).await?;

        let uri = format!("sqlite://{}", db_path.display());
        let pool = SqlitePoolOptions::new().max_connections(8).connect(&uri).await?;

        let registry = Self { pool };
        registry.migrate().await?;
        Ok(registry)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                source_playlist_url TEXT NOT NULL,
                output_path TEXT NOT NULL,
                priority TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_task(
        &self,
        source_playlist_url: &str,
        output_path: &str,
        priority: Priority,
    ) -> Result<TaskId> {
        let now = unix_timestamp();
        let name = output_path
            .rsplit('/')
            .next()
            .unwrap_or(output_path)
            .to_string();
        let id = sqlx::query(
            r#"
            INSERT INTO tasks (name, source_playlist_url, output_path, priority, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(&name)
        .bind(source_playlist_url)
        .bind(output_path)
        .bind(priority_as_str(priority))
        .bind(status_as_str(TaskStatus::Pending))
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<TaskRow>> {
        let row = sqlx::query(
            "SELECT id, name, source_playlist_url, output_path, priority, status, created_at, updated_at FROM tasks WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_task))
    }

    pub async fn list(&self) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query(
            "SELECT id, name, source_playlist_url, output_path, priority, status, created_at, updated_at FROM tasks ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_task).collect())
    }

    pub async fn list_pending(&self) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query(
            "SELECT id, name, source_playlist_url, output_path, priority, status, created_at, updated_at FROM tasks WHERE status = 'pending' ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_task).collect())
    }

    pub async fn set_status(&self, id: TaskId, status: TaskStatus) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query("UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status_as_str(status))
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?1").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_task(row: sqlx::sqlite::SqliteRow) -> TaskRow {
    TaskRow {
        id: row.get("id"),
        name: row.get("name"),
        source_playlist_url: row.get("source_playlist_url"),
        output_path: row.get("output_path"),
        priority: priority_from_str(&row.get::<String, _>("priority")),
        status: status_from_str(&row.get::<String, _>("status")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_memory() -> Result<TaskRegistry> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?;
        let registry = TaskRegistry { pool };
        registry.migrate().await?;
        Ok(registry)
    }

    #[tokio::test]
    async fn add_then_list_roundtrips() {
        let registry = open_memory().await.unwrap();
        let id = registry
            .add_task("https://e.com/a.m3u8", "/tmp/a.mp4", Priority::Normal)
            .await
            .unwrap();
        let tasks = registry.list().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, id);
        assert_eq!(tasks[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn set_status_then_not_pending() {
        let registry = open_memory().await.unwrap();
        let id = registry
            .add_task("https://e.com/a.m3u8", "/tmp/a.mp4", Priority::Normal)
            .await
            .unwrap();
        registry.set_status(id, TaskStatus::Completed).await.unwrap();
        assert!(registry.list_pending().await.unwrap().is_empty());
        let row = registry.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn remove_drops_row() {
        let registry = open_memory().await.unwrap();
        let id = registry
            .add_task("https://e.com/a.m3u8", "/tmp/a.mp4", Priority::Normal)
            .await
            .unwrap();
        registry.remove(id).await.unwrap();
        assert!(registry.get(id).await.unwrap().is_none());
    }
}
