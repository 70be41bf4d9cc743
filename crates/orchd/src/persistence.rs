use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use orch_core::types::{
    Epic, EpicId, ExecutionLog, LogId, LogType, QueuedMessage, RepoId, Repository, Task, TaskId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::store::{StoreError, TaskStore};

/// SQLite-backed store. Records are kept as JSON payloads next to the few
/// columns the orchestrator filters on; execution logs are plain columns.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    repo_id TEXT NOT NULL,
    epic_id TEXT,
    status_tag TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_repo ON tasks(repo_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status_tag);

CREATE TABLE IF NOT EXISTS repositories (
    repo_id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS epics (
    epic_id TEXT PRIMARY KEY,
    status_tag TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queued_messages (
    message_id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_task_status ON queued_messages(task_id, status, created_at);

CREATE TABLE IF NOT EXISTS execution_logs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    log_id TEXT NOT NULL UNIQUE,
    task_id TEXT,
    epic_id TEXT,
    content TEXT NOT NULL,
    log_type TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_task ON execution_logs(task_id, seq);
CREATE INDEX IF NOT EXISTS idx_logs_epic ON execution_logs(epic_id, seq);
"#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn payloads<T: DeserializeOwned>(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<T>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let payload = row?;
            out.push(serde_json::from_str::<T>(&payload)?);
        }
        Ok(out)
    }

    fn payload<T: DeserializeOwned>(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<T>, StoreError> {
        let payload: Option<String> = self
            .conn()?
            .query_row(sql, args, |row| row.get(0))
            .optional()?;
        payload
            .map(|value| serde_json::from_str::<T>(&value))
            .transpose()
            .map_err(StoreError::from)
    }

    fn logs(&self, sql: &str, owner: &str) -> Result<Vec<ExecutionLog>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![owner], raw_log)?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?.into_log()?);
        }
        Ok(logs)
    }
}

struct RawLog {
    log_id: String,
    task_id: Option<String>,
    epic_id: Option<String>,
    content: String,
    log_type: String,
    created_at: String,
}

fn raw_log(row: &Row<'_>) -> rusqlite::Result<RawLog> {
    Ok(RawLog {
        log_id: row.get(0)?,
        task_id: row.get(1)?,
        epic_id: row.get(2)?,
        content: row.get(3)?,
        log_type: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl RawLog {
    fn into_log(self) -> Result<ExecutionLog, StoreError> {
        Ok(ExecutionLog {
            id: LogId(self.log_id),
            task_id: self.task_id.map(TaskId),
            epic_id: self.epic_id.map(EpicId),
            content: self.content,
            log_type: parse_log_type(&self.log_type)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_log_type(value: &str) -> Result<LogType, StoreError> {
    match value {
        "stdout" => Ok(LogType::Stdout),
        "stderr" => Ok(LogType::Stderr),
        "system" => Ok(LogType::System),
        other => Err(StoreError::UnknownLogType {
            value: other.to_string(),
        }),
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| StoreError::TimestampParse {
            value: value.to_string(),
            source,
        })
}

impl TaskStore for SqliteStore {
    fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        let payload = serde_json::to_string(task)?;
        self.conn()?.execute(
            r#"
INSERT INTO tasks (task_id, repo_id, epic_id, status_tag, payload_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(task_id) DO UPDATE SET
  repo_id = excluded.repo_id,
  epic_id = excluded.epic_id,
  status_tag = excluded.status_tag,
  payload_json = excluded.payload_json,
  updated_at = excluded.updated_at
"#,
            params![
                task.id.0,
                task.repository_id.0,
                task.epic_id.as_ref().map(|id| id.0.clone()),
                task.status.as_str(),
                payload,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn task(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError> {
        self.payload(
            "SELECT payload_json FROM tasks WHERE task_id = ?1",
            &[&task_id.0],
        )
    }

    fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.payloads(
            "SELECT payload_json FROM tasks ORDER BY created_at ASC, task_id ASC",
            &[],
        )
    }

    fn delete_task(&self, task_id: &TaskId) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM queued_messages WHERE task_id = ?1",
            params![task_id.0],
        )?;
        tx.execute(
            "DELETE FROM execution_logs WHERE task_id = ?1",
            params![task_id.0],
        )?;
        let removed = tx.execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id.0])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn save_repository(&self, repository: &Repository) -> Result<(), StoreError> {
        let payload = serde_json::to_string(repository)?;
        self.conn()?.execute(
            r#"
INSERT INTO repositories (repo_id, path, payload_json)
VALUES (?1, ?2, ?3)
ON CONFLICT(repo_id) DO UPDATE SET
  path = excluded.path,
  payload_json = excluded.payload_json
"#,
            params![
                repository.id.0,
                repository.path.display().to_string(),
                payload
            ],
        )?;
        Ok(())
    }

    fn repository(&self, repo_id: &RepoId) -> Result<Option<Repository>, StoreError> {
        self.payload(
            "SELECT payload_json FROM repositories WHERE repo_id = ?1",
            &[&repo_id.0],
        )
    }

    fn list_repositories(&self) -> Result<Vec<Repository>, StoreError> {
        self.payloads(
            "SELECT payload_json FROM repositories ORDER BY repo_id ASC",
            &[],
        )
    }

    fn save_epic(&self, epic: &Epic) -> Result<(), StoreError> {
        let payload = serde_json::to_string(epic)?;
        self.conn()?.execute(
            r#"
INSERT INTO epics (epic_id, status_tag, payload_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(epic_id) DO UPDATE SET
  status_tag = excluded.status_tag,
  payload_json = excluded.payload_json,
  updated_at = excluded.updated_at
"#,
            params![
                epic.id.0,
                epic.status.as_str(),
                payload,
                epic.created_at.to_rfc3339(),
                epic.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn epic(&self, epic_id: &EpicId) -> Result<Option<Epic>, StoreError> {
        self.payload(
            "SELECT payload_json FROM epics WHERE epic_id = ?1",
            &[&epic_id.0],
        )
    }

    fn list_epics(&self) -> Result<Vec<Epic>, StoreError> {
        self.payloads(
            "SELECT payload_json FROM epics ORDER BY created_at ASC, epic_id ASC",
            &[],
        )
    }

    fn save_message(&self, message: &QueuedMessage) -> Result<(), StoreError> {
        let payload = serde_json::to_string(message)?;
        self.conn()?.execute(
            r#"
INSERT INTO queued_messages (message_id, task_id, status, created_at, payload_json)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(message_id) DO UPDATE SET
  status = excluded.status,
  payload_json = excluded.payload_json
"#,
            params![
                message.id.0,
                message.task_id.0,
                message.status.as_str(),
                message.created_at.to_rfc3339(),
                payload,
            ],
        )?;
        Ok(())
    }

    fn next_pending_message(&self, task_id: &TaskId) -> Result<Option<QueuedMessage>, StoreError> {
        self.payload(
            r#"
SELECT payload_json FROM queued_messages
WHERE task_id = ?1 AND status = 'pending'
ORDER BY created_at ASC, message_id ASC
LIMIT 1
"#,
            &[&task_id.0],
        )
    }

    fn messages_for_task(&self, task_id: &TaskId) -> Result<Vec<QueuedMessage>, StoreError> {
        self.payloads(
            "SELECT payload_json FROM queued_messages WHERE task_id = ?1 ORDER BY created_at ASC, message_id ASC",
            &[&task_id.0],
        )
    }

    fn append_log(&self, log: &ExecutionLog) -> Result<(), StoreError> {
        self.conn()?.execute(
            r#"
INSERT INTO execution_logs (log_id, task_id, epic_id, content, log_type, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
            params![
                log.id.0,
                log.task_id.as_ref().map(|id| id.0.clone()),
                log.epic_id.as_ref().map(|id| id.0.clone()),
                log.content,
                log.log_type.as_str(),
                log.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn logs_for_task(&self, task_id: &TaskId) -> Result<Vec<ExecutionLog>, StoreError> {
        self.logs(
            "SELECT log_id, task_id, epic_id, content, log_type, created_at FROM execution_logs WHERE task_id = ?1 ORDER BY seq ASC",
            &task_id.0,
        )
    }

    fn logs_for_epic(&self, epic_id: &EpicId) -> Result<Vec<ExecutionLog>, StoreError> {
        self.logs(
            "SELECT log_id, task_id, epic_id, content, log_type, created_at FROM execution_logs WHERE epic_id = ?1 ORDER BY seq ASC",
            &epic_id.0,
        )
    }
}
