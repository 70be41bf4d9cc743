//! Record storage used by the orchestrators.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use orch_core::types::{
    Epic, EpicId, ExecutionLog, MessageStatus, QueuedMessage, RepoId, Repository, Task, TaskId,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("json serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("timestamp parse error for value '{value}': {source}")]
    TimestampParse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("unknown log type '{value}'")]
    UnknownLogType { value: String },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Persistence collaborator. Implementations must be safe to share between
/// the orchestrator and its background tasks.
pub trait TaskStore: Send + Sync {
    fn save_task(&self, task: &Task) -> Result<(), StoreError>;
    fn task(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError>;
    fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;
    /// Removes the task with its messages and logs. Returns false if absent.
    fn delete_task(&self, task_id: &TaskId) -> Result<bool, StoreError>;

    fn save_repository(&self, repository: &Repository) -> Result<(), StoreError>;
    fn repository(&self, repo_id: &RepoId) -> Result<Option<Repository>, StoreError>;
    fn list_repositories(&self) -> Result<Vec<Repository>, StoreError>;

    fn save_epic(&self, epic: &Epic) -> Result<(), StoreError>;
    fn epic(&self, epic_id: &EpicId) -> Result<Option<Epic>, StoreError>;
    fn list_epics(&self) -> Result<Vec<Epic>, StoreError>;

    fn save_message(&self, message: &QueuedMessage) -> Result<(), StoreError>;
    /// Oldest pending message for the task.
    fn next_pending_message(&self, task_id: &TaskId) -> Result<Option<QueuedMessage>, StoreError>;
    fn messages_for_task(&self, task_id: &TaskId) -> Result<Vec<QueuedMessage>, StoreError>;

    fn append_log(&self, log: &ExecutionLog) -> Result<(), StoreError>;
    fn logs_for_task(&self, task_id: &TaskId) -> Result<Vec<ExecutionLog>, StoreError>;
    fn logs_for_epic(&self, epic_id: &EpicId) -> Result<Vec<ExecutionLog>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    tasks: HashMap<TaskId, Task>,
    repositories: HashMap<RepoId, Repository>,
    epics: HashMap<EpicId, Epic>,
    messages: Vec<QueuedMessage>,
    logs: Vec<ExecutionLog>,
}

/// In-process store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryTables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

impl TaskStore for MemoryStore {
    fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        self.lock()?.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn task(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.lock()?.tasks.get(task_id).cloned())
    }

    fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let tasks = self.lock()?.tasks.values().cloned().collect();
        Ok(sorted_by(tasks, |task: &Task| (task.created_at, task.id.clone())))
    }

    fn delete_task(&self, task_id: &TaskId) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        tables.messages.retain(|message| &message.task_id != task_id);
        tables
            .logs
            .retain(|log| log.task_id.as_ref() != Some(task_id));
        Ok(tables.tasks.remove(task_id).is_some())
    }

    fn save_repository(&self, repository: &Repository) -> Result<(), StoreError> {
        self.lock()?
            .repositories
            .insert(repository.id.clone(), repository.clone());
        Ok(())
    }

    fn repository(&self, repo_id: &RepoId) -> Result<Option<Repository>, StoreError> {
        Ok(self.lock()?.repositories.get(repo_id).cloned())
    }

    fn list_repositories(&self) -> Result<Vec<Repository>, StoreError> {
        let repositories = self.lock()?.repositories.values().cloned().collect();
        Ok(sorted_by(repositories, |repo: &Repository| repo.id.clone()))
    }

    fn save_epic(&self, epic: &Epic) -> Result<(), StoreError> {
        self.lock()?.epics.insert(epic.id.clone(), epic.clone());
        Ok(())
    }

    fn epic(&self, epic_id: &EpicId) -> Result<Option<Epic>, StoreError> {
        Ok(self.lock()?.epics.get(epic_id).cloned())
    }

    fn list_epics(&self) -> Result<Vec<Epic>, StoreError> {
        let epics = self.lock()?.epics.values().cloned().collect();
        Ok(sorted_by(epics, |epic: &Epic| (epic.created_at, epic.id.clone())))
    }

    fn save_message(&self, message: &QueuedMessage) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        match tables.messages.iter().position(|row| row.id == message.id) {
            Some(index) => tables.messages[index] = message.clone(),
            None => tables.messages.push(message.clone()),
        }
        Ok(())
    }

    fn next_pending_message(&self, task_id: &TaskId) -> Result<Option<QueuedMessage>, StoreError> {
        Ok(self
            .lock()?
            .messages
            .iter()
            .filter(|message| &message.task_id == task_id)
            .filter(|message| message.status == MessageStatus::Pending)
            .min_by_key(|message| message.created_at)
            .cloned())
    }

    fn messages_for_task(&self, task_id: &TaskId) -> Result<Vec<QueuedMessage>, StoreError> {
        Ok(self
            .lock()?
            .messages
            .iter()
            .filter(|message| &message.task_id == task_id)
            .cloned()
            .collect())
    }

    fn append_log(&self, log: &ExecutionLog) -> Result<(), StoreError> {
        self.lock()?.logs.push(log.clone());
        Ok(())
    }

    fn logs_for_task(&self, task_id: &TaskId) -> Result<Vec<ExecutionLog>, StoreError> {
        Ok(self
            .lock()?
            .logs
            .iter()
            .filter(|log| log.task_id.as_ref() == Some(task_id))
            .cloned()
            .collect())
    }

    fn logs_for_epic(&self, epic_id: &EpicId) -> Result<Vec<ExecutionLog>, StoreError> {
        Ok(self
            .lock()?
            .logs
            .iter()
            .filter(|log| log.epic_id.as_ref() == Some(epic_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use orch_core::types::{
        ExecutionLog, ExecutorKind, LogType, MessageStatus, QueuedMessage, RepoId, Task, TaskId,
    };

    use super::{MemoryStore, TaskStore};

    fn task(id: &str) -> Task {
        Task::new(
            TaskId::new(id),
            RepoId::new("R1"),
            "title",
            ExecutorKind::ClaudeCode,
            "feature/x",
            "main",
        )
    }

    #[test]
    fn pending_messages_come_out_oldest_first() {
        let store = MemoryStore::new();
        let task_id = TaskId::new("T1");
        let mut newer = QueuedMessage::pending(task_id.clone(), "second");
        let mut older = QueuedMessage::pending(task_id.clone(), "first");
        older.created_at = Utc::now() - Duration::seconds(10);
        newer.created_at = Utc::now();
        store.save_message(&newer).expect("save");
        store.save_message(&older).expect("save");

        let next = store
            .next_pending_message(&task_id)
            .expect("query")
            .expect("pending");
        assert_eq!(next.content, "first");

        older.mark_delivered(Utc::now());
        store.save_message(&older).expect("update");
        let next = store
            .next_pending_message(&task_id)
            .expect("query")
            .expect("pending");
        assert_eq!(next.content, "second");
        assert_eq!(store.messages_for_task(&task_id).expect("list").len(), 2);
        assert!(store
            .messages_for_task(&task_id)
            .expect("list")
            .iter()
            .any(|message| message.status == MessageStatus::Delivered));
    }

    #[test]
    fn delete_task_drops_its_messages_and_logs() {
        let store = MemoryStore::new();
        let doomed = task("T1");
        store.save_task(&doomed).expect("save");
        store.save_task(&task("T2")).expect("save");
        store
            .save_message(&QueuedMessage::pending(doomed.id.clone(), "hi"))
            .expect("save message");
        store
            .append_log(&ExecutionLog::for_task(doomed.id.clone(), LogType::Stdout, "out"))
            .expect("append log");

        assert!(store.delete_task(&doomed.id).expect("delete"));
        assert!(!store.delete_task(&doomed.id).expect("delete again"));
        assert!(store.task(&doomed.id).expect("load").is_none());
        assert!(store.logs_for_task(&doomed.id).expect("logs").is_empty());
        assert!(store
            .next_pending_message(&doomed.id)
            .expect("query")
            .is_none());
        assert_eq!(store.list_tasks().expect("list").len(), 1);
    }
}
