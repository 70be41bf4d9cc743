//! Task orchestration: worktree setup, executor lifecycle and the queued
//! message loop that runs after every agent turn.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use orch_agents::{ExecutorConfig, ExecutorEvent, ExecutorRun};
use orch_core::events::EventKind;
use orch_core::state::TaskStatus;
use orch_core::types::{
    ExecutionLog, ExecutorKind, MessageStatus, QueuedMessage, RepoId, Repository, Task, TaskId,
};
use orch_git::{
    available_worktree_path, create_branch_worktree, delete_branch, delete_worktree, get_diff,
    prune_worktrees,
};
use orch_scripts::{copy_files_best_effort, ScriptKind};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::context::Collaborators;
use crate::error::OrchestratorError;
use crate::registry::{ExecutorRegistry, KeyedLocks};
use crate::state_machine::{transition, TaskOperation};

/// Fields a caller supplies to create a task. The base branch defaults to
/// the repository's default branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub repository_id: RepoId,
    pub title: String,
    pub description: Option<String>,
    pub executor_kind: ExecutorKind,
    pub branch_name: String,
    pub base_branch: Option<String>,
}

struct Inner {
    ctx: Collaborators,
    live: ExecutorRegistry<TaskId>,
    locks: KeyedLocks<TaskId>,
    /// Lifecycle scripts and post-finish cleanup.
    background: TaskTracker,
    /// One driver per started run, consuming its events.
    runs: TaskTracker,
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

impl TaskOrchestrator {
    pub fn new(ctx: Collaborators) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                live: ExecutorRegistry::new(),
                locks: KeyedLocks::new(),
                background: TaskTracker::new(),
                runs: TaskTracker::new(),
            }),
        }
    }

    fn ctx(&self) -> &Collaborators {
        &self.inner.ctx
    }

    pub fn create_task(&self, new: NewTask) -> Result<Task, OrchestratorError> {
        let repository = self.repository(&new.repository_id)?;
        let base = new
            .base_branch
            .filter(|branch| !branch.trim().is_empty())
            .unwrap_or_else(|| repository.default_branch.clone());

        let mut task = Task::new(
            TaskId::generate(),
            repository.id,
            new.title,
            new.executor_kind,
            new.branch_name,
            base,
        );
        task.description = new.description.filter(|text| !text.trim().is_empty());
        self.ctx().store.save_task(&task)?;
        info!(task_id = %task.id, branch = %task.branch_name, "task created");
        Ok(task)
    }

    pub fn get_task(&self, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        self.ctx()
            .store
            .task(task_id)?
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>, OrchestratorError> {
        Ok(self.ctx().store.list_tasks()?)
    }

    pub fn task_logs(&self, task_id: &TaskId) -> Result<Vec<ExecutionLog>, OrchestratorError> {
        Ok(self.ctx().store.logs_for_task(task_id)?)
    }

    pub fn task_messages(&self, task_id: &TaskId) -> Result<Vec<QueuedMessage>, OrchestratorError> {
        Ok(self.ctx().store.messages_for_task(task_id)?)
    }

    pub fn is_executing(&self, task_id: &TaskId) -> bool {
        self.inner.live.contains(task_id)
    }

    /// TODO -> IN_PROGRESS: branch, worktree, hooks, then the first agent turn.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn start(&self, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        let _guard = self.inner.locks.lock(task_id).await;
        let mut task = self.get_task(task_id)?;
        if !TaskOperation::Start.permits(task.status) {
            return Err(OrchestratorError::invalid_transition(
                task_id.to_string(),
                TaskOperation::Start,
                task.status,
            ));
        }
        self.ctx().ensure_enabled(task.executor_kind)?;
        let repository = self.repository(&task.repository_id)?;

        let worktree = available_worktree_path(
            &self.ctx().settings.worktree_root(&repository.path),
            &task.branch_name,
            task.id.0.as_str(),
        );
        create_branch_worktree(
            &repository.path,
            &task.branch_name,
            Some(task.base_branch.as_str()),
            &worktree,
            &self.ctx().git,
        )?;
        info!(worktree = %worktree.display(), branch = %task.branch_name, "worktree ready");

        copy_files_best_effort(&repository.path, &worktree, repository.copy_files.as_deref());
        self.spawn_hooks(
            worktree.clone(),
            vec![
                (ScriptKind::Setup, repository.setup_script.clone()),
                (ScriptKind::Start, repository.start_script.clone()),
            ],
        );

        task.worktree_path = Some(worktree);
        self.move_task(&mut task, TaskStatus::InProgress)?;

        let prompt = task.initial_prompt();
        let (run_id, run) = self.launch(&task, prompt).await?;
        self.spawn_driver(task.id.clone(), run_id, run);
        Ok(task)
    }

    /// Stop the live agent while keeping the task and its worktree in progress.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn pause(&self, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        let _guard = self.inner.locks.lock(task_id).await;
        let mut task = self.get_task(task_id)?;
        if !TaskOperation::Pause.permits(task.status) {
            return Err(OrchestratorError::invalid_transition(
                task_id.to_string(),
                TaskOperation::Pause,
                task.status,
            ));
        }

        if self.stop_live(task_id).await {
            self.ctx().task_system_log(task_id, "agent paused");
        }
        task.updated_at = Utc::now();
        self.ctx().store.save_task(&task)?;
        Ok(task)
    }

    /// Start a fresh agent turn on the existing worktree, continuing the
    /// stored session. `message` overrides the task prompt.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn resume(
        &self,
        task_id: &TaskId,
        message: Option<String>,
    ) -> Result<Task, OrchestratorError> {
        let _guard = self.inner.locks.lock(task_id).await;
        let mut task = self.get_task(task_id)?;
        if !TaskOperation::Resume.permits(task.status) {
            return Err(OrchestratorError::invalid_transition(
                task_id.to_string(),
                TaskOperation::Resume,
                task.status,
            ));
        }
        self.ctx().ensure_enabled(task.executor_kind)?;
        let worktree = self.existing_worktree(&task)?;

        self.stop_live(task_id).await;
        let repository = self.repository(&task.repository_id)?;
        self.spawn_hooks(
            worktree,
            vec![(ScriptKind::Start, repository.start_script.clone())],
        );

        let prompt = message
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| task.initial_prompt());
        let (run_id, run) = self.launch(&task, prompt).await?;
        if task.status == TaskStatus::InReview {
            self.move_task(&mut task, TaskStatus::InProgress)?;
        }
        self.spawn_driver(task.id.clone(), run_id, run);
        Ok(task)
    }

    /// IN_REVIEW -> DONE. The worktree path is cleared immediately; the
    /// cleanup hook, worktree removal and branch deletion run afterwards.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn finish(&self, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        let _guard = self.inner.locks.lock(task_id).await;
        let mut task = self.get_task(task_id)?;
        if !TaskOperation::Finish.permits(task.status) {
            return Err(OrchestratorError::invalid_transition(
                task_id.to_string(),
                TaskOperation::Finish,
                task.status,
            ));
        }

        self.stop_live(task_id).await;
        let worktree = task.worktree_path.clone();
        self.move_task(&mut task, TaskStatus::Done)?;

        match self.repository(&task.repository_id) {
            Ok(repository) => self.spawn_cleanup(repository, worktree, Some(task.branch_name.clone())),
            Err(err) => warn!(error = %err, "skipping cleanup"),
        }
        Ok(task)
    }

    /// Queue a follow-up instruction. An idle task in review gets it right
    /// away; otherwise it waits for the current turn to end.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn queue_message(
        &self,
        task_id: &TaskId,
        content: &str,
    ) -> Result<QueuedMessage, OrchestratorError> {
        if content.trim().is_empty() {
            return Err(OrchestratorError::EmptyMessage);
        }

        let _guard = self.inner.locks.lock(task_id).await;
        let mut task = self.get_task(task_id)?;
        if !TaskOperation::QueueMessage.permits(task.status) {
            return Err(OrchestratorError::invalid_transition(
                task_id.to_string(),
                TaskOperation::QueueMessage,
                task.status,
            ));
        }

        let message = QueuedMessage::pending(task.id.clone(), content);
        self.ctx().store.save_message(&message)?;
        self.ctx().task_event(
            task_id,
            EventKind::MessageQueued {
                message_id: message.id.clone(),
            },
        );

        if task.status == TaskStatus::InReview && !self.is_executing(task_id) {
            debug!("task is idle in review, delivering now");
            let (message, run_id, run) = self.deliver(&mut task, message).await?;
            self.spawn_driver(task.id.clone(), run_id, run);
            return Ok(message);
        }
        Ok(message)
    }

    /// Remove a task with its messages and logs. A live agent is stopped and
    /// the worktree is removed in the background; the branch is kept.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn delete_task(&self, task_id: &TaskId) -> Result<(), OrchestratorError> {
        let guard = self.inner.locks.lock(task_id).await;
        let task = self.get_task(task_id)?;
        self.stop_live(task_id).await;

        if task.worktree_path.is_some() {
            match self.repository(&task.repository_id) {
                Ok(repository) => self.spawn_cleanup(repository, task.worktree_path.clone(), None),
                Err(err) => warn!(error = %err, "skipping worktree removal"),
            }
        }
        self.ctx().store.delete_task(task_id)?;
        drop(guard);
        self.inner.locks.forget(task_id);
        info!("task deleted");
        Ok(())
    }

    /// Diff of the task branch against its base, including uncommitted and
    /// untracked work while the worktree exists.
    pub fn task_diff(&self, task_id: &TaskId) -> Result<String, OrchestratorError> {
        let task = self.get_task(task_id)?;
        let repository = self.repository(&task.repository_id)?;
        Ok(get_diff(
            &repository.path,
            &task.base_branch,
            &task.branch_name,
            task.worktree_path.as_deref(),
            &self.ctx().git,
        )?)
    }

    /// Wait for lifecycle scripts and cleanup started so far.
    pub async fn wait_background(&self) {
        self.inner.background.close();
        self.inner.background.wait().await;
        self.inner.background.reopen();
    }

    /// Stop every live agent and wait for all background work.
    pub async fn shutdown(&self) {
        for (task_id, live) in self.inner.live.drain() {
            live.executor.stop().await;
            self.ctx().task_event(&task_id, EventKind::ExecutorStopped { run_id: live.run_id });
        }
        self.wait_background().await;
        self.inner.runs.close();
        self.inner.runs.wait().await;
        self.inner.runs.reopen();
    }

    fn repository(&self, repo_id: &RepoId) -> Result<Repository, OrchestratorError> {
        self.ctx()
            .store
            .repository(repo_id)?
            .ok_or_else(|| OrchestratorError::RepositoryNotFound {
                repo_id: repo_id.to_string(),
            })
    }

    fn existing_worktree(&self, task: &Task) -> Result<PathBuf, OrchestratorError> {
        task.worktree_path
            .clone()
            .filter(|path| path.exists())
            .ok_or_else(|| OrchestratorError::MissingWorktree {
                id: task.id.to_string(),
            })
    }

    fn move_task(&self, task: &mut Task, to: TaskStatus) -> Result<(), OrchestratorError> {
        let step = transition(task, to, Utc::now())?;
        self.ctx().store.save_task(task)?;
        if step.changed() {
            info!(task_id = %task.id, from = %step.from, to = %step.to, "task status changed");
            self.ctx().task_event(
                &task.id,
                EventKind::TaskStatusChanged {
                    from: step.from,
                    to: step.to,
                },
            );
        }
        Ok(())
    }

    async fn stop_live(&self, task_id: &TaskId) -> bool {
        let Some(live) = self.inner.live.take(task_id) else {
            return false;
        };
        live.executor.stop().await;
        debug!(%task_id, run_id = live.run_id, "executor stopped");
        self.ctx()
            .task_event(task_id, EventKind::ExecutorStopped { run_id: live.run_id });
        true
    }

    /// Replace any live executor for the task with a new one running `prompt`.
    async fn launch(
        &self,
        task: &Task,
        prompt: String,
    ) -> Result<(u64, ExecutorRun), OrchestratorError> {
        let worktree =
            task.worktree_path
                .clone()
                .ok_or_else(|| OrchestratorError::MissingWorktree {
                    id: task.id.to_string(),
                })?;
        self.stop_live(&task.id).await;

        let executor = self.ctx().create_executor(task.executor_kind)?;
        let config = ExecutorConfig::new(task.id.0.as_str(), worktree, prompt)
            .resuming(task.session_id.clone());
        let run = executor.start(config).await?;

        let (run_id, _) = self.inner.live.insert(task.id.clone(), executor);
        info!(task_id = %task.id, run_id, kind = %task.executor_kind, "executor started");
        self.ctx().task_event(
            &task.id,
            EventKind::ExecutorStarted {
                kind: task.executor_kind,
                run_id,
            },
        );
        Ok((run_id, run))
    }

    /// Start a turn for `message`. On failure the message is marked failed
    /// and the task status is left alone.
    async fn deliver(
        &self,
        task: &mut Task,
        mut message: QueuedMessage,
    ) -> Result<(QueuedMessage, u64, ExecutorRun), OrchestratorError> {
        let launched = match self.ctx().ensure_enabled(task.executor_kind) {
            Ok(()) => self.launch(task, message.content.clone()).await,
            Err(err) => Err(err),
        };
        let (run_id, run) = match launched {
            Ok(started) => started,
            Err(err) => {
                message.status = MessageStatus::Failed;
                self.ctx().store.save_message(&message)?;
                self.ctx().task_event(
                    &task.id,
                    EventKind::MessageFailed {
                        message_id: message.id.clone(),
                        reason: err.to_string(),
                    },
                );
                return Err(err);
            }
        };

        message.mark_delivered(Utc::now());
        self.ctx().store.save_message(&message)?;
        self.ctx().task_event(
            &task.id,
            EventKind::MessageDelivered {
                message_id: message.id.clone(),
            },
        );
        if task.status == TaskStatus::InReview {
            self.move_task(task, TaskStatus::InProgress)?;
        }
        Ok((message, run_id, run))
    }

    fn spawn_driver(&self, task_id: TaskId, run_id: u64, run: ExecutorRun) {
        self.inner.runs.spawn(self.clone().drive(task_id, run_id, run));
    }

    /// Consume a run's events. A restart for a queued message continues in
    /// the same loop with the new run.
    async fn drive(self, task_id: TaskId, mut run_id: u64, mut run: ExecutorRun) {
        while let Some(event) = run.next_event().await {
            match event {
                ExecutorEvent::Output(output) => self.ctx().record_task_output(&task_id, output),
                ExecutorEvent::SessionId(session_id) => {
                    if let Err(err) = self.capture_session(&task_id, run_id, session_id).await {
                        warn!(%task_id, error = %err, "failed to store session id");
                    }
                }
                ExecutorEvent::Exited(code) => match self.on_exit(&task_id, run_id, code).await {
                    Ok(Some((next_run_id, next_run))) => {
                        run_id = next_run_id;
                        run = next_run;
                    }
                    Ok(None) => return,
                    Err(err) => {
                        warn!(%task_id, error = %err, "exit handling failed");
                        return;
                    }
                },
            }
        }
        debug!(%task_id, run_id, "run closed without exit");
    }

    async fn capture_session(
        &self,
        task_id: &TaskId,
        run_id: u64,
        session_id: String,
    ) -> Result<(), OrchestratorError> {
        let _guard = self.inner.locks.lock(task_id).await;
        if !self.inner.live.is_current(task_id, run_id) {
            return Ok(());
        }
        let Some(mut task) = self.ctx().store.task(task_id)? else {
            return Ok(());
        };
        if task.session_id.as_deref() == Some(session_id.as_str()) {
            return Ok(());
        }

        task.session_id = Some(session_id.clone());
        task.updated_at = Utc::now();
        self.ctx().store.save_task(&task)?;
        debug!(%task_id, %session_id, "session captured");
        self.ctx()
            .task_event(task_id, EventKind::SessionCaptured { session_id });
        Ok(())
    }

    /// Either restart with the oldest pending message or hand the task over
    /// for review; never both.
    async fn on_exit(
        &self,
        task_id: &TaskId,
        run_id: u64,
        code: i32,
    ) -> Result<Option<(u64, ExecutorRun)>, OrchestratorError> {
        let _guard = self.inner.locks.lock(task_id).await;
        if !self.inner.live.remove_run(task_id, run_id) {
            debug!(%task_id, run_id, "ignoring exit from a replaced run");
            return Ok(None);
        }
        self.ctx()
            .task_event(task_id, EventKind::ExecutorStopped { run_id });
        self.ctx()
            .task_system_log(task_id, format!("agent exited with code {code}"));

        let Some(mut task) = self.ctx().store.task(task_id)? else {
            return Ok(None);
        };
        if task.status != TaskStatus::InProgress {
            return Ok(None);
        }

        if let Some(message) = self.ctx().store.next_pending_message(task_id)? {
            match self.deliver(&mut task, message).await {
                Ok((message, next_run_id, run)) => {
                    info!(%task_id, message_id = %message.id, "delivered queued message");
                    return Ok(Some((next_run_id, run)));
                }
                Err(err) => warn!(%task_id, error = %err, "queued message could not be delivered"),
            }
        }

        self.complete_turn(&mut task).await?;
        Ok(None)
    }

    async fn complete_turn(&self, task: &mut Task) -> Result<(), OrchestratorError> {
        if let (Some(worktree), Ok(repository)) = (
            task.worktree_path.as_deref(),
            self.repository(&task.repository_id),
        ) {
            self.ctx()
                .scripts
                .run_hook(ScriptKind::Stop, worktree, repository.stop_script.as_deref())
                .await;
        }
        self.move_task(task, TaskStatus::InReview)?;
        self.ctx().task_system_log(&task.id, "task ready for review");
        Ok(())
    }

    fn spawn_hooks(&self, cwd: PathBuf, hooks: Vec<(ScriptKind, Option<String>)>) {
        let scripts = self.ctx().scripts.clone();
        self.inner.background.spawn(async move {
            for (kind, script) in hooks {
                scripts.run_hook(kind, &cwd, script.as_deref()).await;
            }
        });
    }

    /// Best-effort teardown; every failure is logged.
    fn spawn_cleanup(&self, repository: Repository, worktree: Option<PathBuf>, branch: Option<String>) {
        let ctx = self.ctx().clone();
        self.inner.background.spawn(async move {
            if let Some(worktree) = worktree.as_deref().filter(|path| path.exists()) {
                ctx.scripts
                    .run_hook(
                        ScriptKind::Cleanup,
                        worktree,
                        repository.cleanup_script.as_deref(),
                    )
                    .await;
                if let Err(err) = delete_worktree(&repository.path, worktree, true, &ctx.git) {
                    warn!(worktree = %worktree.display(), error = %err, "failed to remove worktree");
                }
            }
            if let Err(err) = prune_worktrees(&repository.path, &ctx.git) {
                debug!(error = %err, "worktree prune failed");
            }
            if let Some(branch) = branch {
                if let Err(err) = delete_branch(&repository.path, &branch, true, &ctx.git) {
                    warn!(%branch, error = %err, "failed to delete branch");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use orch_core::config::OrchConfig;
    use orch_core::state::TaskStatus;
    use orch_core::types::{
        ExecutorKind, LogType, MessageStatus, RepoId, Repository, Task, TaskId,
    };
    use orch_git::test_support::init_repo;
    use orch_git::{branch_exists, GitCli};
    use orch_notify::MemorySink;

    use super::{NewTask, TaskOrchestrator};
    use crate::context::Collaborators;
    use crate::error::OrchestratorError;
    use crate::store::{MemoryStore, TaskStore};
    use crate::test_support::{wait_until, ScriptedFactory};

    struct Harness {
        orch: TaskOrchestrator,
        store: Arc<MemoryStore>,
        events: Arc<MemorySink>,
        factory: Arc<ScriptedFactory>,
        repo_path: PathBuf,
    }

    impl Harness {
        fn new(prefix: &str) -> Self {
            Self::with_config(prefix, OrchConfig::default(), |_| {})
        }

        fn with_config(prefix: &str, config: OrchConfig, edit: impl FnOnce(&mut Repository)) -> Self {
            let repo_path = init_repo(prefix);
            let store = Arc::new(MemoryStore::new());
            let mut repository = Repository::new(RepoId::new("R1"), &repo_path, "main");
            edit(&mut repository);
            store.save_repository(&repository).expect("save repository");

            let events = Arc::new(MemorySink::new());
            let factory = ScriptedFactory::new();
            let ctx = Collaborators::new(
                store.clone(),
                Arc::new(config),
                factory.clone(),
                events.clone(),
            );
            Self {
                orch: TaskOrchestrator::new(ctx),
                store,
                events,
                factory,
                repo_path,
            }
        }

        fn create(&self, branch: &str) -> Task {
            self.orch
                .create_task(NewTask {
                    repository_id: RepoId::new("R1"),
                    title: "Add feature".to_string(),
                    description: Some("Implement feature x".to_string()),
                    executor_kind: ExecutorKind::ClaudeCode,
                    branch_name: branch.to_string(),
                    base_branch: Some("main".to_string()),
                })
                .expect("create task")
        }

        fn task(&self, id: &TaskId) -> Task {
            self.orch.get_task(id).expect("load task")
        }

        async fn wait_for_status(&self, id: &TaskId, status: TaskStatus) {
            wait_until(status.as_str(), || self.task(id).status == status).await;
        }

        /// Start a task and let its first turn end, leaving it idle in review.
        async fn started_in_review(&self, branch: &str) -> Task {
            let task = self.create(branch);
            self.orch.start(&task.id).await.expect("start");
            self.factory.last_run().exit(0);
            self.wait_for_status(&task.id, TaskStatus::InReview).await;
            wait_until("executor deregistered", || !self.orch.is_executing(&task.id)).await;
            self.task(&task.id)
        }
    }

    fn git() -> GitCli {
        GitCli::default()
    }

    #[tokio::test]
    async fn start_creates_branch_worktree_and_executor() {
        let h = Harness::new("orch-start");
        let task = h.create("feature/x");

        let started = h.orch.start(&task.id).await.expect("start");
        assert_eq!(started.status, TaskStatus::InProgress);
        assert!(started.started_at.is_some());
        assert!(branch_exists(&h.repo_path, "feature/x", &git()).expect("branch lookup"));
        let worktree = started.worktree_path.clone().expect("worktree path");
        assert!(worktree.ends_with("feature-x"));
        assert!(worktree.join("README.md").exists());
        assert!(h.orch.is_executing(&task.id));

        let run = h.factory.last_run();
        assert_eq!(run.config.prompt, "Implement feature x");
        assert_eq!(run.config.working_directory, worktree);
        assert_eq!(run.config.session_id, None);

        let err = h.orch.finish(&task.id).await.expect_err("finish from in progress");
        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                current: TaskStatus::InProgress,
                ..
            }
        ));

        run.exit(0);
        h.wait_for_status(&task.id, TaskStatus::InReview).await;
        let done = h.orch.finish(&task.id).await.expect("finish");
        assert_eq!(done.status, TaskStatus::Done);
        assert!(done.worktree_path.is_none());

        h.orch.wait_background().await;
        assert!(!worktree.exists());
        assert!(!branch_exists(&h.repo_path, "feature/x", &git()).expect("branch lookup"));
    }

    #[tokio::test]
    async fn start_on_a_started_task_has_no_side_effects() {
        let h = Harness::new("orch-start-guard");
        let mut task = h.create("feature/guard");
        task.status = TaskStatus::InReview;
        h.store.save_task(&task).expect("save");

        let err = h.orch.start(&task.id).await.expect_err("rejected");
        assert_eq!(
            err.to_string(),
            format!("cannot start {}: status is IN_REVIEW, expected TODO", task.id)
        );
        assert!(!branch_exists(&h.repo_path, "feature/guard", &git()).expect("branch lookup"));
        assert!(!h.repo_path.join(".orch/wt/feature-guard").exists());
        assert_eq!(h.factory.created(), 0);
        assert!(!h.orch.is_executing(&task.id));
    }

    #[tokio::test]
    async fn start_can_be_retried_after_worktree_creation_fails() {
        let h = Harness::new("orch-start-retry");
        let task = h.create("feature/x");
        let worktree_root = h.repo_path.join(".orch").join("wt");
        std::fs::create_dir_all(h.repo_path.join(".orch")).expect("mkdir");
        std::fs::write(&worktree_root, "not a directory\n").expect("obstacle");

        let err = h.orch.start(&task.id).await.expect_err("worktree root is a file");
        assert!(matches!(err, OrchestratorError::Git(_)));
        assert!(!branch_exists(&h.repo_path, "feature/x", &git()).expect("branch lookup"));
        assert_eq!(h.task(&task.id).status, TaskStatus::Todo);
        assert_eq!(h.factory.created(), 0);

        std::fs::remove_file(&worktree_root).expect("clear obstacle");
        let started = h.orch.start(&task.id).await.expect("retry");
        assert_eq!(started.status, TaskStatus::InProgress);
        assert!(started
            .worktree_path
            .expect("worktree path")
            .join("README.md")
            .exists());
        h.orch.shutdown().await;
    }

    #[tokio::test]
    async fn branches_flattening_to_one_directory_get_separate_worktrees() {
        let h = Harness::new("orch-start-collide");
        let first = h.create("feature/x");
        let second = h.create("feature-x");

        let first = h.orch.start(&first.id).await.expect("start first");
        let second = h.orch.start(&second.id).await.expect("start second");
        let first_dir = first.worktree_path.expect("first worktree");
        let second_dir = second.worktree_path.expect("second worktree");
        assert!(first_dir.ends_with("feature-x"));
        assert_ne!(first_dir, second_dir);
        assert!(second_dir.join("README.md").exists());
        h.orch.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_agent_is_rejected_before_any_git_work() {
        let mut config = OrchConfig::default();
        config.agents.get_mut(ExecutorKind::ClaudeCode).enabled = false;
        let h = Harness::with_config("orch-disabled", config, |_| {});
        let task = h.create("feature/off");

        let err = h.orch.start(&task.id).await.expect_err("disabled");
        assert!(matches!(
            err,
            OrchestratorError::AgentDisabled {
                kind: ExecutorKind::ClaudeCode
            }
        ));
        assert_eq!(h.task(&task.id).status, TaskStatus::Todo);
        assert!(!branch_exists(&h.repo_path, "feature/off", &git()).expect("branch lookup"));
    }

    #[tokio::test]
    async fn output_and_session_are_recorded() {
        let h = Harness::new("orch-output");
        let task = h.create("feature/out");
        h.orch.start(&task.id).await.expect("start");

        let run = h.factory.last_run();
        run.output("hello from agent");
        run.session("sess-1");
        wait_until("session stored", || {
            h.task(&task.id).session_id.as_deref() == Some("sess-1")
        })
        .await;

        let logs = h.orch.task_logs(&task.id).expect("logs");
        assert!(logs
            .iter()
            .any(|log| log.log_type == LogType::Stdout && log.content == "hello from agent"));
        assert!(!h.events.events_of("execution_log").is_empty());
        assert_eq!(h.events.events_of("session_captured").len(), 1);
    }

    #[tokio::test]
    async fn pause_then_resume_continues_the_session() {
        let h = Harness::new("orch-pause");
        let task = h.create("feature/pause");
        h.orch.start(&task.id).await.expect("start");
        let first = h.factory.last_run();
        first.session("sess-42");
        wait_until("session stored", || h.task(&task.id).session_id.is_some()).await;

        let paused = h.orch.pause(&task.id).await.expect("pause");
        assert_eq!(paused.status, TaskStatus::InProgress);
        assert!(paused.worktree_path.is_some());
        assert!(first.was_stopped());
        assert!(!h.orch.is_executing(&task.id));

        let resumed = h.orch.resume(&task.id, None).await.expect("resume");
        assert_eq!(resumed.status, TaskStatus::InProgress);
        assert_eq!(h.factory.run_count(), 2);
        let second = h.factory.last_run();
        assert_eq!(second.config.session_id.as_deref(), Some("sess-42"));
        assert_eq!(second.config.prompt, "Implement feature x");
        assert!(h.orch.is_executing(&task.id));
    }

    #[tokio::test]
    async fn pause_requires_in_progress() {
        let h = Harness::new("orch-pause-guard");
        let task = h.create("feature/p");
        let err = h.orch.pause(&task.id).await.expect_err("todo");
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn resume_from_review_uses_message_and_returns_to_progress() {
        let h = Harness::new("orch-resume-review");
        let task = h.started_in_review("feature/review").await;

        let resumed = h
            .orch
            .resume(&task.id, Some("fix the tests".to_string()))
            .await
            .expect("resume");
        assert_eq!(resumed.status, TaskStatus::InProgress);
        assert_eq!(h.factory.last_run().config.prompt, "fix the tests");
    }

    #[tokio::test]
    async fn resume_without_worktree_is_rejected() {
        let h = Harness::new("orch-resume-wt");
        let mut task = h.create("feature/gone");
        task.status = TaskStatus::InReview;
        h.store.save_task(&task).expect("save");

        let err = h.orch.resume(&task.id, None).await.expect_err("no worktree");
        assert!(matches!(err, OrchestratorError::MissingWorktree { .. }));
        assert_eq!(h.factory.created(), 0);
    }

    #[tokio::test]
    async fn exit_delivers_pending_message_instead_of_review() {
        let h = Harness::new("orch-queue");
        let task = h.create("feature/queue");
        h.orch.start(&task.id).await.expect("start");

        let queued = h
            .orch
            .queue_message(&task.id, "also update docs")
            .await
            .expect("queue");
        assert_eq!(queued.status, MessageStatus::Pending);
        assert_eq!(h.factory.run_count(), 1);

        h.factory.run(0).exit(0);
        h.factory.wait_for_runs(2).await;
        let second = h.factory.last_run();
        assert_eq!(second.config.prompt, "also update docs");
        wait_until("message delivered", || {
            h.orch.task_messages(&task.id).expect("messages")[0].status == MessageStatus::Delivered
        })
        .await;
        assert_eq!(h.task(&task.id).status, TaskStatus::InProgress);
        assert!(h.events.events_of("task_status_changed").iter().all(|event| {
            !matches!(
                event.kind,
                orch_core::events::EventKind::TaskStatusChanged {
                    to: TaskStatus::InReview,
                    ..
                }
            )
        }));

        second.exit(0);
        h.wait_for_status(&task.id, TaskStatus::InReview).await;
        assert_eq!(h.factory.run_count(), 2);
    }

    #[tokio::test]
    async fn failed_restart_marks_message_failed_and_moves_to_review() {
        let h = Harness::new("orch-queue-fail");
        let task = h.create("feature/fail");
        h.orch.start(&task.id).await.expect("start");
        h.orch
            .queue_message(&task.id, "retry")
            .await
            .expect("queue");

        h.factory.fail_next_starts(1);
        h.factory.run(0).exit(1);
        h.wait_for_status(&task.id, TaskStatus::InReview).await;

        let messages = h.orch.task_messages(&task.id).expect("messages");
        assert_eq!(messages[0].status, MessageStatus::Failed);
        assert_eq!(h.events.events_of("message_failed").len(), 1);
    }

    #[tokio::test]
    async fn queueing_on_idle_review_task_delivers_immediately() {
        let h = Harness::new("orch-queue-now");
        let task = h.started_in_review("feature/now").await;

        let message = h
            .orch
            .queue_message(&task.id, "one more thing")
            .await
            .expect("queue");
        assert_eq!(message.status, MessageStatus::Delivered);
        assert!(message.delivered_at.is_some());
        assert_eq!(h.task(&task.id).status, TaskStatus::InProgress);
        assert!(h.orch.is_executing(&task.id));
        assert_eq!(h.factory.last_run().config.prompt, "one more thing");
    }

    #[tokio::test]
    async fn queue_message_guards() {
        let h = Harness::new("orch-queue-guard");
        let task = h.create("feature/g");
        let err = h
            .orch
            .queue_message(&task.id, "hi")
            .await
            .expect_err("todo task");
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));

        let err = h
            .orch
            .queue_message(&task.id, "   ")
            .await
            .expect_err("empty");
        assert!(matches!(err, OrchestratorError::EmptyMessage));
    }

    #[tokio::test]
    async fn finish_is_rejected_outside_review() {
        let h = Harness::new("orch-finish-guard");
        let mut task = h.create("feature/f");
        for status in [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done] {
            task.status = status;
            h.store.save_task(&task).expect("save");
            let err = h.orch.finish(&task.id).await.expect_err("rejected");
            assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
        }
    }

    #[tokio::test]
    async fn completion_runs_the_stop_script() {
        let h = Harness::with_config("orch-stop-script", OrchConfig::default(), |repo| {
            repo.stop_script = Some("echo stopped > stop-marker.txt".to_string());
        });
        let task = h.started_in_review("feature/stop").await;
        let worktree = task.worktree_path.expect("worktree");
        assert!(Path::new(&worktree).join("stop-marker.txt").exists());
    }

    #[tokio::test]
    async fn task_diff_shows_untracked_files_in_worktree() {
        let h = Harness::new("orch-diff");
        let task = h.create("feature/diff");
        let started = h.orch.start(&task.id).await.expect("start");
        let worktree = started.worktree_path.expect("worktree");
        std::fs::write(worktree.join("new.txt"), "brand new\n").expect("write file");

        let diff = h.orch.task_diff(&task.id).expect("diff");
        assert!(diff.contains("new.txt"));
        assert!(diff.contains("+brand new"));
    }

    #[tokio::test]
    async fn delete_task_stops_executor_and_drops_records() {
        let h = Harness::new("orch-delete");
        let task = h.create("feature/del");
        let started = h.orch.start(&task.id).await.expect("start");
        let run = h.factory.last_run();

        h.orch.delete_task(&task.id).await.expect("delete");
        assert!(run.was_stopped());
        assert!(!h.orch.is_executing(&task.id));
        assert!(matches!(
            h.orch.get_task(&task.id),
            Err(OrchestratorError::TaskNotFound { .. })
        ));
        h.orch.wait_background().await;
        assert!(!started.worktree_path.expect("worktree").exists());
    }

    #[tokio::test]
    async fn shutdown_stops_every_live_executor() {
        let h = Harness::new("orch-shutdown");
        let first = h.create("feature/a");
        let second = h.create("feature/b");
        h.orch.start(&first.id).await.expect("start a");
        h.orch.start(&second.id).await.expect("start b");

        h.orch.shutdown().await;
        assert!(h.factory.run(0).was_stopped());
        assert!(h.factory.run(1).was_stopped());
        assert!(!h.orch.is_executing(&first.id));
        assert!(!h.orch.is_executing(&second.id));
    }
}
