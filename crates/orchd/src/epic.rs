//! Epics: one agent working across several repositories at once. The epic
//! directory holds one worktree per repository, all on the epic branch.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use orch_agents::{ExecutorConfig, ExecutorEvent, ExecutorRun};
use orch_core::events::EventKind;
use orch_core::state::TaskStatus;
use orch_core::types::{Epic, EpicId, ExecutionLog, ExecutorKind, LogType, RepoId, Repository};
use orch_git::{
    available_worktree_path, create_branch_worktree, delete_branch, delete_worktree,
    prune_worktrees, worktree_dir_name,
};
use orch_scripts::{copy_files_best_effort, ScriptKind};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::context::Collaborators;
use crate::error::OrchestratorError;
use crate::registry::{ExecutorRegistry, KeyedLocks};
use crate::state_machine::{transition, TaskOperation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEpic {
    pub title: String,
    pub description: Option<String>,
    pub executor_kind: ExecutorKind,
    pub branch_name: String,
    /// Falls back to each repository's default branch.
    pub base_branch: Option<String>,
    pub repository_ids: Vec<RepoId>,
}

struct Inner {
    ctx: Collaborators,
    epics_root: PathBuf,
    live: ExecutorRegistry<EpicId>,
    locks: KeyedLocks<EpicId>,
    background: TaskTracker,
    runs: TaskTracker,
}

#[derive(Clone)]
pub struct EpicOrchestrator {
    inner: Arc<Inner>,
}

/// Subdirectory of the epic directory holding `repository`'s worktree.
pub fn repository_dir(epic_dir: &Path, repository: &Repository) -> PathBuf {
    epic_dir.join(worktree_dir_name(&repository.name))
}

impl EpicOrchestrator {
    pub fn new(ctx: Collaborators, epics_root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                epics_root: epics_root.into(),
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

    pub fn create_epic(&self, new: NewEpic) -> Result<Epic, OrchestratorError> {
        for repo_id in &new.repository_ids {
            self.repository(repo_id)?;
        }
        let mut epic = Epic::new(
            EpicId::generate(),
            new.title,
            new.executor_kind,
            new.branch_name,
            new.repository_ids,
        );
        epic.description = new.description.filter(|text| !text.trim().is_empty());
        epic.base_branch = new.base_branch.filter(|branch| !branch.trim().is_empty());
        self.ctx().store.save_epic(&epic)?;
        info!(epic_id = %epic.id, repositories = epic.repository_ids.len(), "epic created");
        Ok(epic)
    }

    pub fn get_epic(&self, epic_id: &EpicId) -> Result<Epic, OrchestratorError> {
        self.ctx()
            .store
            .epic(epic_id)?
            .ok_or_else(|| OrchestratorError::EpicNotFound {
                epic_id: epic_id.to_string(),
            })
    }

    pub fn epic_logs(&self, epic_id: &EpicId) -> Result<Vec<ExecutionLog>, OrchestratorError> {
        Ok(self.ctx().store.logs_for_epic(epic_id)?)
    }

    pub fn is_executing(&self, epic_id: &EpicId) -> bool {
        self.inner.live.contains(epic_id)
    }

    #[instrument(skip_all, fields(epic_id = %epic_id))]
    pub async fn start(&self, epic_id: &EpicId) -> Result<Epic, OrchestratorError> {
        let _guard = self.inner.locks.lock(epic_id).await;
        let mut epic = self.get_epic(epic_id)?;
        if !TaskOperation::Start.permits(epic.status) {
            return Err(OrchestratorError::invalid_transition(
                epic_id.to_string(),
                TaskOperation::Start,
                epic.status,
            ));
        }
        self.ctx().ensure_enabled(epic.executor_kind)?;
        let repositories = self.repositories(&epic)?;

        let epic_dir = available_worktree_path(
            &self.inner.epics_root,
            &epic.branch_name,
            epic.id.0.as_str(),
        );
        fs::create_dir_all(&epic_dir).map_err(|source| OrchestratorError::Prepare {
            path: epic_dir.clone(),
            source,
        })?;

        let prepared = match self.prepare_worktrees(&epic, &repositories, &epic_dir) {
            Ok(prepared) => prepared,
            Err(err) => {
                if let Err(cleanup) = fs::remove_dir_all(&epic_dir) {
                    warn!(dir = %epic_dir.display(), error = %cleanup, "failed to remove epic directory");
                }
                return Err(err);
            }
        };
        for (repository, worktree) in prepared {
            copy_files_best_effort(&repository.path, &worktree, repository.copy_files.as_deref());
            self.spawn_hooks(
                worktree,
                vec![
                    (ScriptKind::Setup, repository.setup_script.clone()),
                    (ScriptKind::Start, repository.start_script.clone()),
                ],
            );
        }
        info!(dir = %epic_dir.display(), repositories = repositories.len(), "epic worktrees ready");

        epic.worktree_path = Some(epic_dir);
        self.move_epic(&mut epic, TaskStatus::InProgress)?;

        let prompt = epic.initial_prompt();
        let (run_id, run) = self.launch(&epic, prompt).await?;
        self.spawn_driver(epic.id.clone(), run_id, run);
        Ok(epic)
    }

    /// Branch and worktree per repository. On failure the ones already made
    /// are removed again so the epic can be started afresh.
    fn prepare_worktrees<'a>(
        &self,
        epic: &Epic,
        repositories: &'a [Repository],
        epic_dir: &Path,
    ) -> Result<Vec<(&'a Repository, PathBuf)>, OrchestratorError> {
        let git = &self.ctx().git;
        let mut prepared: Vec<(&Repository, PathBuf)> = Vec::with_capacity(repositories.len());
        for repository in repositories {
            let base = epic
                .base_branch
                .clone()
                .unwrap_or_else(|| repository.default_branch.clone());
            let worktree = repository_dir(epic_dir, repository);
            if let Err(err) = create_branch_worktree(
                &repository.path,
                &epic.branch_name,
                Some(base.as_str()),
                &worktree,
                git,
            ) {
                for (done, path) in prepared.iter().rev() {
                    if let Err(rollback) = delete_worktree(&done.path, path, true, git) {
                        warn!(repo_id = %done.id, error = %rollback, "failed to roll back worktree");
                    }
                    if let Err(rollback) = delete_branch(&done.path, &epic.branch_name, true, git) {
                        warn!(repo_id = %done.id, error = %rollback, "failed to roll back branch");
                    }
                }
                return Err(err.into());
            }
            prepared.push((repository, worktree));
        }
        Ok(prepared)
    }

    #[instrument(skip_all, fields(epic_id = %epic_id))]
    pub async fn pause(&self, epic_id: &EpicId) -> Result<Epic, OrchestratorError> {
        let _guard = self.inner.locks.lock(epic_id).await;
        let mut epic = self.get_epic(epic_id)?;
        if !TaskOperation::Pause.permits(epic.status) {
            return Err(OrchestratorError::invalid_transition(
                epic_id.to_string(),
                TaskOperation::Pause,
                epic.status,
            ));
        }
        self.stop_live(epic_id).await;
        epic.updated_at = Utc::now();
        self.ctx().store.save_epic(&epic)?;
        Ok(epic)
    }

    #[instrument(skip_all, fields(epic_id = %epic_id))]
    pub async fn resume(
        &self,
        epic_id: &EpicId,
        message: Option<String>,
    ) -> Result<Epic, OrchestratorError> {
        let _guard = self.inner.locks.lock(epic_id).await;
        let mut epic = self.get_epic(epic_id)?;
        if !TaskOperation::Resume.permits(epic.status) {
            return Err(OrchestratorError::invalid_transition(
                epic_id.to_string(),
                TaskOperation::Resume,
                epic.status,
            ));
        }
        self.ctx().ensure_enabled(epic.executor_kind)?;
        if !epic.worktree_path.as_deref().is_some_and(Path::exists) {
            return Err(OrchestratorError::MissingWorktree {
                id: epic_id.to_string(),
            });
        }

        let prompt = message
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| epic.initial_prompt());
        let (run_id, run) = self.launch(&epic, prompt).await?;
        if epic.status == TaskStatus::InReview {
            self.move_epic(&mut epic, TaskStatus::InProgress)?;
        }
        self.spawn_driver(epic.id.clone(), run_id, run);
        Ok(epic)
    }

    /// IN_REVIEW -> DONE, then tear down every repository worktree and the
    /// epic branch in the background.
    #[instrument(skip_all, fields(epic_id = %epic_id))]
    pub async fn finish(&self, epic_id: &EpicId) -> Result<Epic, OrchestratorError> {
        let _guard = self.inner.locks.lock(epic_id).await;
        let mut epic = self.get_epic(epic_id)?;
        if !TaskOperation::Finish.permits(epic.status) {
            return Err(OrchestratorError::invalid_transition(
                epic_id.to_string(),
                TaskOperation::Finish,
                epic.status,
            ));
        }

        self.stop_live(epic_id).await;
        let epic_dir = epic.worktree_path.clone();
        let repositories = self.repositories(&epic)?;
        self.move_epic(&mut epic, TaskStatus::Done)?;
        if let Some(epic_dir) = epic_dir {
            self.spawn_cleanup(repositories, epic_dir, epic.branch_name.clone());
        }
        Ok(epic)
    }

    pub async fn wait_background(&self) {
        self.inner.background.close();
        self.inner.background.wait().await;
        self.inner.background.reopen();
    }

    pub async fn shutdown(&self) {
        for (epic_id, live) in self.inner.live.drain() {
            live.executor.stop().await;
            self.ctx()
                .epic_event(&epic_id, EventKind::ExecutorStopped { run_id: live.run_id });
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

    fn repositories(&self, epic: &Epic) -> Result<Vec<Repository>, OrchestratorError> {
        epic.repository_ids
            .iter()
            .map(|repo_id| self.repository(repo_id))
            .collect()
    }

    fn move_epic(&self, epic: &mut Epic, to: TaskStatus) -> Result<(), OrchestratorError> {
        let step = transition(epic, to, Utc::now())?;
        self.ctx().store.save_epic(epic)?;
        if step.changed() {
            info!(epic_id = %epic.id, from = %step.from, to = %step.to, "epic status changed");
            self.ctx().epic_event(
                &epic.id,
                EventKind::EpicStatusChanged {
                    from: step.from,
                    to: step.to,
                },
            );
        }
        Ok(())
    }

    fn system_log(&self, epic_id: &EpicId, content: impl Into<String>) {
        self.ctx()
            .record_log(ExecutionLog::for_epic(epic_id.clone(), LogType::System, content));
    }

    async fn stop_live(&self, epic_id: &EpicId) -> bool {
        let Some(live) = self.inner.live.take(epic_id) else {
            return false;
        };
        live.executor.stop().await;
        self.ctx()
            .epic_event(epic_id, EventKind::ExecutorStopped { run_id: live.run_id });
        true
    }

    async fn launch(
        &self,
        epic: &Epic,
        prompt: String,
    ) -> Result<(u64, ExecutorRun), OrchestratorError> {
        let epic_dir =
            epic.worktree_path
                .clone()
                .ok_or_else(|| OrchestratorError::MissingWorktree {
                    id: epic.id.to_string(),
                })?;
        self.stop_live(&epic.id).await;

        let executor = self.ctx().create_executor(epic.executor_kind)?;
        let config = ExecutorConfig::new(epic.id.0.as_str(), epic_dir, prompt)
            .resuming(epic.session_id.clone());
        let run = executor.start(config).await?;

        let (run_id, _) = self.inner.live.insert(epic.id.clone(), executor);
        info!(epic_id = %epic.id, run_id, kind = %epic.executor_kind, "executor started");
        self.ctx().epic_event(
            &epic.id,
            EventKind::ExecutorStarted {
                kind: epic.executor_kind,
                run_id,
            },
        );
        Ok((run_id, run))
    }

    fn spawn_driver(&self, epic_id: EpicId, run_id: u64, run: ExecutorRun) {
        self.inner.runs.spawn(self.clone().drive(epic_id, run_id, run));
    }

    async fn drive(self, epic_id: EpicId, run_id: u64, mut run: ExecutorRun) {
        while let Some(event) = run.next_event().await {
            match event {
                ExecutorEvent::Output(output) => self.ctx().record_log(ExecutionLog::for_epic(
                    epic_id.clone(),
                    output.log_type,
                    output.content,
                )),
                ExecutorEvent::SessionId(session_id) => {
                    if let Err(err) = self.capture_session(&epic_id, run_id, session_id).await {
                        warn!(%epic_id, error = %err, "failed to store session id");
                    }
                }
                ExecutorEvent::Exited(code) => {
                    if let Err(err) = self.on_exit(&epic_id, run_id, code).await {
                        warn!(%epic_id, error = %err, "exit handling failed");
                    }
                    return;
                }
            }
        }
    }

    async fn capture_session(
        &self,
        epic_id: &EpicId,
        run_id: u64,
        session_id: String,
    ) -> Result<(), OrchestratorError> {
        let _guard = self.inner.locks.lock(epic_id).await;
        if !self.inner.live.is_current(epic_id, run_id) {
            return Ok(());
        }
        let mut epic = self.get_epic(epic_id)?;
        if epic.session_id.as_deref() == Some(session_id.as_str()) {
            return Ok(());
        }
        epic.session_id = Some(session_id.clone());
        epic.updated_at = Utc::now();
        self.ctx().store.save_epic(&epic)?;
        self.ctx()
            .epic_event(epic_id, EventKind::SessionCaptured { session_id });
        Ok(())
    }

    async fn on_exit(
        &self,
        epic_id: &EpicId,
        run_id: u64,
        code: i32,
    ) -> Result<(), OrchestratorError> {
        let _guard = self.inner.locks.lock(epic_id).await;
        if !self.inner.live.remove_run(epic_id, run_id) {
            debug!(%epic_id, run_id, "ignoring exit from a replaced run");
            return Ok(());
        }
        self.ctx()
            .epic_event(epic_id, EventKind::ExecutorStopped { run_id });
        self.system_log(epic_id, format!("agent exited with code {code}"));

        let mut epic = self.get_epic(epic_id)?;
        if epic.status != TaskStatus::InProgress {
            return Ok(());
        }
        if let Some(epic_dir) = epic.worktree_path.clone() {
            for repository in self.repositories(&epic)? {
                self.ctx()
                    .scripts
                    .run_hook(
                        ScriptKind::Stop,
                        &repository_dir(&epic_dir, &repository),
                        repository.stop_script.as_deref(),
                    )
                    .await;
            }
        }
        self.move_epic(&mut epic, TaskStatus::InReview)?;
        self.system_log(epic_id, "epic ready for review");
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

    fn spawn_cleanup(&self, repositories: Vec<Repository>, epic_dir: PathBuf, branch: String) {
        let ctx = self.ctx().clone();
        self.inner.background.spawn(async move {
            for repository in repositories {
                let worktree = repository_dir(&epic_dir, &repository);
                if worktree.exists() {
                    ctx.scripts
                        .run_hook(
                            ScriptKind::Cleanup,
                            &worktree,
                            repository.cleanup_script.as_deref(),
                        )
                        .await;
                    if let Err(err) = delete_worktree(&repository.path, &worktree, true, &ctx.git)
                    {
                        warn!(worktree = %worktree.display(), error = %err, "failed to remove worktree");
                    }
                }
                if let Err(err) = prune_worktrees(&repository.path, &ctx.git) {
                    debug!(error = %err, "worktree prune failed");
                }
                if let Err(err) = delete_branch(&repository.path, &branch, true, &ctx.git) {
                    warn!(repository = %repository.name, %branch, error = %err, "failed to delete branch");
                }
            }
            if let Err(err) = fs::remove_dir_all(&epic_dir) {
                debug!(dir = %epic_dir.display(), error = %err, "epic directory not removed");
            }
        });
    }
}
