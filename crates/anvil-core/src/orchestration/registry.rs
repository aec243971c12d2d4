use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};

use crate::bridge::ProgressSender;
use crate::installer::Installer;
use crate::models::{
    CoreError, CoreErrorKind, InstallTarget, ProgressEvent, TaskId, TaskRecord, TaskStatus,
};
use crate::orchestration::execution;
use crate::orchestration::{
    CancellationToken, OrchestrationResult, PromotionPolicy, RegistryConfig,
};
use crate::persistence::ManifestStore;

const STAGE_WAITING: &str = "waiting for a free slot";
const STAGE_STARTING: &str = "starting";

pub struct TaskRegistryBuilder {
    installer: Arc<dyn Installer>,
    events: ProgressSender,
    config: RegistryConfig,
    manifest: Option<Arc<dyn ManifestStore>>,
    handle: Option<Handle>,
}

impl TaskRegistryBuilder {
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.config.max_concurrent = max_concurrent;
        self
    }

    pub fn promotion(mut self, promotion: PromotionPolicy) -> Self {
        self.config.promotion = promotion;
        self
    }

    pub fn output_tail_lines(mut self, lines: usize) -> Self {
        self.config.output_tail_lines = lines;
        self
    }

    /// Consult this manifest to reject redundant submissions.
    pub fn manifest(mut self, manifest: Arc<dyn ManifestStore>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Runtime that execution units are spawned on. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build(self) -> OrchestrationResult<TaskRegistry> {
        if self.config.max_concurrent == 0 {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "max_concurrent must be at least 1",
            ));
        }

        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    "task registry needs a tokio runtime handle",
                )
            })?,
        };

        Ok(TaskRegistry {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                installer: self.installer,
                manifest: self.manifest,
                events: self.events,
                config: self.config,
                handle,
            }),
        })
    }
}

/// Authoritative ledger of install tasks.
///
/// Holds every [`TaskRecord`] behind one lock, never lets more than
/// `max_concurrent` tasks be `Running`, and launches an execution unit on the
/// runtime for each task that starts. Readers get cloned snapshots.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    installer: Arc<dyn Installer>,
    manifest: Option<Arc<dyn ManifestStore>>,
    events: ProgressSender,
    config: RegistryConfig,
    handle: Handle,
}

#[derive(Default)]
struct RegistryState {
    next_sequence: u64,
    order: Vec<TaskId>,
    tasks: HashMap<TaskId, TaskEntry>,
    running: usize,
    start_queue: VecDeque<TaskId>,
}

struct TaskEntry {
    record: TaskRecord,
    token: CancellationToken,
    start_requested: bool,
    terminal: Arc<Notify>,
}

pub(crate) struct Launch {
    pub(crate) id: TaskId,
    pub(crate) target: InstallTarget,
    pub(crate) token: CancellationToken,
}

pub(crate) enum TaskOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl TaskRegistry {
    pub fn builder(installer: Arc<dyn Installer>, events: ProgressSender) -> TaskRegistryBuilder {
        TaskRegistryBuilder {
            installer,
            events,
            config: RegistryConfig::default(),
            manifest: None,
            handle: None,
        }
    }

    pub fn config(&self) -> RegistryConfig {
        self.inner.config
    }

    /// Record a new pending task. Fails with `AlreadyInstalled` when the
    /// manifest already holds this exact target.
    pub fn submit(&self, target: InstallTarget) -> OrchestrationResult<TaskId> {
        if let Some(manifest) = &self.inner.manifest {
            match manifest.is_installed(&target) {
                Ok(true) => {
                    return Err(CoreError::new(
                        CoreErrorKind::AlreadyInstalled,
                        format!("{target} is already installed"),
                    ));
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(
                        tool = %target.tool,
                        build_type = %target.build_type,
                        kind = ?error.kind,
                        message = %error.message,
                        "manifest unavailable; accepting submission without redundancy check"
                    );
                }
            }
        }

        self.submit_forced(target)
    }

    /// Record a new pending task without consulting the manifest.
    pub fn submit_forced(&self, target: InstallTarget) -> OrchestrationResult<TaskId> {
        let mut state = self.lock_state()?;
        let sequence = state.next_sequence;
        state.next_sequence = state.next_sequence.saturating_add(1);

        let id = generate_task_id(sequence);
        let record = TaskRecord::pending(id.clone(), target, self.inner.config.output_tail_lines);
        tracing::info!(
            task_id = %id,
            tool = %record.target.tool,
            build_type = %record.target.build_type,
            "task submitted"
        );
        emit(&self.inner.events, &record, None);

        state.order.push(id.clone());
        state.tasks.insert(
            id.clone(),
            TaskEntry {
                record,
                token: CancellationToken::new(),
                start_requested: false,
                terminal: Arc::new(Notify::new()),
            },
        );

        Ok(id)
    }

    /// Move a pending task towards running. Execution happens on the runtime,
    /// never on the caller's stack.
    pub fn start(&self, task_id: &TaskId) -> OrchestrationResult<()> {
        let mut state = self.lock_state()?;
        let has_slot = state.running < self.inner.config.max_concurrent;
        let entry = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| unknown_task(task_id))?;

        if entry.record.status != TaskStatus::Pending || entry.start_requested {
            return Err(CoreError::for_task(
                CoreErrorKind::AlreadyStarted,
                task_id,
                format!(
                    "task '{task_id}' was already started (status '{}')",
                    entry.record.status.as_str()
                ),
            ));
        }

        if has_slot {
            let launch = mark_running(entry, &self.inner.events);
            state.running += 1;
            drop(state);
            self.launch(launch);
            return Ok(());
        }

        match self.inner.config.promotion {
            PromotionPolicy::Automatic => {
                entry.start_requested = true;
                entry.record.stage = STAGE_WAITING.to_string();
                emit(&self.inner.events, &entry.record, None);
                state.start_queue.push_back(task_id.clone());
                tracing::info!(
                    task_id = %task_id,
                    queued = state.start_queue.len(),
                    "no free slot; task queued for automatic promotion"
                );
                Ok(())
            }
            PromotionPolicy::Manual => Err(CoreError::for_task(
                CoreErrorKind::AtCapacity,
                task_id,
                format!(
                    "{} tasks are already running",
                    self.inner.config.max_concurrent
                ),
            )),
        }
    }

    /// Pending tasks are cancelled at once. Running tasks stop at their next
    /// stage boundary. Terminal tasks are left untouched.
    pub fn cancel(&self, task_id: &TaskId) -> OrchestrationResult<()> {
        let mut state = self.lock_state()?;
        let entry = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| unknown_task(task_id))?;

        match entry.record.status {
            TaskStatus::Pending => {
                let was_queued = entry.start_requested;
                entry.start_requested = false;
                set_terminal(&mut entry.record, TaskStatus::Cancelled, None)?;
                emit(&self.inner.events, &entry.record, None);
                entry.terminal.notify_waiters();
                if was_queued {
                    state.start_queue.retain(|queued| queued != task_id);
                }
                tracing::info!(task_id = %task_id, "pending task cancelled");
            }
            TaskStatus::Running => {
                entry.token.cancel();
                tracing::info!(
                    task_id = %task_id,
                    stage = %entry.record.stage,
                    "cancellation requested; task stops at the next stage boundary"
                );
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {}
        }

        Ok(())
    }

    /// Request cancellation of every non-terminal task. Returns how many were affected.
    pub fn cancel_all(&self) -> OrchestrationResult<usize> {
        let ids: Vec<TaskId> = {
            let state = self.lock_state()?;
            state
                .order
                .iter()
                .filter(|id| {
                    state
                        .tasks
                        .get(*id)
                        .is_some_and(|entry| !entry.record.is_terminal())
                })
                .cloned()
                .collect()
        };

        for id in &ids {
            self.cancel(id)?;
        }
        Ok(ids.len())
    }

    pub fn get(&self, task_id: &TaskId) -> Option<TaskRecord> {
        let state = self.lock_state().ok()?;
        state.tasks.get(task_id).map(|entry| entry.record.clone())
    }

    /// Snapshots of every task, in submission order.
    pub fn get_all(&self) -> Vec<TaskRecord> {
        let Ok(state) = self.lock_state() else {
            return Vec::new();
        };
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .map(|entry| entry.record.clone())
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.lock_state().map(|state| state.running).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lock_state().map(|state| state.tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every terminal record. Returns how many were removed.
    pub fn prune_terminal(&self) -> OrchestrationResult<usize> {
        let mut state = self.lock_state()?;
        let before = state.tasks.len();
        state.tasks.retain(|_, entry| !entry.record.is_terminal());
        let RegistryState { order, tasks, .. } = &mut *state;
        order.retain(|id| tasks.contains_key(id));
        let removed = before - state.tasks.len();
        tracing::debug!(removed, "pruned terminal tasks");
        Ok(removed)
    }

    pub async fn wait_for_terminal(
        &self,
        task_id: &TaskId,
        timeout_duration: Option<Duration>,
    ) -> OrchestrationResult<TaskRecord> {
        let deadline = timeout_duration.map(|duration| Instant::now() + duration);

        loop {
            let notify = {
                let state = self.lock_state()?;
                let entry = state.tasks.get(task_id).ok_or_else(|| unknown_task(task_id))?;
                if entry.record.is_terminal() {
                    return Ok(entry.record.clone());
                }
                entry.terminal.clone()
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.get(task_id)
                && record.is_terminal()
            {
                return Ok(record);
            }

            match deadline {
                Some(deadline) => {
                    timeout_at(deadline, notified).await.map_err(|_| {
                        CoreError::for_task(
                            CoreErrorKind::Timeout,
                            task_id,
                            format!("timed out waiting for task '{task_id}' to finish"),
                        )
                    })?;
                }
                None => notified.await,
            }
        }
    }
}

impl TaskRegistry {
    pub(crate) fn installer(&self) -> Arc<dyn Installer> {
        self.inner.installer.clone()
    }

    /// Enter a new stage. Returns false when the task is no longer running.
    pub(crate) fn begin_stage(&self, task_id: &TaskId, stage: &str, progress: f64) -> bool {
        let Ok(mut state) = self.lock_state() else {
            tracing::error!(task_id = %task_id, "registry lock poisoned while entering stage");
            return false;
        };
        let Some(entry) = state.tasks.get_mut(task_id) else {
            return false;
        };
        if entry.record.status != TaskStatus::Running {
            return false;
        }

        entry.record.stage = stage.to_string();
        entry.record.progress = entry.record.progress.max(progress.clamp(0.0, 1.0));
        tracing::debug!(
            task_id = %task_id,
            stage,
            progress = entry.record.progress,
            "task entered stage"
        );
        emit(&self.inner.events, &entry.record, None);
        true
    }

    pub(crate) fn append_output(&self, task_id: &TaskId, line: String) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        let Some(entry) = state.tasks.get_mut(task_id) else {
            return;
        };
        if entry.record.status != TaskStatus::Running {
            return;
        }

        entry.record.output.push(line.clone());
        emit(&self.inner.events, &entry.record, Some(line));
    }

    /// Record the outcome and release the task's slot. A poisoned lock is
    /// recovered here so a running slot is never leaked.
    pub(crate) fn finish(&self, task_id: &TaskId, outcome: TaskOutcome) {
        let launches = {
            let mut state = self.inner.state.lock().unwrap_or_else(|poisoned| {
                tracing::error!(task_id = %task_id, "registry lock poisoned while finishing task");
                poisoned.into_inner()
            });
            let Some(entry) = state.tasks.get_mut(task_id) else {
                tracing::error!(task_id = %task_id, "finished task is missing from the registry");
                return;
            };
            if entry.record.status != TaskStatus::Running {
                tracing::error!(
                    task_id = %task_id,
                    status = entry.record.status.as_str(),
                    "execution unit finished a task that was not running"
                );
                return;
            }

            let applied = match outcome {
                TaskOutcome::Completed => {
                    tracing::info!(
                        task_id = %task_id,
                        tool = %entry.record.target.tool,
                        "task completed"
                    );
                    set_terminal(&mut entry.record, TaskStatus::Completed, None)
                }
                TaskOutcome::Failed(message) => {
                    tracing::warn!(
                        task_id = %task_id,
                        tool = %entry.record.target.tool,
                        stage = %entry.record.stage,
                        message = %message,
                        "task failed"
                    );
                    set_terminal(&mut entry.record, TaskStatus::Failed, Some(message))
                }
                TaskOutcome::Cancelled => {
                    tracing::info!(
                        task_id = %task_id,
                        stage = %entry.record.stage,
                        "task cancelled at stage boundary"
                    );
                    set_terminal(&mut entry.record, TaskStatus::Cancelled, None)
                }
            };
            if let Err(error) = applied {
                tracing::error!(task_id = %task_id, message = %error.message, "task outcome rejected");
                return;
            }
            emit(&self.inner.events, &entry.record, None);
            entry.terminal.notify_waiters();

            state.running = state.running.saturating_sub(1);
            self.promote_queued(&mut state)
        };

        for launch in launches {
            self.launch(launch);
        }
    }

    fn promote_queued(&self, state: &mut RegistryState) -> Vec<Launch> {
        let mut launches = Vec::new();
        if self.inner.config.promotion != PromotionPolicy::Automatic {
            return launches;
        }

        while state.running < self.inner.config.max_concurrent {
            let Some(next) = state.start_queue.pop_front() else {
                break;
            };
            let Some(entry) = state.tasks.get_mut(&next) else {
                continue;
            };
            if entry.record.status != TaskStatus::Pending {
                continue;
            }

            entry.start_requested = false;
            tracing::info!(task_id = %next, "promoting queued task");
            launches.push(mark_running(entry, &self.inner.events));
            state.running += 1;
        }

        launches
    }

    fn launch(&self, launch: Launch) {
        let registry = self.clone();
        self.inner
            .handle
            .spawn(execution::run_task(registry, launch));
    }

    fn lock_state(&self) -> OrchestrationResult<MutexGuard<'_, RegistryState>> {
        self.inner.state.lock().map_err(|_| {
            CoreError::new(CoreErrorKind::Internal, "task registry mutex poisoned")
        })
    }
}

fn mark_running(entry: &mut TaskEntry, events: &ProgressSender) -> Launch {
    entry.record.status = TaskStatus::Running;
    entry.record.started_at = Some(SystemTime::now());
    entry.record.stage = STAGE_STARTING.to_string();
    tracing::info!(
        task_id = %entry.record.id,
        tool = %entry.record.target.tool,
        build_type = %entry.record.target.build_type,
        "task started"
    );
    emit(events, &entry.record, None);

    Launch {
        id: entry.record.id.clone(),
        target: entry.record.target.clone(),
        token: entry.token.clone(),
    }
}

fn set_terminal(
    record: &mut TaskRecord,
    status: TaskStatus,
    error: Option<String>,
) -> OrchestrationResult<()> {
    if !record.status.can_transition_to(status) {
        return Err(CoreError::for_task(
            CoreErrorKind::InvalidTransition,
            &record.id,
            format!(
                "task '{}' cannot move from '{}' to '{}'",
                record.id,
                record.status.as_str(),
                status.as_str()
            ),
        ));
    }
    if status == TaskStatus::Completed {
        record.progress = 1.0;
    }
    record.status = status;
    record.ended_at = Some(SystemTime::now());
    record.error = error;
    Ok(())
}

fn emit(events: &ProgressSender, record: &TaskRecord, appended_output: Option<String>) {
    events.send(ProgressEvent {
        task_id: record.id.clone(),
        status: record.status,
        progress: record.progress,
        stage: record.stage.clone(),
        appended_output,
    });
}

fn generate_task_id(sequence: u64) -> TaskId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    TaskId(format!("task-{millis}-{sequence}"))
}

fn unknown_task(task_id: &TaskId) -> CoreError {
    CoreError::for_task(
        CoreErrorKind::UnknownTask,
        task_id,
        format!("unknown task id '{task_id}'"),
    )
}
