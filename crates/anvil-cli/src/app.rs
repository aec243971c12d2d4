use std::collections::{HashMap, VecDeque};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anvil_core::bridge::{BridgeMessage, UpdateBridge, progress_channel};
use anvil_core::config::AnvilConfig;
use anvil_core::installer::{Installer, ProcessInstaller, SimulatedInstaller};
use anvil_core::models::{CoreErrorKind, InstallTarget, TaskId, TaskRecord, TaskStatus};
use anvil_core::orchestration::TaskRegistry;
use anvil_core::persistence::ManifestStore;
use anvil_core::runtime::{Effect, LoopExit, MessageLoop, Program};

use crate::error::CliResult;
use crate::render::Renderer;

const SIMULATED_STAGE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug)]
pub enum InstallMsg {
    Bridge(BridgeMessage),
}

pub struct InstallRequest {
    pub targets: Vec<InstallTarget>,
    pub force: bool,
    pub simulate: bool,
}

pub async fn install(
    config: &AnvilConfig,
    manifest: Arc<dyn ManifestStore>,
    request: InstallRequest,
    renderer: Renderer,
) -> CliResult<ExitCode> {
    let installer: Arc<dyn Installer> = if request.simulate {
        Arc::new(SimulatedInstaller::new(SIMULATED_STAGE_DELAY).with_manifest(manifest.clone()))
    } else {
        Arc::new(ProcessInstaller::new(config.recipes.clone()).with_manifest(manifest.clone()))
    };

    let (events, bridge) = progress_channel(config.poll_timeout());
    let registry = TaskRegistry::builder(installer, events)
        .config(config.registry_config())
        .manifest(manifest)
        .build()?;

    let mut app = InstallApp::new(registry, bridge, request, renderer);
    let exit = MessageLoop::new().run(&mut app).await;
    tracing::debug!(?exit, "install loop finished");
    if matches!(exit, LoopExit::Idle { .. }) && !app.done {
        renderer.line(&renderer.error_line("progress stream ended before every task finished"));
    }

    Ok(app.report())
}

/// Drives an install run from the message loop.
///
/// Submits and starts every target, then keeps exactly one bridge poll
/// outstanding, printing each progress event and refreshing its cached view of
/// the affected task until every task is terminal.
pub struct InstallApp {
    registry: TaskRegistry,
    bridge: UpdateBridge,
    renderer: Renderer,
    pending_targets: Vec<InstallTarget>,
    force: bool,
    tasks: Vec<TaskId>,
    records: HashMap<TaskId, TaskRecord>,
    deferred: VecDeque<TaskId>,
    rejected: usize,
    done: bool,
}

impl InstallApp {
    pub fn new(
        registry: TaskRegistry,
        bridge: UpdateBridge,
        request: InstallRequest,
        renderer: Renderer,
    ) -> Self {
        Self {
            registry,
            bridge,
            renderer,
            pending_targets: request.targets,
            force: request.force,
            tasks: Vec::new(),
            records: HashMap::new(),
            deferred: VecDeque::new(),
            rejected: 0,
            done: false,
        }
    }

    fn submit_all(&mut self) {
        for target in std::mem::take(&mut self.pending_targets) {
            let submitted = if self.force {
                self.registry.submit_forced(target.clone())
            } else {
                self.registry.submit(target.clone())
            };

            match submitted {
                Ok(id) => {
                    if let Some(record) = self.registry.get(&id) {
                        self.records.insert(id.clone(), record);
                    }
                    self.tasks.push(id);
                }
                Err(error) if error.kind == CoreErrorKind::AlreadyInstalled => {
                    self.renderer.line(&format!(
                        "{target} is already installed; pass --force to reinstall"
                    ));
                }
                Err(error) => {
                    self.rejected += 1;
                    self.renderer.line(&self.renderer.error_line(&error.message));
                }
            }
        }
    }

    fn start(&mut self, id: TaskId) {
        match self.registry.start(&id) {
            Ok(()) => {}
            Err(error) if error.kind == CoreErrorKind::AtCapacity => {
                tracing::debug!(task_id = %id, "no free slot; retrying after the next task finishes");
                self.deferred.push_back(id);
            }
            Err(error) => {
                self.rejected += 1;
                self.renderer.line(&self.renderer.error_line(&error.message));
                let _ = self.registry.cancel(&id);
                self.refresh(&id);
            }
        }
    }

    fn retry_deferred(&mut self) {
        if let Some(id) = self.deferred.pop_front() {
            self.start(id);
        }
    }

    fn refresh(&mut self, id: &TaskId) {
        if let Some(record) = self.registry.get(id) {
            self.records.insert(id.clone(), record);
        }
    }

    fn label(&self, id: &TaskId) -> String {
        self.records
            .get(id)
            .map(|record| record.target.to_string())
            .unwrap_or_else(|| id.to_string())
    }

    fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|id| {
            self.records
                .get(id)
                .is_some_and(|record| record.status.is_terminal())
        })
    }

    fn watch(&self) -> Effect<InstallMsg> {
        self.bridge.watch_next(InstallMsg::Bridge)
    }

    pub fn report(&self) -> ExitCode {
        let mut failed = self.rejected;
        if !self.tasks.is_empty() {
            self.renderer.line("");
        }
        for id in &self.tasks {
            let Some(record) = self.records.get(id) else {
                continue;
            };
            if record.status != TaskStatus::Completed {
                failed += 1;
            }
            self.renderer.line(&self.renderer.task_summary_line(record));
        }

        if failed == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

impl Program for InstallApp {
    type Message = InstallMsg;

    fn init(&mut self) -> Effect<InstallMsg> {
        self.submit_all();
        for id in self.tasks.clone() {
            self.start(id);
        }

        if self.all_terminal() {
            self.done = true;
            return Effect::none();
        }
        self.watch()
    }

    fn update(&mut self, message: InstallMsg) -> Effect<InstallMsg> {
        let InstallMsg::Bridge(message) = message;
        match message {
            BridgeMessage::Event(event) => {
                let line = self.renderer.task_event_line(&self.label(&event.task_id), &event);
                self.renderer.line(&line);
                self.refresh(&event.task_id);
                if event.is_terminal() {
                    self.retry_deferred();
                }
            }
            BridgeMessage::Empty => {}
            BridgeMessage::Disconnected => {
                tracing::warn!("progress stream disconnected");
                return Effect::none();
            }
        }

        if self.all_terminal() {
            for event in self.bridge.drain_ready() {
                let line = self.renderer.task_event_line(&self.label(&event.task_id), &event);
                self.renderer.line(&line);
            }
            self.done = true;
            return Effect::none();
        }
        self.watch()
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
