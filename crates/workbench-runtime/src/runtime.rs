use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use workbench_core::{Effect, ExecutableKey, ProjectView, WorkbenchEvent, WorkbenchState};
use workbench_eventbus::{WorkbenchEventBus, WorkbenchEventEnvelope};
use workbench_lifecycle::{EventSink, ProcessLifecycle};
use workbench_protocol::{
    ConfirmationPrompt, ManifestStore, PackageManager, ProcessSpawner, ProjectId, WorkbenchError,
    WorkbenchResult,
};

use crate::dependencies;
use crate::invocation::spawn_request;
use crate::projects;
use crate::settings::RuntimeSettings;

/// External systems the effect handlers drive.
#[derive(Clone)]
pub struct RuntimeCollaborators {
    pub manifests: Arc<dyn ManifestStore>,
    pub packages: Arc<dyn PackageManager>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub prompt: Arc<dyn ConfirmationPrompt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeProcessSnapshot {
    pub live_runs: usize,
    pub active_stream_ingestion_tasks: usize,
}

pub(crate) struct RuntimeContext {
    pub(crate) state: RwLock<WorkbenchState>,
    pub(crate) eventbus: WorkbenchEventBus,
    pub(crate) lifecycle: ProcessLifecycle,
    pub(crate) manifests: Arc<dyn ManifestStore>,
    pub(crate) packages: Arc<dyn PackageManager>,
    pub(crate) prompt: Arc<dyn ConfirmationPrompt>,
    pub(crate) settings: RuntimeSettings,
    pub(crate) events: EventSink,
    /// Directories removed from the list this session; refresh skips them.
    pub(crate) dismissed: Mutex<HashSet<PathBuf>>,
}

pub struct WorkbenchRuntime {
    pub(crate) context: Arc<RuntimeContext>,
    event_loop: JoinHandle<()>,
}

impl WorkbenchRuntime {
    /// Spawns the event loop on the current tokio runtime.
    pub fn start(collaborators: RuntimeCollaborators, settings: RuntimeSettings) -> Self {
        let (events, receiver) = mpsc::channel(settings.event_buffer.max(1));
        let lifecycle = ProcessLifecycle::new(
            collaborators.spawner,
            events.clone(),
            settings.failure_patterns.clone(),
        );
        let context = Arc::new(RuntimeContext {
            state: RwLock::new(WorkbenchState::new(settings.policy.clone())),
            eventbus: WorkbenchEventBus::new(settings.eventbus),
            lifecycle,
            manifests: collaborators.manifests,
            packages: collaborators.packages,
            prompt: collaborators.prompt,
            settings,
            events,
            dismissed: Mutex::new(HashSet::new()),
        });
        let event_loop = tokio::spawn(run_event_loop(Arc::clone(&context), receiver));
        Self {
            context,
            event_loop,
        }
    }

    /// Kills live processes and stops the event loop.
    pub async fn shutdown(self) {
        self.context.lifecycle.shutdown().await;
        self.event_loop.abort();
    }

    /// Queues an event behind every event submitted before it.
    pub async fn submit(&self, event: WorkbenchEvent) -> WorkbenchResult<()> {
        self.context.submit(event).await
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<WorkbenchEventEnvelope> {
        self.context.eventbus.subscribe_all()
    }

    pub fn subscribe_project(
        &self,
        project_id: ProjectId,
    ) -> broadcast::Receiver<WorkbenchEventEnvelope> {
        self.context.eventbus.subscribe_project(project_id)
    }

    /// Runs `read` against the current state without blocking the loop for
    /// longer than the closure takes.
    pub async fn read<R>(&self, read: impl FnOnce(&WorkbenchState) -> R) -> R {
        let state = self.context.state.read().await;
        read(&state)
    }

    pub async fn projects_view(&self) -> Vec<ProjectView> {
        self.read(WorkbenchState::projects_view).await
    }

    pub async fn project_view(&self, project_id: &ProjectId) -> Option<ProjectView> {
        self.read(|state| state.compose_project(project_id)).await
    }

    pub async fn selected_project_view(&self) -> Option<ProjectView> {
        self.read(WorkbenchState::selected_project_view).await
    }

    pub async fn run(&self, key: ExecutableKey) -> WorkbenchResult<()> {
        self.submit(WorkbenchEvent::RunExecutable {
            key,
            at: OffsetDateTime::now_utc(),
        })
        .await
    }

    pub async fn abort(&self, key: ExecutableKey) -> WorkbenchResult<()> {
        self.submit(WorkbenchEvent::AbortExecutable { key }).await
    }

    pub async fn clear_console(&self, key: ExecutableKey) -> WorkbenchResult<()> {
        self.submit(WorkbenchEvent::ClearConsole { key }).await
    }

    pub async fn select_project(&self, project_id: ProjectId) -> WorkbenchResult<()> {
        self.submit(WorkbenchEvent::SelectProject { project_id })
            .await
    }

    /// `version` defaults to the latest release.
    pub async fn queue_install(
        &self,
        project_id: ProjectId,
        name: impl Into<String>,
        version: Option<String>,
        updating: bool,
    ) -> WorkbenchResult<()> {
        self.submit(WorkbenchEvent::QueueDependencyInstall {
            project_id,
            name: name.into(),
            version,
            updating,
        })
        .await
    }

    pub async fn queue_uninstall(
        &self,
        project_id: ProjectId,
        name: impl Into<String>,
    ) -> WorkbenchResult<()> {
        self.submit(WorkbenchEvent::QueueDependencyUninstall {
            project_id,
            name: name.into(),
        })
        .await
    }

    pub async fn reset_all_state(&self) -> WorkbenchResult<()> {
        self.context.dismissed.lock().await.clear();
        self.submit(WorkbenchEvent::ResetAllState).await
    }

    pub async fn process_snapshot(&self) -> RuntimeProcessSnapshot {
        RuntimeProcessSnapshot {
            live_runs: self.context.lifecycle.live_runs().await.len(),
            active_stream_ingestion_tasks: self.context.lifecycle.active_stream_tasks().await,
        }
    }
}

async fn run_event_loop(context: Arc<RuntimeContext>, mut receiver: mpsc::Receiver<WorkbenchEvent>) {
    while let Some(event) = receiver.recv().await {
        context.process(event).await;
    }
    debug!("workbench event loop stopped");
}

impl RuntimeContext {
    pub(crate) async fn submit(&self, event: WorkbenchEvent) -> WorkbenchResult<()> {
        self.events.send(event).await.map_err(|_| {
            WorkbenchError::Consistency("workbench event loop is closed".to_owned())
        })
    }

    /// Effect handlers report back through here; a closed loop only happens
    /// on shutdown.
    pub(crate) async fn report(&self, event: WorkbenchEvent) {
        let name = event.name();
        if self.submit(event).await.is_err() {
            debug!(event = name, "workbench event loop closed; dropping report");
        }
    }

    pub(crate) async fn project_path(&self, project_id: &ProjectId) -> WorkbenchResult<PathBuf> {
        let state = self.state.read().await;
        state
            .paths()
            .get(project_id)
            .map(|path| path.to_path_buf())
            .ok_or_else(|| WorkbenchError::Consistency(format!("unknown project {project_id}")))
    }

    async fn process(self: &Arc<Self>, event: WorkbenchEvent) {
        let applied = {
            let mut state = self.state.write().await;
            let scope = event_scope(&state, &event);
            state.apply(&event).map(|effects| (scope, effects))
        };
        let (scope, effects) = match applied {
            Ok(applied) => applied,
            Err(error) => {
                warn!(event = event.name(), error = %error, "dropping workbench event");
                return;
            }
        };

        let removed = match &event {
            WorkbenchEvent::SaveProjectSettingsFinish { old_id, new_id, .. } => {
                self.eventbus.rename_project(old_id, new_id);
                None
            }
            WorkbenchEvent::FinishDeletingProject { project_id } => Some(project_id.clone()),
            _ => None,
        };
        self.eventbus.publish(scope, event);
        if let Some(project_id) = removed {
            self.eventbus.remove_project(&project_id);
        }

        for effect in effects {
            self.dispatch(effect).await;
        }
    }

    /// Reservations happen inline so a stop effect applied later always finds
    /// the run; everything that waits on the outside world is spawned.
    async fn dispatch(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::SpawnExecutable {
                run_id,
                key,
                project_path,
                invocation,
            } => {
                if let Err(error) = self.lifecycle.reserve(run_id).await {
                    warn!(run_id = %run_id, key = %key, error = %error, "failed to reserve run");
                    return;
                }
                let request = spawn_request(&self.settings, run_id, project_path, &invocation);
                let lifecycle = self.lifecycle.clone();
                tokio::spawn(async move {
                    if let Err(error) = lifecycle.launch(request).await {
                        debug!(run_id = %run_id, key = %key, error = %error, "run failed to launch");
                    }
                });
            }
            Effect::TerminateExecutable {
                run_id,
                key,
                strategy,
            } => {
                let lifecycle = self.lifecycle.clone();
                tokio::spawn(async move {
                    if let Err(error) = lifecycle.terminate(run_id, strategy).await {
                        debug!(
                            run_id = %run_id,
                            key = %key,
                            error = %error,
                            "stop request did not reach a live process"
                        );
                    }
                });
            }
            Effect::InstallDependencies {
                operation_id,
                project_id,
                project_path,
                dependencies,
            } => {
                tokio::spawn(dependencies::install(
                    Arc::clone(self),
                    operation_id,
                    project_id,
                    project_path,
                    dependencies,
                ));
            }
            Effect::UninstallDependencies {
                operation_id,
                project_id,
                project_path,
                names,
            } => {
                tokio::spawn(dependencies::uninstall(
                    Arc::clone(self),
                    operation_id,
                    project_id,
                    project_path,
                    names,
                ));
            }
            Effect::LoadDependencyInfo {
                project_id,
                generation,
                project_path,
                names,
            } => {
                tokio::spawn(dependencies::load_info(
                    Arc::clone(self),
                    project_id,
                    generation,
                    project_path,
                    names,
                ));
            }
            Effect::ReloadProject {
                project_id,
                project_path,
            } => {
                tokio::spawn(projects::reload(Arc::clone(self), project_id, project_path));
            }
        }
    }
}

/// Project an applied event is published under. Process events resolve
/// through the run index before the reducer may drop the run.
fn event_scope(state: &WorkbenchState, event: &WorkbenchEvent) -> Option<ProjectId> {
    match event {
        WorkbenchEvent::SaveProjectSettingsFinish { new_id, .. } => Some(new_id.clone()),
        WorkbenchEvent::ProcessAttached { run_id, .. }
        | WorkbenchEvent::ProcessOutput { run_id, .. }
        | WorkbenchEvent::ProcessExited { run_id, .. }
        | WorkbenchEvent::ProcessAborted { run_id, .. } => state
            .run_owner(*run_id)
            .map(|key| key.project_id().clone()),
        WorkbenchEvent::InstallDependenciesFinish { operation_id, .. }
        | WorkbenchEvent::InstallDependenciesError { operation_id, .. }
        | WorkbenchEvent::UninstallDependenciesFinish { operation_id, .. }
        | WorkbenchEvent::UninstallDependenciesError { operation_id, .. } => state
            .queues()
            .project_for_operation(*operation_id)
            .cloned()
            .or_else(|| event.project_id().cloned()),
        _ => event.project_id().cloned(),
    }
}
