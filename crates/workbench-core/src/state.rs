//! The reducer. Every transition is synchronous, validates before it mutates
//! and returns the external work it wants done as [`Effect`]s.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::{debug, warn};
use workbench_protocol::{
    DependencySpec, LogEntryId, Manifest, OperationId, ProjectId, RunId, StopStrategy,
    DEFAULT_BATCH_LIMIT, DEFAULT_RELOAD_AFTER, DEFAULT_SUSTAINED_TASKS,
};

use crate::effects::{Effect, Invocation};
use crate::error::ConsistencyError;
use crate::events::WorkbenchEvent;
use crate::execution::{ExecutableKey, Execution};
use crate::queue::{DependencyQueues, QueuedDependency, StartedOperation};
use crate::selection::SelectionState;
use crate::status::{QueueAction, TaskKind};
use crate::stores::{
    slugify, CommandStore, DependencyStore, LoadedProject, PathStore, ProjectMetadata,
    ProjectRecord, ProjectStore, TaskStore,
};

const LATEST_VERSION: &str = "latest";

/// Knobs the reducer reads from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorePolicy {
    /// Script names that keep running until stopped.
    pub sustained_tasks: BTreeSet<String>,
    /// Script names whose success triggers a reload of the project.
    pub reload_after: BTreeSet<String>,
    pub batch_limit: usize,
}

impl Default for CorePolicy {
    fn default() -> Self {
        Self {
            sustained_tasks: DEFAULT_SUSTAINED_TASKS.iter().map(|s| (*s).to_owned()).collect(),
            reload_after: DEFAULT_RELOAD_AFTER.iter().map(|s| (*s).to_owned()).collect(),
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }
}

/// `requested` is the generation of the newest info load in flight;
/// `current` moves on every confirmed install or uninstall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InfoGeneration {
    requested: u64,
    current: u64,
}

#[derive(Debug, Clone, Default)]
pub struct WorkbenchState {
    pub(crate) projects: ProjectStore,
    pub(crate) paths: PathStore,
    pub(crate) tasks: TaskStore,
    pub(crate) commands: CommandStore,
    pub(crate) dependencies: DependencyStore,
    pub(crate) queues: DependencyQueues,
    runs: HashMap<RunId, ExecutableKey>,
    pub(crate) selection: SelectionState,
    next_run_id: u64,
    next_log_id: u64,
    info_generations: HashMap<ProjectId, InfoGeneration>,
    next_info_generation: u64,
    policy: CorePolicy,
}

impl WorkbenchState {
    pub fn new(policy: CorePolicy) -> Self {
        Self {
            queues: DependencyQueues::new(policy.batch_limit),
            policy,
            ..Self::default()
        }
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    pub fn paths(&self) -> &PathStore {
        &self.paths
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn commands(&self) -> &CommandStore {
        &self.commands
    }

    pub fn dependencies(&self) -> &DependencyStore {
        &self.dependencies
    }

    pub fn queues(&self) -> &DependencyQueues {
        &self.queues
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn policy(&self) -> &CorePolicy {
        &self.policy
    }

    pub fn execution(&self, key: &ExecutableKey) -> Option<&Execution> {
        match key {
            ExecutableKey::Task { project_id, name } => {
                self.tasks.get(project_id, name).map(|task| &task.execution)
            }
            ExecutableKey::Command {
                project_id,
                identifier,
            } => self
                .commands
                .get(project_id, identifier)
                .map(|command| &command.execution),
        }
    }

    /// Executable currently owning `run_id`, if any.
    pub fn run_owner(&self, run_id: RunId) -> Option<&ExecutableKey> {
        self.runs.get(&run_id)
    }

    /// Applies one event. On error nothing has been mutated.
    pub fn apply(&mut self, event: &WorkbenchEvent) -> Result<Vec<Effect>, ConsistencyError> {
        let effects = self.reduce(event)?;
        self.selection.advance_onboarding(event);
        Ok(effects)
    }

    fn reduce(&mut self, event: &WorkbenchEvent) -> Result<Vec<Effect>, ConsistencyError> {
        match event {
            WorkbenchEvent::RefreshProjectsFinish { projects } => Ok(self.refresh(projects)),
            WorkbenchEvent::AddProject(project) | WorkbenchEvent::ImportProjectFinish(project) => {
                let onboarding_completed = self.selection.onboarding().is_completed();
                let effects = self.insert_project(project);
                self.selection
                    .project_arrived(project.id(), onboarding_completed);
                Ok(effects)
            }
            WorkbenchEvent::ProjectReloaded(project) => {
                self.require_project(project.id())?;
                Ok(self.insert_project(project))
            }
            WorkbenchEvent::FinishDeletingProject { project_id } => {
                let effects = self.remove_project(project_id);
                self.selection.project_removed(project_id);
                Ok(effects)
            }
            WorkbenchEvent::SaveProjectSettingsFinish {
                old_id,
                new_id,
                name,
                metadata,
                new_path,
            } => {
                self.rename_project(old_id, new_id, name, metadata, new_path)?;
                Ok(Vec::new())
            }
            WorkbenchEvent::ImportProjectFailed { .. }
            | WorkbenchEvent::SaveProjectSettingsFailed { .. }
            | WorkbenchEvent::CommandSaveFailed { .. } => Ok(Vec::new()),
            WorkbenchEvent::PluginMenuSaved { project_id, menu } => {
                let record = self.record_mut(project_id)?;
                record.manifest.plugin_mut().menu = Some(menu.clone());
                Ok(Vec::new())
            }
            WorkbenchEvent::CommandSaved {
                project_id,
                command,
            } => {
                let record = self.record_mut(project_id)?;
                record.manifest.plugin_mut().upsert_command(command);
                self.commands.save(project_id, command);
                Ok(Vec::new())
            }
            WorkbenchEvent::CommandDeleted {
                project_id,
                identifier,
            } => {
                let record = self.record_mut(project_id)?;
                if let Some(plugin) = record.manifest.plugin.as_mut() {
                    plugin.remove_command(identifier);
                }
                let mut effects = Vec::new();
                if let Some(command) = self.commands.remove(project_id, identifier) {
                    effects.extend(self.terminate_if_active(&command.key(), &command.execution));
                }
                Ok(effects)
            }
            WorkbenchEvent::SelectProject { project_id } => {
                self.require_project(project_id)?;
                self.selection.select(project_id.clone());
                Ok(Vec::new())
            }
            WorkbenchEvent::CreateNewProjectStart
            | WorkbenchEvent::CreateNewProjectCancel
            | WorkbenchEvent::DismissSidebarIntro => Ok(Vec::new()),
            WorkbenchEvent::RunExecutable { key, at } => self.run_executable(key, *at),
            WorkbenchEvent::ProcessAttached { run_id, process_id } => {
                let key = self.owner_of(*run_id)?;
                self.execution_mut(&key)?
                    .attach(&key, *run_id, *process_id)?;
                Ok(Vec::new())
            }
            WorkbenchEvent::ProcessOutput {
                run_id,
                text,
                is_error,
            } => {
                let key = self.owner_of(*run_id)?;
                let log_id = self
                    .next_log_id
                    .checked_add(1)
                    .expect("log entry id space exhausted");
                self.execution_mut(&key)?.append_output(
                    &key,
                    *run_id,
                    LogEntryId::new(log_id),
                    text.clone(),
                    *is_error,
                )?;
                self.next_log_id = log_id;
                Ok(Vec::new())
            }
            WorkbenchEvent::ProcessExited {
                run_id,
                at,
                success,
            } => self.process_exited(*run_id, *at, *success),
            WorkbenchEvent::AbortExecutable { key } => self.abort_executable(key),
            WorkbenchEvent::ProcessAborted { run_id, at } => {
                let key = self.owner_of(*run_id)?;
                self.execution_mut(&key)?.mark_aborted(&key, *run_id, *at)?;
                Ok(Vec::new())
            }
            WorkbenchEvent::ClearConsole { key } => {
                self.execution_mut(key)?.clear_output();
                Ok(Vec::new())
            }
            WorkbenchEvent::QueueDependencyInstall {
                project_id,
                name,
                version,
                updating,
            } => {
                self.require_project(project_id)?;
                self.queues.enqueue(
                    project_id,
                    QueuedDependency::install(name.clone(), version.clone(), *updating),
                );
                Ok(self.start_next(project_id))
            }
            WorkbenchEvent::QueueDependencyUninstall { project_id, name } => {
                self.require_project(project_id)?;
                self.queues
                    .enqueue(project_id, QueuedDependency::uninstall(name.clone()));
                Ok(self.start_next(project_id))
            }
            WorkbenchEvent::InstallDependenciesFinish {
                operation_id,
                dependencies,
                ..
            } => {
                let project_id = self.finish_operation(*operation_id)?;
                self.mark_dependencies_changed(&project_id);
                self.dependencies.apply_installed(&project_id, dependencies);
                if let Some(record) = self.projects.get_mut(&project_id) {
                    record_installed(&mut record.manifest, dependencies);
                }
                Ok(self.start_next(&project_id))
            }
            WorkbenchEvent::UninstallDependenciesFinish {
                operation_id,
                names,
                ..
            } => {
                let project_id = self.finish_operation(*operation_id)?;
                self.mark_dependencies_changed(&project_id);
                self.dependencies.apply_uninstalled(&project_id, names);
                if let Some(record) = self.projects.get_mut(&project_id) {
                    for name in names {
                        record.manifest.dependencies.remove(name);
                        record.manifest.dev_dependencies.remove(name);
                    }
                }
                Ok(self.start_next(&project_id))
            }
            WorkbenchEvent::InstallDependenciesError {
                operation_id,
                error,
                ..
            }
            | WorkbenchEvent::UninstallDependenciesError {
                operation_id,
                error,
                ..
            } => {
                let project_id = self.finish_operation(*operation_id)?;
                warn!(
                    project_id = %project_id,
                    operation_id = %operation_id,
                    error = %error,
                    "dependency operation failed; continuing with the rest of the queue"
                );
                Ok(self.start_next(&project_id))
            }
            WorkbenchEvent::DependencyInfoLoaded {
                project_id,
                generation,
                dependencies,
            } => self.dependency_info_loaded(project_id, *generation, dependencies),
            WorkbenchEvent::DependencyLatestVersionFound {
                project_id,
                name,
                latest_version,
            } => {
                self.require_project(project_id)?;
                if !self
                    .dependencies
                    .set_latest_version(project_id, name, latest_version.clone())
                {
                    debug!(project_id = %project_id, name, "latest version for a dependency that is not installed");
                }
                Ok(Vec::new())
            }
            WorkbenchEvent::ResetAllState => Ok(self.reset()),
        }
    }

    fn refresh(&mut self, projects: &[LoadedProject]) -> Vec<Effect> {
        let found: HashSet<&ProjectId> = projects.iter().map(LoadedProject::id).collect();
        let missing: Vec<ProjectId> = self
            .projects
            .ids()
            .filter(|project_id| !found.contains(project_id))
            .cloned()
            .collect();

        let mut effects = Vec::new();
        for project_id in &missing {
            effects.extend(self.remove_project(project_id));
        }
        for project in projects {
            effects.extend(self.insert_project(project));
        }
        let projects = &self.projects;
        self.selection
            .retain_if(|selected| projects.contains(selected));
        effects
    }

    /// Tasks and commands that disappear from the manifest take their live
    /// runs down with them.
    fn insert_project(&mut self, project: &LoadedProject) -> Vec<Effect> {
        let project_id = project.id().clone();
        let manifest = &project.record.manifest;

        let dropped_tasks =
            self.tasks
                .reconcile(&project_id, &manifest.scripts, &self.policy.sustained_tasks);
        let definitions = manifest
            .plugin
            .as_ref()
            .map(|plugin| plugin.commands.as_slice())
            .unwrap_or_default();
        let dropped_commands = self.commands.reconcile(&project_id, definitions);
        let mut effects: Vec<Effect> = dropped_tasks
            .iter()
            .filter_map(|task| self.terminate_if_active(&task.key(), &task.execution))
            .chain(
                dropped_commands
                    .iter()
                    .filter_map(|command| self.terminate_if_active(&command.key(), &command.execution)),
            )
            .collect();

        self.paths.insert(project_id.clone(), project.path.clone());
        self.projects.insert(project.record.clone());
        self.prune_runs();

        effects.extend(self.request_dependency_info(&project_id));
        effects
    }

    /// Starts a new info load for the project; any load still in flight
    /// becomes stale.
    fn request_dependency_info(&mut self, project_id: &ProjectId) -> Option<Effect> {
        let project_path = self.paths.get(project_id)?.to_path_buf();
        let names = self.projects.get(project_id)?.manifest.declared_dependency_names();
        let generation = self.next_info_generation();
        self.info_generations.insert(
            project_id.clone(),
            InfoGeneration {
                requested: generation,
                current: generation,
            },
        );
        Some(Effect::LoadDependencyInfo {
            project_id: project_id.clone(),
            generation,
            project_path,
            names,
        })
    }

    fn mark_dependencies_changed(&mut self, project_id: &ProjectId) {
        let generation = self.next_info_generation();
        if let Some(tracked) = self.info_generations.get_mut(project_id) {
            tracked.current = generation;
        }
    }

    fn next_info_generation(&mut self) -> u64 {
        let generation = self
            .next_info_generation
            .checked_add(1)
            .expect("dependency info generation space exhausted");
        self.next_info_generation = generation;
        generation
    }

    /// A load only replaces the installed set when no install or uninstall
    /// was confirmed after it was requested. The newest load overtaken that
    /// way is requested again; older ones are dropped.
    fn dependency_info_loaded(
        &mut self,
        project_id: &ProjectId,
        generation: u64,
        dependencies: &[DependencySpec],
    ) -> Result<Vec<Effect>, ConsistencyError> {
        self.require_project(project_id)?;
        let stale = || ConsistencyError::StaleDependencyInfo {
            project_id: project_id.clone(),
            generation,
        };
        let tracked = self.info_generations.get(project_id).copied().ok_or_else(stale)?;
        if generation == tracked.current {
            self.dependencies.replace_installed(project_id, dependencies);
            return Ok(Vec::new());
        }
        if generation != tracked.requested {
            return Err(stale());
        }
        debug!(
            project_id = %project_id,
            generation,
            "dependencies changed while loading info; reloading"
        );
        Ok(self.request_dependency_info(project_id).into_iter().collect())
    }

    #[cfg(test)]
    pub(crate) fn requested_info_generation(&self, project_id: &ProjectId) -> Option<u64> {
        self.info_generations
            .get(project_id)
            .map(|tracked| tracked.requested)
    }

    /// Drops every trace of the project. Unknown projects are a no-op.
    fn remove_project(&mut self, project_id: &ProjectId) -> Vec<Effect> {
        let effects = self.terminate_project_runs(project_id);
        self.projects.remove(project_id);
        self.paths.remove(project_id);
        self.tasks.remove_project(project_id);
        self.commands.remove_project(project_id);
        self.dependencies.remove_project(project_id);
        self.queues.remove_project(project_id);
        self.info_generations.remove(project_id);
        self.runs.retain(|_, key| key.project_id() != project_id);
        effects
    }

    fn rename_project(
        &mut self,
        old_id: &ProjectId,
        new_id: &ProjectId,
        name: &str,
        metadata: &ProjectMetadata,
        new_path: &Path,
    ) -> Result<(), ConsistencyError> {
        self.require_project(old_id)?;
        if old_id != new_id && self.projects.contains(new_id) {
            return Err(ConsistencyError::RenameTargetExists {
                from: old_id.clone(),
                to: new_id.clone(),
            });
        }

        self.projects.rekey(old_id, new_id, |record| {
            record.name = name.to_owned();
            record.icon = metadata.icon.clone();
            record.manifest.name = slugify(name);
            record.manifest.description = metadata.description.clone();
            record.manifest.homepage = metadata.homepage.clone();
            record.manifest.plugin_mut().name = Some(name.to_owned());
        });
        self.paths.rekey(old_id, new_id, new_path.to_path_buf());
        if old_id != new_id {
            self.tasks.rekey_tasks(old_id, new_id);
            self.commands.rekey_commands(old_id, new_id);
            self.dependencies.rekey(old_id, new_id);
            self.queues.rekey_project(old_id, new_id);
            if let Some(tracked) = self.info_generations.remove(old_id) {
                self.info_generations.insert(new_id.clone(), tracked);
            }
            for key in self.runs.values_mut() {
                if key.project_id() == old_id {
                    *key = key.with_project(new_id.clone());
                }
            }
        }
        self.selection.select(new_id.clone());
        Ok(())
    }

    fn run_executable(
        &mut self,
        key: &ExecutableKey,
        at: OffsetDateTime,
    ) -> Result<Vec<Effect>, ConsistencyError> {
        let project_path = self.project_path(key.project_id())?;
        let run_id = RunId::new(
            self.next_run_id
                .checked_add(1)
                .expect("run id space exhausted"),
        );

        let execution = self.execution_mut(key)?;
        let previous_run = execution.run_id;
        execution.request(key, run_id, at)?;

        self.next_run_id = run_id.get();
        if let Some(previous_run) = previous_run {
            self.runs.remove(&previous_run);
        }
        self.runs.insert(run_id, key.clone());

        let invocation = match key {
            ExecutableKey::Task { name, .. } => Invocation::Script { name: name.clone() },
            ExecutableKey::Command { identifier, .. } => Invocation::PluginCommand {
                identifier: identifier.clone(),
            },
        };
        Ok(vec![Effect::SpawnExecutable {
            run_id,
            key: key.clone(),
            project_path,
            invocation,
        }])
    }

    fn process_exited(
        &mut self,
        run_id: RunId,
        at: OffsetDateTime,
        success: bool,
    ) -> Result<Vec<Effect>, ConsistencyError> {
        let key = self.owner_of(run_id)?;
        let execution = self.execution_mut(&key)?;
        if execution.abort_requested {
            execution.mark_aborted(&key, run_id, at)?;
            return Ok(Vec::new());
        }
        execution.complete(&key, run_id, at, success)?;

        match &key {
            ExecutableKey::Task { project_id, name }
                if success && self.policy.reload_after.contains(name.as_str()) =>
            {
                let project_path = self.project_path(project_id)?;
                Ok(vec![Effect::ReloadProject {
                    project_id: project_id.clone(),
                    project_path,
                }])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn abort_executable(&mut self, key: &ExecutableKey) -> Result<Vec<Effect>, ConsistencyError> {
        let strategy = match key {
            ExecutableKey::Task { project_id, name } => match self.tasks.get(project_id, name) {
                Some(task) if task.kind == TaskKind::Sustained => StopStrategy::Interrupt,
                _ => StopStrategy::Kill,
            },
            ExecutableKey::Command { .. } => StopStrategy::Kill,
        };
        let run_id = self.execution_mut(key)?.request_abort(key)?;
        Ok(vec![Effect::TerminateExecutable {
            run_id,
            key: key.clone(),
            strategy,
        }])
    }

    fn start_next(&mut self, project_id: &ProjectId) -> Vec<Effect> {
        let Some(project_path) = self.paths.get(project_id).map(Path::to_path_buf) else {
            return Vec::new();
        };
        let Some(started) = self.queues.start_next(project_id) else {
            return Vec::new();
        };
        debug!(
            project_id = %project_id,
            operation_id = %started.operation_id,
            entries = started.entries.len(),
            "starting dependency operation"
        );
        vec![operation_effect(started, project_path)]
    }

    fn finish_operation(&mut self, operation_id: OperationId) -> Result<ProjectId, ConsistencyError> {
        self.queues
            .finish(operation_id)
            .ok_or(ConsistencyError::UnknownOperation(operation_id))
    }

    fn reset(&mut self) -> Vec<Effect> {
        let ids: Vec<ProjectId> = self.projects.ids().cloned().collect();
        let effects: Vec<Effect> = ids
            .iter()
            .flat_map(|project_id| self.terminate_project_runs(project_id))
            .collect();
        let onboarding = self.selection.onboarding();
        let next = Self {
            next_run_id: self.next_run_id,
            next_log_id: self.next_log_id,
            next_info_generation: self.next_info_generation,
            ..Self::new(self.policy.clone())
        };
        *self = next;
        self.selection = SelectionState::after_reset(onboarding);
        effects
    }

    fn terminate_project_runs(&self, project_id: &ProjectId) -> Vec<Effect> {
        let tasks = self
            .tasks
            .for_project(project_id)
            .filter_map(|task| self.terminate_if_active(&task.key(), &task.execution));
        let commands = self
            .commands
            .for_project(project_id)
            .filter_map(|command| self.terminate_if_active(&command.key(), &command.execution));
        tasks.chain(commands).collect()
    }

    fn terminate_if_active(&self, key: &ExecutableKey, execution: &Execution) -> Option<Effect> {
        let run_id = execution.run_id.filter(|_| execution.is_active())?;
        Some(Effect::TerminateExecutable {
            run_id,
            key: key.clone(),
            strategy: StopStrategy::Kill,
        })
    }

    fn prune_runs(&mut self) {
        let tasks = &self.tasks;
        let commands = &self.commands;
        self.runs.retain(|run_id, key| {
            match key {
                ExecutableKey::Task { project_id, name } => tasks
                    .get(project_id, name)
                    .is_some_and(|task| task.execution.run_id == Some(*run_id)),
                ExecutableKey::Command {
                    project_id,
                    identifier,
                } => commands
                    .get(project_id, identifier)
                    .is_some_and(|command| command.execution.run_id == Some(*run_id)),
            }
        });
    }

    fn owner_of(&self, run_id: RunId) -> Result<ExecutableKey, ConsistencyError> {
        self.runs
            .get(&run_id)
            .cloned()
            .ok_or(ConsistencyError::UnknownRun(run_id))
    }

    fn require_project(&self, project_id: &ProjectId) -> Result<(), ConsistencyError> {
        if self.projects.contains(project_id) {
            Ok(())
        } else {
            Err(ConsistencyError::UnknownProject(project_id.clone()))
        }
    }

    fn record_mut(
        &mut self,
        project_id: &ProjectId,
    ) -> Result<&mut ProjectRecord, ConsistencyError> {
        self.projects
            .get_mut(project_id)
            .ok_or_else(|| ConsistencyError::UnknownProject(project_id.clone()))
    }

    fn project_path(&self, project_id: &ProjectId) -> Result<PathBuf, ConsistencyError> {
        self.paths
            .get(project_id)
            .map(Path::to_path_buf)
            .ok_or_else(|| ConsistencyError::UnknownProject(project_id.clone()))
    }

    fn execution_mut(&mut self, key: &ExecutableKey) -> Result<&mut Execution, ConsistencyError> {
        let execution = match key {
            ExecutableKey::Task { project_id, name } => self
                .tasks
                .get_mut(project_id, name)
                .map(|task| &mut task.execution),
            ExecutableKey::Command {
                project_id,
                identifier,
            } => self
                .commands
                .get_mut(project_id, identifier)
                .map(|command| &mut command.execution),
        };
        execution.ok_or_else(|| ConsistencyError::UnknownExecutable(key.clone()))
    }
}

fn operation_effect(started: StartedOperation, project_path: PathBuf) -> Effect {
    let StartedOperation {
        operation_id,
        project_id,
        action,
        entries,
    } = started;
    match action {
        QueueAction::Install => Effect::InstallDependencies {
            operation_id,
            project_id,
            project_path,
            dependencies: entries
                .into_iter()
                .map(|entry| {
                    let version = entry.version.unwrap_or_else(|| LATEST_VERSION.to_owned());
                    DependencySpec::new(entry.name, version)
                })
                .collect(),
        },
        QueueAction::Uninstall => Effect::UninstallDependencies {
            operation_id,
            project_id,
            project_path,
            names: entries.into_iter().map(|entry| entry.name).collect(),
        },
    }
}

/// Dev dependencies stay dev dependencies; anything else lands in
/// `dependencies`.
fn record_installed(manifest: &mut Manifest, installed: &[DependencySpec]) {
    for spec in installed {
        match manifest.dev_dependencies.get_mut(&spec.name) {
            Some(version) => *version = spec.version.clone(),
            None => {
                manifest
                    .dependencies
                    .insert(spec.name.clone(), spec.version.clone());
            }
        }
    }
}
