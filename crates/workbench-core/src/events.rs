use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use workbench_protocol::{
    CommandId, DependencySpec, OperationId, PluginCommandDef, PluginMenu, ProcessId, ProjectId,
    RunId,
};

use crate::execution::ExecutableKey;
use crate::stores::{LoadedProject, ProjectMetadata};

/// Closed set of facts the reducer understands. Intents come from the user;
/// completion and progress events come back from effect handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkbenchEvent {
    /// Full rescan of every known project directory.
    RefreshProjectsFinish {
        projects: Vec<LoadedProject>,
    },
    AddProject(LoadedProject),
    ImportProjectFinish(LoadedProject),
    ImportProjectFailed {
        path: PathBuf,
        error: String,
    },
    ProjectReloaded(LoadedProject),
    FinishDeletingProject {
        project_id: ProjectId,
    },
    SaveProjectSettingsFinish {
        old_id: ProjectId,
        new_id: ProjectId,
        name: String,
        metadata: ProjectMetadata,
        new_path: PathBuf,
    },
    SaveProjectSettingsFailed {
        project_id: ProjectId,
        error: String,
    },
    PluginMenuSaved {
        project_id: ProjectId,
        menu: PluginMenu<CommandId>,
    },
    CommandSaved {
        project_id: ProjectId,
        command: PluginCommandDef,
    },
    CommandDeleted {
        project_id: ProjectId,
        identifier: CommandId,
    },
    CommandSaveFailed {
        project_id: ProjectId,
        error: String,
    },

    SelectProject {
        project_id: ProjectId,
    },
    CreateNewProjectStart,
    CreateNewProjectCancel,
    DismissSidebarIntro,

    RunExecutable {
        key: ExecutableKey,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    ProcessAttached {
        run_id: RunId,
        process_id: ProcessId,
    },
    ProcessOutput {
        run_id: RunId,
        text: String,
        is_error: bool,
    },
    ProcessExited {
        run_id: RunId,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        success: bool,
    },
    AbortExecutable {
        key: ExecutableKey,
    },
    ProcessAborted {
        run_id: RunId,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    ClearConsole {
        key: ExecutableKey,
    },

    QueueDependencyInstall {
        project_id: ProjectId,
        name: String,
        version: Option<String>,
        updating: bool,
    },
    QueueDependencyUninstall {
        project_id: ProjectId,
        name: String,
    },
    InstallDependenciesFinish {
        operation_id: OperationId,
        project_id: ProjectId,
        dependencies: Vec<DependencySpec>,
    },
    InstallDependenciesError {
        operation_id: OperationId,
        project_id: ProjectId,
        error: String,
    },
    UninstallDependenciesFinish {
        operation_id: OperationId,
        project_id: ProjectId,
        names: Vec<String>,
    },
    UninstallDependenciesError {
        operation_id: OperationId,
        project_id: ProjectId,
        error: String,
    },
    /// Answers the `LoadDependencyInfo` effect carrying the same
    /// `generation`; a load overtaken by a confirmed install or uninstall is
    /// stale.
    DependencyInfoLoaded {
        project_id: ProjectId,
        generation: u64,
        dependencies: Vec<DependencySpec>,
    },
    /// Submitted by callers that look up registry releases; the runtime
    /// itself never produces it.
    DependencyLatestVersionFound {
        project_id: ProjectId,
        name: String,
        latest_version: String,
    },

    ResetAllState,
}

impl WorkbenchEvent {
    /// Project the event is scoped to, when it names one directly. Process
    /// events only carry a run id and resolve through the state.
    pub fn project_id(&self) -> Option<&ProjectId> {
        match self {
            Self::AddProject(project)
            | Self::ImportProjectFinish(project)
            | Self::ProjectReloaded(project) => Some(project.id()),
            Self::SaveProjectSettingsFinish { new_id, .. } => Some(new_id),
            Self::FinishDeletingProject { project_id }
            | Self::SaveProjectSettingsFailed { project_id, .. }
            | Self::PluginMenuSaved { project_id, .. }
            | Self::CommandSaved { project_id, .. }
            | Self::CommandDeleted { project_id, .. }
            | Self::CommandSaveFailed { project_id, .. }
            | Self::SelectProject { project_id }
            | Self::QueueDependencyInstall { project_id, .. }
            | Self::QueueDependencyUninstall { project_id, .. }
            | Self::InstallDependenciesFinish { project_id, .. }
            | Self::InstallDependenciesError { project_id, .. }
            | Self::UninstallDependenciesFinish { project_id, .. }
            | Self::UninstallDependenciesError { project_id, .. }
            | Self::DependencyInfoLoaded { project_id, .. }
            | Self::DependencyLatestVersionFound { project_id, .. } => Some(project_id),
            Self::RunExecutable { key, .. }
            | Self::AbortExecutable { key }
            | Self::ClearConsole { key } => Some(key.project_id()),
            Self::RefreshProjectsFinish { .. }
            | Self::ImportProjectFailed { .. }
            | Self::CreateNewProjectStart
            | Self::CreateNewProjectCancel
            | Self::DismissSidebarIntro
            | Self::ProcessAttached { .. }
            | Self::ProcessOutput { .. }
            | Self::ProcessExited { .. }
            | Self::ProcessAborted { .. }
            | Self::ResetAllState => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RefreshProjectsFinish { .. } => "refresh-projects-finish",
            Self::AddProject(_) => "add-project",
            Self::ImportProjectFinish(_) => "import-project-finish",
            Self::ImportProjectFailed { .. } => "import-project-failed",
            Self::ProjectReloaded(_) => "project-reloaded",
            Self::FinishDeletingProject { .. } => "finish-deleting-project",
            Self::SaveProjectSettingsFinish { .. } => "save-project-settings-finish",
            Self::SaveProjectSettingsFailed { .. } => "save-project-settings-failed",
            Self::PluginMenuSaved { .. } => "plugin-menu-saved",
            Self::CommandSaved { .. } => "command-saved",
            Self::CommandDeleted { .. } => "command-deleted",
            Self::CommandSaveFailed { .. } => "command-save-failed",
            Self::SelectProject { .. } => "select-project",
            Self::CreateNewProjectStart => "create-new-project-start",
            Self::CreateNewProjectCancel => "create-new-project-cancel",
            Self::DismissSidebarIntro => "dismiss-sidebar-intro",
            Self::RunExecutable { .. } => "run-executable",
            Self::ProcessAttached { .. } => "process-attached",
            Self::ProcessOutput { .. } => "process-output",
            Self::ProcessExited { .. } => "process-exited",
            Self::AbortExecutable { .. } => "abort-executable",
            Self::ProcessAborted { .. } => "process-aborted",
            Self::ClearConsole { .. } => "clear-console",
            Self::QueueDependencyInstall { .. } => "queue-dependency-install",
            Self::QueueDependencyUninstall { .. } => "queue-dependency-uninstall",
            Self::InstallDependenciesFinish { .. } => "install-dependencies-finish",
            Self::InstallDependenciesError { .. } => "install-dependencies-error",
            Self::UninstallDependenciesFinish { .. } => "uninstall-dependencies-finish",
            Self::UninstallDependenciesError { .. } => "uninstall-dependencies-error",
            Self::DependencyInfoLoaded { .. } => "dependency-info-loaded",
            Self::DependencyLatestVersionFound { .. } => "dependency-latest-version-found",
            Self::ResetAllState => "reset-all-state",
        }
    }
}
