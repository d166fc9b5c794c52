use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use workbench_protocol::{CommandId, DependencySpec, OperationId, ProjectId, RunId, StopStrategy, TaskName};

use crate::execution::ExecutableKey;

/// What a spawned run executes inside the project directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Invocation {
    Script { name: TaskName },
    PluginCommand { identifier: CommandId },
}

/// External work requested by the reducer. Effects are executed outside the
/// state and report back exclusively through further events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Effect {
    SpawnExecutable {
        run_id: RunId,
        key: ExecutableKey,
        project_path: PathBuf,
        invocation: Invocation,
    },
    TerminateExecutable {
        run_id: RunId,
        key: ExecutableKey,
        strategy: StopStrategy,
    },
    InstallDependencies {
        operation_id: OperationId,
        project_id: ProjectId,
        project_path: PathBuf,
        dependencies: Vec<DependencySpec>,
    },
    UninstallDependencies {
        operation_id: OperationId,
        project_id: ProjectId,
        project_path: PathBuf,
        names: Vec<String>,
    },
    LoadDependencyInfo {
        project_id: ProjectId,
        generation: u64,
        project_path: PathBuf,
        names: Vec<String>,
    },
    ReloadProject {
        project_id: ProjectId,
        project_path: PathBuf,
    },
}
