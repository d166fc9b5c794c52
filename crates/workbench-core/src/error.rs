use thiserror::Error;
use workbench_protocol::{OperationId, ProjectId, RunId, WorkbenchError};

use crate::execution::ExecutableKey;
use crate::status::ExecutionStatus;

/// Events the reducer refuses to apply. These come from stale listeners or
/// races with removal, never from something the user can act on, so callers
/// log and drop them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("unknown project `{0}`")]
    UnknownProject(ProjectId),
    #[error("unknown executable {0}")]
    UnknownExecutable(ExecutableKey),
    #[error("no executable owns run {0}")]
    UnknownRun(RunId),
    #[error("run {run_id} is stale; {key} is on a newer run")]
    StaleRun { run_id: RunId, key: ExecutableKey },
    #[error("{key} already finished as {status:?}; dropping {what}")]
    TerminalState {
        key: ExecutableKey,
        status: ExecutionStatus,
        what: &'static str,
    },
    #[error("{key} is already {status:?}")]
    AlreadyActive {
        key: ExecutableKey,
        status: ExecutionStatus,
    },
    #[error("{key} has not been started")]
    NotStarted { key: ExecutableKey },
    #[error("dependency info generation {generation} for `{project_id}` was superseded")]
    StaleDependencyInfo {
        project_id: ProjectId,
        generation: u64,
    },
    #[error("no queued dependency operation {0} is in flight")]
    UnknownOperation(OperationId),
    #[error("cannot rename `{from}` to `{to}`: a project with that id already exists")]
    RenameTargetExists { from: ProjectId, to: ProjectId },
}

impl From<ConsistencyError> for WorkbenchError {
    fn from(value: ConsistencyError) -> Self {
        WorkbenchError::Consistency(value.to_string())
    }
}
