//! Lifecycle of one externally spawned run of a task or command.
//!
//! `idle -> pending -> running -> {success, failed, aborted}`. Attaching a
//! process handle is what promotes `pending` to `running`. Terminal states
//! only move again through a fresh `request`, which resets the log and the
//! handle. Every run gets its own `RunId`; process-side updates carrying any
//! other run id are refused.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use workbench_protocol::{CommandId, LogEntryId, ProcessId, ProjectId, RunId, TaskName};

use crate::error::ConsistencyError;
use crate::status::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExecutableKey {
    Task {
        project_id: ProjectId,
        name: TaskName,
    },
    Command {
        project_id: ProjectId,
        identifier: CommandId,
    },
}

impl ExecutableKey {
    pub fn task(project_id: impl Into<ProjectId>, name: impl Into<TaskName>) -> Self {
        Self::Task {
            project_id: project_id.into(),
            name: name.into(),
        }
    }

    pub fn command(project_id: impl Into<ProjectId>, identifier: impl Into<CommandId>) -> Self {
        Self::Command {
            project_id: project_id.into(),
            identifier: identifier.into(),
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        match self {
            Self::Task { project_id, .. } | Self::Command { project_id, .. } => project_id,
        }
    }

    pub(crate) fn with_project(&self, project_id: ProjectId) -> Self {
        match self {
            Self::Task { name, .. } => Self::Task {
                project_id,
                name: name.clone(),
            },
            Self::Command { identifier, .. } => Self::Command {
                project_id,
                identifier: identifier.clone(),
            },
        }
    }
}

impl fmt::Display for ExecutableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task { project_id, name } => write!(f, "task `{project_id}/{name}`"),
            Self::Command {
                project_id,
                identifier,
            } => write!(f, "command `{project_id}/{identifier}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogEntryId,
    pub order: usize,
    pub text: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Execution {
    pub status: ExecutionStatus,
    pub run_id: Option<RunId>,
    pub process_id: Option<ProcessId>,
    pub abort_requested: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    pub logs: Vec<LogEntry>,
}

impl Execution {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn request(
        &mut self,
        key: &ExecutableKey,
        run_id: RunId,
        at: OffsetDateTime,
    ) -> Result<(), ConsistencyError> {
        if self.status.is_active() {
            return Err(ConsistencyError::AlreadyActive {
                key: key.clone(),
                status: self.status,
            });
        }

        *self = Self {
            status: ExecutionStatus::Pending,
            run_id: Some(run_id),
            started_at: Some(at),
            ..Self::default()
        };
        Ok(())
    }

    pub fn attach(
        &mut self,
        key: &ExecutableKey,
        run_id: RunId,
        process_id: ProcessId,
    ) -> Result<(), ConsistencyError> {
        self.ensure_live(key, run_id, "process attach")?;
        if self.process_id.is_some() {
            return Err(ConsistencyError::AlreadyActive {
                key: key.clone(),
                status: self.status,
            });
        }
        self.process_id = Some(process_id);
        self.status = ExecutionStatus::Running;
        Ok(())
    }

    pub fn append_output(
        &mut self,
        key: &ExecutableKey,
        run_id: RunId,
        id: LogEntryId,
        text: String,
        is_error: bool,
    ) -> Result<(), ConsistencyError> {
        self.ensure_live(key, run_id, "output")?;
        let order = self.logs.len();
        self.logs.push(LogEntry {
            id,
            order,
            text,
            is_error,
        });
        Ok(())
    }

    pub fn complete(
        &mut self,
        key: &ExecutableKey,
        run_id: RunId,
        at: OffsetDateTime,
        success: bool,
    ) -> Result<(), ConsistencyError> {
        self.ensure_live(key, run_id, "completion")?;
        self.status = if success {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };
        self.finished_at = Some(at);
        Ok(())
    }

    /// Flags the run for termination. The status stays active until the
    /// termination is acknowledged through [`Execution::mark_aborted`].
    pub fn request_abort(&mut self, key: &ExecutableKey) -> Result<RunId, ConsistencyError> {
        let run_id = match self.run_id {
            Some(run_id) if self.status.is_active() => run_id,
            Some(_) if self.status.is_terminal() => {
                return Err(ConsistencyError::TerminalState {
                    key: key.clone(),
                    status: self.status,
                    what: "abort request",
                })
            }
            _ => return Err(ConsistencyError::NotStarted { key: key.clone() }),
        };
        self.abort_requested = true;
        Ok(run_id)
    }

    pub fn mark_aborted(
        &mut self,
        key: &ExecutableKey,
        run_id: RunId,
        at: OffsetDateTime,
    ) -> Result<(), ConsistencyError> {
        self.ensure_live(key, run_id, "abort acknowledgement")?;
        self.status = ExecutionStatus::Aborted;
        self.finished_at = Some(at);
        Ok(())
    }

    pub fn clear_output(&mut self) {
        self.logs.clear();
    }

    fn ensure_live(
        &self,
        key: &ExecutableKey,
        run_id: RunId,
        what: &'static str,
    ) -> Result<(), ConsistencyError> {
        if self.run_id != Some(run_id) {
            return Err(ConsistencyError::StaleRun {
                run_id,
                key: key.clone(),
            });
        }
        if self.status.is_terminal() {
            return Err(ConsistencyError::TerminalState {
                key: key.clone(),
                status: self.status,
                what,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn key() -> ExecutableKey {
        ExecutableKey::task("p1", "build")
    }

    fn started(run: u64) -> Execution {
        let mut execution = Execution::default();
        execution
            .request(&key(), RunId::new(run), datetime!(2026-01-01 10:00 UTC))
            .expect("request run");
        execution
    }

    #[test]
    fn request_moves_idle_to_pending_and_records_start() {
        let execution = started(1);
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert_eq!(execution.run_id, Some(RunId::new(1)));
        assert_eq!(execution.started_at, Some(datetime!(2026-01-01 10:00 UTC)));
    }

    #[test]
    fn attach_promotes_to_running_and_rejects_second_attach() {
        let mut execution = started(1);
        execution
            .attach(&key(), RunId::new(1), ProcessId(42))
            .expect("attach");
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.process_id, Some(ProcessId(42)));

        let error = execution
            .attach(&key(), RunId::new(1), ProcessId(43))
            .expect_err("second attach");
        assert!(matches!(error, ConsistencyError::AlreadyActive { .. }));
        assert_eq!(execution.process_id, Some(ProcessId(42)));
    }

    #[test]
    fn request_while_active_is_refused() {
        let mut execution = started(1);
        let error = execution
            .request(&key(), RunId::new(2), datetime!(2026-01-01 10:01 UTC))
            .expect_err("double run");
        assert!(matches!(error, ConsistencyError::AlreadyActive { .. }));
        assert_eq!(execution.run_id, Some(RunId::new(1)));
    }

    #[test]
    fn terminal_states_are_sticky_until_a_fresh_request() {
        let mut execution = started(1);
        execution
            .append_output(&key(), RunId::new(1), LogEntryId::new(1), "ok".into(), false)
            .expect("output");
        execution
            .complete(&key(), RunId::new(1), datetime!(2026-01-01 10:02 UTC), true)
            .expect("complete");

        assert!(execution
            .append_output(&key(), RunId::new(1), LogEntryId::new(2), "late".into(), false)
            .is_err());
        assert!(execution
            .attach(&key(), RunId::new(1), ProcessId(9))
            .is_err());
        assert!(execution
            .mark_aborted(&key(), RunId::new(1), datetime!(2026-01-01 10:03 UTC))
            .is_err());
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.logs.len(), 1);

        execution
            .request(&key(), RunId::new(2), datetime!(2026-01-01 10:04 UTC))
            .expect("fresh request");
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert!(execution.logs.is_empty());
        assert_eq!(execution.process_id, None);
        assert_eq!(execution.finished_at, None);
    }

    #[test]
    fn output_from_a_previous_run_is_refused() {
        let mut execution = started(1);
        execution
            .complete(&key(), RunId::new(1), datetime!(2026-01-01 10:02 UTC), false)
            .expect("complete");
        execution
            .request(&key(), RunId::new(2), datetime!(2026-01-01 10:03 UTC))
            .expect("rerun");

        let error = execution
            .append_output(&key(), RunId::new(1), LogEntryId::new(5), "zombie".into(), true)
            .expect_err("stale output");
        assert!(matches!(error, ConsistencyError::StaleRun { .. }));
        assert!(execution.logs.is_empty());
    }

    #[test]
    fn abort_is_acknowledged_separately_and_accepts_output_in_between() {
        let mut execution = started(1);
        execution
            .attach(&key(), RunId::new(1), ProcessId(7))
            .expect("attach");

        assert_eq!(execution.request_abort(&key()), Ok(RunId::new(1)));
        assert!(execution.abort_requested);
        assert_eq!(execution.status, ExecutionStatus::Running);

        execution
            .append_output(&key(), RunId::new(1), LogEntryId::new(3), "bye".into(), false)
            .expect("output during termination window");
        execution
            .mark_aborted(&key(), RunId::new(1), datetime!(2026-01-01 10:05 UTC))
            .expect("aborted");
        assert_eq!(execution.status, ExecutionStatus::Aborted);
        assert_eq!(execution.logs.len(), 1);
    }

    #[test]
    fn abort_of_idle_executable_is_refused() {
        let mut execution = Execution::default();
        assert_eq!(
            execution.request_abort(&key()),
            Err(ConsistencyError::NotStarted { key: key() })
        );
    }

    #[test]
    fn clearing_output_keeps_status() {
        let mut execution = started(1);
        execution
            .append_output(&key(), RunId::new(1), LogEntryId::new(1), "x".into(), false)
            .expect("output");
        execution.clear_output();
        assert!(execution.logs.is_empty());
        assert_eq!(execution.status, ExecutionStatus::Pending);
    }
}
