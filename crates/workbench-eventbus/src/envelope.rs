use workbench_core::WorkbenchEvent;
use workbench_protocol::ProjectId;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkbenchEventEnvelope {
    pub sequence: u64,
    /// `None` for events that are not scoped to a single project.
    pub project_id: Option<ProjectId>,
    pub received_at_monotonic_nanos: u64,
    pub event: WorkbenchEvent,
}
