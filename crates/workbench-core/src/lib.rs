//! Project orchestration core: normalized entity stores, the process
//! lifecycle tracker, the per-project dependency queue, onboarding and
//! selection, and the view composer over all of them.

pub mod effects;
pub mod error;
pub mod events;
pub mod execution;
pub mod projection;
pub mod queue;
pub mod selection;
pub mod state;
pub mod status;
pub mod stores;

pub use effects::{Effect, Invocation};
pub use error::ConsistencyError;
pub use events::WorkbenchEvent;
pub use execution::{ExecutableKey, Execution, LogEntry};
pub use projection::{resolve_menu_items, ProjectView};
pub use queue::{DependencyQueues, QueuedDependency, StartedOperation};
pub use selection::{next_onboarding, SelectionState};
pub use state::{CorePolicy, WorkbenchState};
pub use status::{ExecutionStatus, OnboardingStatus, QueueAction, TaskKind};
pub use stores::{
    project_id_for_path, slugify, Command, CommandStore, Dependency, DependencyStore,
    LoadedProject, PathStore, ProjectMetadata, ProjectRecord, ProjectStore, ScopedStore, Task,
    TaskStore,
};
