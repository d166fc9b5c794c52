//! Runtime composition: owns the workbench state behind a single event loop,
//! runs the effects the reducer requests and publishes every applied event.

mod commands;
mod dependencies;
mod invocation;
mod projects;
mod runtime;
mod settings;

pub use invocation::spawn_request;
pub use projects::{DeleteOutcome, ProjectSettings};
pub use runtime::{RuntimeCollaborators, RuntimeProcessSnapshot, WorkbenchRuntime};
pub use settings::RuntimeSettings;
