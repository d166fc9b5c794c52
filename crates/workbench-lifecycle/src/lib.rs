//! Live process tracking: spawns runs, forwards their output and exit as
//! workbench events and applies stop requests, including ones that arrive
//! before the process has attached.

pub mod controller;
pub mod registry;
pub mod state;

pub use controller::{EventSink, ProcessLifecycle};
pub use registry::{LiveRun, ProcessRegistry, StopDecision};
pub use state::LiveRunState;
