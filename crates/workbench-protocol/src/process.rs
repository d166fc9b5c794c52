use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkbenchResult;
use crate::ids::{ProcessId, RunId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpawnRequest {
    pub run_id: RunId,
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub environment: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub run_id: RunId,
    pub process_id: ProcessId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopStrategy {
    #[default]
    Kill,
    /// Interrupt first and only kill if the process outlives the grace period.
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub text: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessEvent {
    Output(ProcessOutput),
    Exited(ProcessExit),
}

#[async_trait]
pub trait ProcessEventSubscription: Send {
    async fn next_event(&mut self) -> WorkbenchResult<Option<ProcessEvent>>;
}

pub type ProcessEventStream = Box<dyn ProcessEventSubscription>;

pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub events: ProcessEventStream,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
