use std::collections::hash_map::Entry;
use std::collections::HashMap;

use workbench_protocol::{ProcessHandle, RunId, StopStrategy, WorkbenchError, WorkbenchResult};

use crate::state::LiveRunState;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LiveRun {
    pub state: LiveRunState,
    pub handle: Option<ProcessHandle>,
    /// Stop requested before the process attached.
    pub pending_stop: Option<StopStrategy>,
    pub stop_requested: bool,
    pub failure_output_seen: bool,
}

/// What to do about a stop request given the run's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopDecision {
    /// The process has not attached yet; it is stopped on attach.
    Deferred,
    Terminate(ProcessHandle),
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    runs: HashMap<RunId, LiveRun>,
}

impl ProcessRegistry {
    pub fn reserve(&mut self, run_id: RunId) -> WorkbenchResult<()> {
        match self.runs.entry(run_id) {
            Entry::Occupied(_) => Err(WorkbenchError::Process(format!(
                "run {run_id} already has a live process"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(LiveRun::default());
                Ok(())
            }
        }
    }

    /// Records the handle. Returns the stop strategy to apply right away when
    /// a stop was requested while the process was starting.
    pub fn mark_spawned(
        &mut self,
        run_id: RunId,
        handle: ProcessHandle,
    ) -> WorkbenchResult<Option<StopStrategy>> {
        let run = self.run_mut(run_id)?;
        run.handle = Some(handle);
        match run.pending_stop.take() {
            Some(strategy) => {
                run.state = LiveRunState::Stopping;
                run.stop_requested = true;
                Ok(Some(strategy))
            }
            None => {
                run.state = LiveRunState::Running;
                Ok(None)
            }
        }
    }

    pub fn request_stop(
        &mut self,
        run_id: RunId,
        strategy: StopStrategy,
    ) -> WorkbenchResult<StopDecision> {
        let run = self.run_mut(run_id)?;
        match (run.state, run.handle.clone()) {
            (LiveRunState::Starting, _) | (_, None) => {
                run.pending_stop = Some(strategy);
                Ok(StopDecision::Deferred)
            }
            (LiveRunState::Running | LiveRunState::Stopping, Some(handle)) => {
                run.state = LiveRunState::Stopping;
                run.stop_requested = true;
                Ok(StopDecision::Terminate(handle))
            }
        }
    }

    pub fn note_failure_output(&mut self, run_id: RunId) {
        if let Some(run) = self.runs.get_mut(&run_id) {
            run.failure_output_seen = true;
        }
    }

    pub fn snapshot(&self, run_id: RunId) -> Option<&LiveRun> {
        self.runs.get(&run_id)
    }

    pub fn remove(&mut self, run_id: RunId) -> Option<LiveRun> {
        self.runs.remove(&run_id)
    }

    pub fn live_runs(&self) -> Vec<RunId> {
        self.runs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn run_mut(&mut self, run_id: RunId) -> WorkbenchResult<&mut LiveRun> {
        self.runs
            .get_mut(&run_id)
            .ok_or_else(|| WorkbenchError::Process(format!("no live process for run {run_id}")))
    }
}
