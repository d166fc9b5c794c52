use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use workbench_core::WorkbenchEvent;
use workbench_protocol::{
    ProcessEvent, ProcessEventStream, ProcessHandle, ProcessSpawnRequest, ProcessSpawner, RunId,
    SpawnedProcess, StopStrategy, WorkbenchResult,
};

use crate::registry::{ProcessRegistry, StopDecision};

/// Channel back into the runtime's event loop.
pub type EventSink = mpsc::Sender<WorkbenchEvent>;

#[derive(Clone)]
pub struct ProcessLifecycle {
    spawner: Arc<dyn ProcessSpawner>,
    registry: Arc<RwLock<ProcessRegistry>>,
    events: EventSink,
    stream_tasks: Arc<RwLock<HashMap<RunId, JoinHandle<()>>>>,
    failure_patterns: Arc<[String]>,
}

impl ProcessLifecycle {
    /// `failure_patterns` mark a run failed when any output line contains
    /// one of them, whatever the exit status says.
    pub fn new(
        spawner: Arc<dyn ProcessSpawner>,
        events: EventSink,
        failure_patterns: Vec<String>,
    ) -> Self {
        Self {
            spawner,
            registry: Arc::new(RwLock::new(ProcessRegistry::default())),
            events,
            stream_tasks: Arc::new(RwLock::new(HashMap::new())),
            failure_patterns: failure_patterns.into(),
        }
    }

    /// Claims the run id so stop requests issued before the process starts
    /// are remembered.
    pub async fn reserve(&self, run_id: RunId) -> WorkbenchResult<()> {
        self.registry.write().await.reserve(run_id)
    }

    pub async fn spawn(&self, request: ProcessSpawnRequest) -> WorkbenchResult<ProcessHandle> {
        self.reserve(request.run_id).await?;
        self.launch(request).await
    }

    /// Starts a reserved run. Spawn failures are reported to the event loop
    /// as an error line followed by a failed exit.
    pub async fn launch(&self, request: ProcessSpawnRequest) -> WorkbenchResult<ProcessHandle> {
        let run_id = request.run_id;
        let SpawnedProcess { handle, events } = match self.spawner.spawn(request).await {
            Ok(spawned) => spawned,
            Err(error) => {
                warn!(run_id = %run_id, error = %error, "failed to spawn process");
                let run = self.registry.write().await.remove(run_id);
                self.emit(WorkbenchEvent::ProcessOutput {
                    run_id,
                    text: format!("failed to start process: {error}"),
                    is_error: true,
                })
                .await;
                let at = OffsetDateTime::now_utc();
                let stopped = run.is_some_and(|run| run.pending_stop.is_some());
                self.emit(if stopped {
                    WorkbenchEvent::ProcessAborted { run_id, at }
                } else {
                    WorkbenchEvent::ProcessExited {
                        run_id,
                        at,
                        success: false,
                    }
                })
                .await;
                return Err(error);
            }
        };

        let pending_stop = self
            .registry
            .write()
            .await
            .mark_spawned(run_id, handle.clone())?;
        self.emit(WorkbenchEvent::ProcessAttached {
            run_id,
            process_id: handle.process_id,
        })
        .await;

        {
            let mut stream_tasks = self.stream_tasks.write().await;
            let stream_task = self.spawn_stream_ingestion_task(run_id, events);
            stream_tasks.insert(run_id, stream_task);
        }

        if let Some(strategy) = pending_stop {
            debug!(run_id = %run_id, "applying stop requested before attach");
            let _ = self.terminate_handle(&handle, strategy).await;
        }
        Ok(handle)
    }

    /// Best-effort stop. The run only counts as aborted once the process
    /// stream ends; output arriving until then is still forwarded.
    pub async fn terminate(&self, run_id: RunId, strategy: StopStrategy) -> WorkbenchResult<()> {
        let decision = self
            .registry
            .write()
            .await
            .request_stop(run_id, strategy)?;
        match decision {
            StopDecision::Deferred => {
                debug!(run_id = %run_id, "process not attached yet; deferring stop");
                Ok(())
            }
            StopDecision::Terminate(handle) => self.terminate_handle(&handle, strategy).await,
        }
    }

    /// Kills every live process. Used on shutdown.
    pub async fn shutdown(&self) {
        let runs = self.registry.read().await.live_runs();
        for run_id in runs {
            if let Err(error) = self.terminate(run_id, StopStrategy::Kill).await {
                debug!(run_id = %run_id, error = %error, "process already gone at shutdown");
            }
        }
    }

    pub async fn live_runs(&self) -> Vec<RunId> {
        self.registry.read().await.live_runs()
    }

    pub async fn active_stream_tasks(&self) -> usize {
        self.stream_tasks.read().await.len()
    }

    /// A failed terminate gives up on the process: ingestion stops and the
    /// run is reported aborted with the failure as an error line.
    async fn terminate_handle(
        &self,
        handle: &ProcessHandle,
        strategy: StopStrategy,
    ) -> WorkbenchResult<()> {
        let run_id = handle.run_id;
        let Err(error) = self.spawner.terminate(handle, strategy).await else {
            return Ok(());
        };

        warn!(
            run_id = %run_id,
            process_id = %handle.process_id,
            error = %error,
            "failed to terminate process"
        );
        if let Some(task) = self.stream_tasks.write().await.remove(&run_id) {
            task.abort();
        }
        self.registry.write().await.remove(run_id);
        self.emit(WorkbenchEvent::ProcessOutput {
            run_id,
            text: format!("failed to stop process {}: {error}", handle.process_id),
            is_error: true,
        })
        .await;
        self.emit(WorkbenchEvent::ProcessAborted {
            run_id,
            at: OffsetDateTime::now_utc(),
        })
        .await;
        Err(error)
    }

    fn spawn_stream_ingestion_task(
        &self,
        run_id: RunId,
        mut stream: ProcessEventStream,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        let stream_tasks = Arc::clone(&self.stream_tasks);
        let failure_patterns = Arc::clone(&self.failure_patterns);

        tokio::spawn(async move {
            let success = loop {
                match stream.next_event().await {
                    Ok(Some(ProcessEvent::Output(output))) => {
                        if failure_patterns
                            .iter()
                            .any(|pattern| output.text.contains(pattern.as_str()))
                        {
                            registry.write().await.note_failure_output(run_id);
                        }
                        send(
                            &events,
                            WorkbenchEvent::ProcessOutput {
                                run_id,
                                text: output.text,
                                is_error: output.is_error,
                            },
                        )
                        .await;
                    }
                    Ok(Some(ProcessEvent::Exited(exit))) => break exit.success,
                    Ok(None) => break false,
                    Err(error) => {
                        warn!(run_id = %run_id, error = %error, "process output stream failed");
                        send(
                            &events,
                            WorkbenchEvent::ProcessOutput {
                                run_id,
                                text: format!("process output stream failed: {error}"),
                                is_error: true,
                            },
                        )
                        .await;
                        break false;
                    }
                }
            };

            let run = registry.write().await.remove(run_id);
            let at = OffsetDateTime::now_utc();
            if let Some(run) = run {
                let event = if run.stop_requested || run.pending_stop.is_some() {
                    WorkbenchEvent::ProcessAborted { run_id, at }
                } else {
                    WorkbenchEvent::ProcessExited {
                        run_id,
                        at,
                        success: success && !run.failure_output_seen,
                    }
                };
                send(&events, event).await;
            }

            let mut stream_tasks = stream_tasks.write().await;
            stream_tasks.remove(&run_id);
        })
    }

    async fn emit(&self, event: WorkbenchEvent) {
        send(&self.events, event).await;
    }
}

async fn send(events: &EventSink, event: WorkbenchEvent) {
    if events.send(event).await.is_err() {
        debug!("workbench event loop closed; dropping process event");
    }
}
