use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use workbench_protocol::{
    ProcessEvent, ProcessEventSubscription, ProcessExit, ProcessHandle, ProcessId, ProcessOutput,
    ProcessSpawnRequest, ProcessSpawner, RunId, SpawnedProcess, StopStrategy, WorkbenchError,
    WorkbenchResult,
};

/// How long output readers may keep draining after the child exits. A
/// grandchild holding the pipe open must not stall the exit report.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

type StreamMessage = WorkbenchResult<Option<ProcessEvent>>;

struct LiveChild {
    process_id: u32,
    kill: mpsc::UnboundedSender<()>,
}

/// Runs each request as a child process in its own process group so stop
/// signals reach the whole tree.
#[derive(Clone)]
pub struct TokioProcessSpawner {
    stop_grace: Duration,
    live: Arc<Mutex<HashMap<RunId, LiveChild>>>,
}

impl TokioProcessSpawner {
    /// `stop_grace` is how long an interrupted process gets before it is killed.
    pub fn new(stop_grace: Duration) -> Self {
        Self {
            stop_grace,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn live_child(
        &self,
        run_id: RunId,
    ) -> WorkbenchResult<(u32, mpsc::UnboundedSender<()>)> {
        let live = self.live.lock().await;
        live.get(&run_id)
            .map(|child| (child.process_id, child.kill.clone()))
            .ok_or_else(|| WorkbenchError::Process(format!("run {run_id} has no live process")))
    }
}

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn spawn(&self, request: ProcessSpawnRequest) -> WorkbenchResult<SpawnedProcess> {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .current_dir(&request.workdir)
            .envs(request.environment.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|error| {
            WorkbenchError::Process(format!("failed to start {}: {error}", request.program))
        })?;
        let process_id = child.id().ok_or_else(|| {
            WorkbenchError::Process(format!("{} exited before reporting a pid", request.program))
        })?;

        let (events, receiver) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, false, events.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, true, events.clone()));
        }

        let run_id = request.run_id;
        let (kill, kill_requests) = mpsc::unbounded_channel();
        self.live
            .lock()
            .await
            .insert(run_id, LiveChild { process_id, kill });
        tokio::spawn(wait_for_exit(
            child,
            process_id,
            readers,
            kill_requests,
            events,
            run_id,
            Arc::clone(&self.live),
        ));
        debug!(run_id = %run_id, pid = process_id, program = %request.program, "spawned process");

        Ok(SpawnedProcess {
            handle: ProcessHandle {
                run_id,
                process_id: ProcessId(process_id),
            },
            events: Box::new(ChildEventStream { receiver }),
        })
    }

    async fn terminate(
        &self,
        handle: &ProcessHandle,
        strategy: StopStrategy,
    ) -> WorkbenchResult<()> {
        let (process_id, kill) = self.live_child(handle.run_id).await?;
        match strategy {
            StopStrategy::Kill => kill
                .send(())
                .map_err(|_| WorkbenchError::Process(format!("run {} already exited", handle.run_id))),
            StopStrategy::Interrupt => {
                if let Err(error) = interrupt(process_id) {
                    warn!(run_id = %handle.run_id, error = %error, "interrupt failed; killing");
                    return kill.send(()).map_err(|_| {
                        WorkbenchError::Process(format!("run {} already exited", handle.run_id))
                    });
                }
                let grace = self.stop_grace;
                let run_id = handle.run_id;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    if kill.send(()).is_ok() {
                        debug!(run_id = %run_id, "process outlived the stop grace period");
                    }
                });
                Ok(())
            }
        }
    }
}

struct ChildEventStream {
    receiver: mpsc::UnboundedReceiver<StreamMessage>,
}

#[async_trait]
impl ProcessEventSubscription for ChildEventStream {
    async fn next_event(&mut self) -> WorkbenchResult<Option<ProcessEvent>> {
        match self.receiver.recv().await {
            Some(message) => message,
            None => Ok(None),
        }
    }
}

fn forward_lines<R>(
    reader: R,
    is_error: bool,
    events: mpsc::UnboundedSender<StreamMessage>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(text)) => {
                    let output = ProcessEvent::Output(ProcessOutput { text, is_error });
                    if events.send(Ok(Some(output))).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(error) => {
                    debug!(error = %error, "stopped reading process output");
                    return;
                }
            }
        }
    })
}

/// Output is drained before the exit is reported, so the exit is always the
/// last event of a run.
async fn wait_for_exit(
    mut child: Child,
    process_id: u32,
    readers: Vec<JoinHandle<()>>,
    mut kill_requests: mpsc::UnboundedReceiver<()>,
    events: mpsc::UnboundedSender<StreamMessage>,
    run_id: RunId,
    live: Arc<Mutex<HashMap<RunId, LiveChild>>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Some(()) = kill_requests.recv() => {
            kill_group(process_id);
            if let Err(error) = child.start_kill() {
                debug!(run_id = %run_id, error = %error, "child already gone");
            }
            child.wait().await
        }
    };

    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
            abort.abort();
        }
    }

    let message = match status {
        Ok(status) => Ok(Some(ProcessEvent::Exited(ProcessExit {
            code: status.code(),
            success: status.success(),
        }))),
        Err(error) => Err(WorkbenchError::Process(format!(
            "failed to wait for run {run_id}: {error}"
        ))),
    };
    let _ = events.send(message);
    live.lock().await.remove(&run_id);
}

#[cfg(unix)]
fn interrupt(process_id: u32) -> WorkbenchResult<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    killpg(Pid::from_raw(process_id as i32), Signal::SIGINT)
        .map_err(|error| WorkbenchError::Process(format!("SIGINT to {process_id} failed: {error}")))
}

#[cfg(not(unix))]
fn interrupt(process_id: u32) -> WorkbenchResult<()> {
    Err(WorkbenchError::Process(format!(
        "cannot interrupt {process_id} on this platform"
    )))
}

#[cfg(unix)]
fn kill_group(process_id: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let _ = killpg(Pid::from_raw(process_id as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_group(_process_id: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn shell(run: u64, script: &str) -> ProcessSpawnRequest {
        ProcessSpawnRequest {
            run_id: RunId::new(run),
            program: "sh".to_owned(),
            args: vec!["-c".to_owned(), script.to_owned()],
            workdir: PathBuf::from("."),
            environment: vec![("WORKBENCH_TEST".to_owned(), "1".to_owned())],
        }
    }

    async fn collect(process: SpawnedProcess) -> Vec<ProcessEvent> {
        let mut stream = process.events;
        let mut events = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = stream.next_event().await.expect("stream event") {
                let exited = matches!(event, ProcessEvent::Exited(_));
                events.push(event);
                if exited {
                    break;
                }
            }
        })
        .await
        .expect("process finished in time");
        events
    }

    #[tokio::test]
    async fn output_is_forwarded_before_the_exit() {
        let spawner = TokioProcessSpawner::new(Duration::from_millis(100));
        let process = spawner
            .spawn(shell(1, "echo \"out $WORKBENCH_TEST\"; echo err 1>&2; exit 3"))
            .await
            .expect("spawn");

        let events = collect(process).await;
        assert_eq!(
            events.last(),
            Some(&ProcessEvent::Exited(ProcessExit {
                code: Some(3),
                success: false,
            }))
        );
        assert!(events.contains(&ProcessEvent::Output(ProcessOutput {
            text: "out 1".to_owned(),
            is_error: false,
        })));
        assert!(events.contains(&ProcessEvent::Output(ProcessOutput {
            text: "err".to_owned(),
            is_error: true,
        })));
    }

    #[tokio::test]
    async fn interrupt_stops_a_long_running_process() {
        let spawner = TokioProcessSpawner::new(Duration::from_secs(5));
        let process = spawner.spawn(shell(2, "sleep 30")).await.expect("spawn");
        let handle = process.handle.clone();

        spawner
            .terminate(&handle, StopStrategy::Interrupt)
            .await
            .expect("interrupt");
        let events = collect(process).await;
        assert!(matches!(
            events.last(),
            Some(ProcessEvent::Exited(ProcessExit { success: false, .. }))
        ));
    }

    #[tokio::test]
    async fn kill_stops_the_process_and_forgets_it() {
        let spawner = TokioProcessSpawner::new(Duration::from_secs(5));
        let process = spawner.spawn(shell(3, "sleep 30")).await.expect("spawn");
        let handle = process.handle.clone();

        spawner
            .terminate(&handle, StopStrategy::Kill)
            .await
            .expect("kill");
        collect(process).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(spawner
            .terminate(&handle, StopStrategy::Kill)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let spawner = TokioProcessSpawner::new(Duration::from_secs(1));
        let mut request = shell(4, "true");
        request.program = "workbench-definitely-missing-binary".to_owned();
        assert!(matches!(
            spawner.spawn(request).await,
            Err(WorkbenchError::Process(_))
        ));
    }
}
