#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep, Instant};
use workbench_core::WorkbenchState;
use workbench_protocol::{
    ConfirmRequest, ConfirmationPrompt, DependencySpec, Manifest, ManifestStore, PackageManager,
    ProcessEvent, ProcessEventSubscription, ProcessExit, ProcessHandle, ProcessId, ProcessOutput,
    ProcessSpawnRequest, ProcessSpawner, RunId, SpawnedProcess, StopStrategy, WorkbenchError,
    WorkbenchResult,
};
use workbench_runtime::{RuntimeCollaborators, RuntimeSettings, WorkbenchRuntime};

pub const HOME: &str = "/home/plugins";
pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

pub fn project_path(id: &str) -> PathBuf {
    Path::new(HOME).join(id)
}

#[derive(Default)]
pub struct MemoryManifestStore {
    pub fs: Mutex<MemoryFs>,
}

#[derive(Default)]
pub struct MemoryFs {
    pub directories: BTreeSet<PathBuf>,
    pub manifests: HashMap<PathBuf, Manifest>,
    pub icons: HashMap<PathBuf, String>,
    pub installed: HashMap<PathBuf, BTreeMap<String, String>>,
    pub created: HashMap<PathBuf, OffsetDateTime>,
    pub fail_manifest_writes: bool,
    pub fail_renames: bool,
    pub fail_icon_writes: bool,
}

impl MemoryManifestStore {
    /// Registers a project directory from a JSON manifest. `created` is in
    /// seconds since the epoch.
    pub fn add_project(&self, path: &Path, manifest: Value, created: i64) {
        let manifest: Manifest = serde_json::from_value(manifest).expect("fixture manifest");
        let mut fs = self.fs.lock().expect("lock memory fs");
        if let Some(parent) = path.parent() {
            fs.directories.insert(parent.to_path_buf());
        }
        fs.directories.insert(path.to_path_buf());
        let installed = manifest
            .dependencies
            .iter()
            .map(|(name, version)| (name.clone(), version.trim_start_matches('^').to_owned()))
            .collect();
        fs.installed.insert(path.to_path_buf(), installed);
        fs.manifests.insert(path.to_path_buf(), manifest);
        fs.created.insert(
            path.to_path_buf(),
            OffsetDateTime::from_unix_timestamp(created).expect("fixture timestamp"),
        );
    }

    pub fn manifest(&self, path: &Path) -> Option<Manifest> {
        self.fs
            .lock()
            .expect("lock memory fs")
            .manifests
            .get(path)
            .cloned()
    }

    pub fn set_manifest(&self, path: &Path, manifest: Manifest) {
        self.fs
            .lock()
            .expect("lock memory fs")
            .manifests
            .insert(path.to_path_buf(), manifest);
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.fs
            .lock()
            .expect("lock memory fs")
            .directories
            .contains(path)
    }

    pub fn icon(&self, path: &Path) -> Option<String> {
        self.fs
            .lock()
            .expect("lock memory fs")
            .icons
            .get(path)
            .cloned()
    }

    fn move_entry<V>(map: &mut HashMap<PathBuf, V>, from: &Path, to: &Path) {
        if let Some(value) = map.remove(from) {
            map.insert(to.to_path_buf(), value);
        }
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn load_manifest(&self, project_path: &Path) -> WorkbenchResult<Manifest> {
        self.manifest(project_path).ok_or_else(|| {
            WorkbenchError::Io(format!("no manifest in {}", project_path.display()))
        })
    }

    async fn write_manifest(
        &self,
        project_path: &Path,
        manifest: &Manifest,
    ) -> WorkbenchResult<()> {
        let mut fs = self.fs.lock().expect("lock memory fs");
        if fs.fail_manifest_writes {
            return Err(WorkbenchError::Io("disk is read-only".to_owned()));
        }
        fs.directories.insert(project_path.to_path_buf());
        fs.manifests
            .insert(project_path.to_path_buf(), manifest.clone());
        Ok(())
    }

    async fn rename_directory(&self, from: &Path, to: &Path) -> WorkbenchResult<()> {
        let mut fs = self.fs.lock().expect("lock memory fs");
        if fs.fail_renames || !fs.directories.remove(from) {
            return Err(WorkbenchError::Io(format!("cannot rename {}", from.display())));
        }
        fs.directories.insert(to.to_path_buf());
        Self::move_entry(&mut fs.manifests, from, to);
        Self::move_entry(&mut fs.icons, from, to);
        Self::move_entry(&mut fs.installed, from, to);
        Self::move_entry(&mut fs.created, from, to);
        Ok(())
    }

    async fn create_directory(&self, path: &Path) -> WorkbenchResult<()> {
        let mut fs = self.fs.lock().expect("lock memory fs");
        fs.directories.insert(path.to_path_buf());
        fs.created
            .entry(path.to_path_buf())
            .or_insert_with(OffsetDateTime::now_utc);
        Ok(())
    }

    async fn remove_directory(&self, path: &Path) -> WorkbenchResult<()> {
        let mut fs = self.fs.lock().expect("lock memory fs");
        fs.directories.remove(path);
        fs.manifests.remove(path);
        fs.icons.remove(path);
        fs.installed.remove(path);
        fs.created.remove(path);
        Ok(())
    }

    async fn path_exists(&self, path: &Path) -> bool {
        self.exists(path)
    }

    async fn list_project_directories(&self, home: &Path) -> WorkbenchResult<Vec<PathBuf>> {
        let fs = self.fs.lock().expect("lock memory fs");
        Ok(fs
            .directories
            .iter()
            .filter(|path| path.parent() == Some(home))
            .cloned()
            .collect())
    }

    async fn created_at(&self, project_path: &Path) -> WorkbenchResult<OffsetDateTime> {
        let fs = self.fs.lock().expect("lock memory fs");
        Ok(fs
            .created
            .get(project_path)
            .copied()
            .unwrap_or(OffsetDateTime::UNIX_EPOCH))
    }

    async fn read_icon(
        &self,
        project_path: &Path,
        _manifest: &Manifest,
    ) -> WorkbenchResult<Option<String>> {
        Ok(self.icon(project_path))
    }

    async fn write_icon(
        &self,
        project_path: &Path,
        _manifest: &Manifest,
        icon: &[u8],
    ) -> WorkbenchResult<()> {
        let mut fs = self.fs.lock().expect("lock memory fs");
        if fs.fail_icon_writes {
            return Err(WorkbenchError::Io("icon file is locked".to_owned()));
        }
        fs.icons
            .insert(project_path.to_path_buf(), BASE64_STANDARD.encode(icon));
        Ok(())
    }

    async fn installed_dependencies(
        &self,
        project_path: &Path,
        names: &[String],
    ) -> WorkbenchResult<Vec<DependencySpec>> {
        let fs = self.fs.lock().expect("lock memory fs");
        let installed = fs.installed.get(project_path).cloned().unwrap_or_default();
        Ok(names
            .iter()
            .filter_map(|name| {
                installed
                    .get(name)
                    .map(|version| DependencySpec::new(name.clone(), version.clone()))
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageCall {
    Install(PathBuf, Vec<DependencySpec>),
    Uninstall(PathBuf, Vec<String>),
}

/// Records every invocation. A gated manager blocks each call until a permit
/// is released, so tests control when operations finish.
pub struct RecordingPackageManager {
    calls: Mutex<Vec<PackageCall>>,
    failing: Mutex<HashSet<String>>,
    gate: Semaphore,
    in_flight: Mutex<(usize, usize)>,
}

impl RecordingPackageManager {
    pub fn immediate() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    pub fn gated() -> Self {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            gate: Semaphore::new(permits),
            in_flight: Mutex::new((0, 0)),
        }
    }

    pub fn fail_on(&self, name: &str) {
        self.failing
            .lock()
            .expect("lock failing names")
            .insert(name.to_owned());
    }

    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub fn calls(&self) -> Vec<PackageCall> {
        self.calls.lock().expect("lock calls").clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.in_flight.lock().expect("lock in flight").1
    }

    async fn run<T>(
        &self,
        call: PackageCall,
        names: Vec<String>,
        result: T,
    ) -> WorkbenchResult<T> {
        {
            self.calls.lock().expect("lock calls").push(call);
            let mut in_flight = self.in_flight.lock().expect("lock in flight");
            in_flight.0 += 1;
            in_flight.1 = in_flight.1.max(in_flight.0);
        }
        self.gate
            .acquire()
            .await
            .expect("package gate open")
            .forget();
        self.in_flight.lock().expect("lock in flight").0 -= 1;

        let failing = self.failing.lock().expect("lock failing names");
        match names.iter().find(|name| failing.contains(*name)) {
            Some(name) => Err(WorkbenchError::PackageManager(format!(
                "404 Not Found: {name}"
            ))),
            None => Ok(result),
        }
    }
}

#[async_trait]
impl PackageManager for RecordingPackageManager {
    async fn install(
        &self,
        project_path: &Path,
        dependencies: &[DependencySpec],
    ) -> WorkbenchResult<Vec<DependencySpec>> {
        let resolved = dependencies
            .iter()
            .map(|spec| {
                let version = if spec.version == "latest" {
                    "1.0.0".to_owned()
                } else {
                    spec.version.clone()
                };
                DependencySpec::new(spec.name.clone(), version)
            })
            .collect();
        let names = dependencies.iter().map(|spec| spec.name.clone()).collect();
        self.run(
            PackageCall::Install(project_path.to_path_buf(), dependencies.to_vec()),
            names,
            resolved,
        )
        .await
    }

    async fn uninstall(&self, project_path: &Path, names: &[String]) -> WorkbenchResult<()> {
        self.run(
            PackageCall::Uninstall(project_path.to_path_buf(), names.to_vec()),
            names.to_vec(),
            (),
        )
        .await
    }
}

type StreamMessage = WorkbenchResult<Option<ProcessEvent>>;

#[derive(Default)]
pub struct ScriptedSpawner {
    state: Mutex<ScriptedSpawnerState>,
}

#[derive(Default)]
struct ScriptedSpawnerState {
    requests: Vec<ProcessSpawnRequest>,
    processes: HashMap<RunId, mpsc::UnboundedSender<StreamMessage>>,
    terminations: Vec<(RunId, StopStrategy)>,
}

struct ScriptedStream {
    receiver: mpsc::UnboundedReceiver<StreamMessage>,
}

impl ScriptedSpawner {
    pub fn requests(&self) -> Vec<ProcessSpawnRequest> {
        self.state.lock().expect("lock spawner").requests.clone()
    }

    pub fn terminations(&self) -> Vec<(RunId, StopStrategy)> {
        self.state.lock().expect("lock spawner").terminations.clone()
    }

    /// Waits for the `index`th spawn request (zero-based).
    pub async fn wait_for_request(&self, index: usize) -> ProcessSpawnRequest {
        let deadline = Instant::now() + TEST_TIMEOUT;
        loop {
            if let Some(request) = self.requests().get(index) {
                return request.clone();
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for spawn request {index}"
            );
            sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn output(&self, run_id: RunId, text: &str) {
        self.send(
            run_id,
            ProcessEvent::Output(ProcessOutput {
                text: text.to_owned(),
                is_error: false,
            }),
        );
    }

    pub fn exit(&self, run_id: RunId, success: bool) {
        self.send(
            run_id,
            ProcessEvent::Exited(ProcessExit {
                code: Some(if success { 0 } else { 1 }),
                success,
            }),
        );
    }

    fn send(&self, run_id: RunId, event: ProcessEvent) {
        let state = self.state.lock().expect("lock spawner");
        state
            .processes
            .get(&run_id)
            .expect("spawned process")
            .send(Ok(Some(event)))
            .expect("process stream open");
    }
}

#[async_trait]
impl ProcessSpawner for ScriptedSpawner {
    async fn spawn(&self, request: ProcessSpawnRequest) -> WorkbenchResult<SpawnedProcess> {
        let mut state = self.state.lock().expect("lock spawner");
        let (sender, receiver) = mpsc::unbounded_channel();
        let run_id = request.run_id;
        state.processes.insert(run_id, sender);
        state.requests.push(request);
        Ok(SpawnedProcess {
            handle: ProcessHandle {
                run_id,
                process_id: ProcessId(4000 + run_id.get() as u32),
            },
            events: Box::new(ScriptedStream { receiver }),
        })
    }

    async fn terminate(&self, handle: &ProcessHandle, strategy: StopStrategy) -> WorkbenchResult<()> {
        let mut state = self.state.lock().expect("lock spawner");
        state.terminations.push((handle.run_id, strategy));
        if let Some(sender) = state.processes.get(&handle.run_id) {
            let _ = sender.send(Ok(Some(ProcessEvent::Exited(ProcessExit {
                code: None,
                success: false,
            }))));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessEventSubscription for ScriptedStream {
    async fn next_event(&mut self) -> WorkbenchResult<Option<ProcessEvent>> {
        match self.receiver.recv().await {
            Some(event) => event,
            None => Ok(None),
        }
    }
}

/// Answers prompts from a script; an exhausted script cancels.
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<usize>>,
    requests: Mutex<Vec<ConfirmRequest>>,
}

impl ScriptedPrompt {
    pub fn answer(&self, option: usize) {
        self.answers.lock().expect("lock answers").push_back(option);
    }

    pub fn requests(&self) -> Vec<ConfirmRequest> {
        self.requests.lock().expect("lock prompt requests").clone()
    }
}

#[async_trait]
impl ConfirmationPrompt for ScriptedPrompt {
    async fn confirm(&self, request: ConfirmRequest) -> WorkbenchResult<usize> {
        let cancel = request.cancel_option;
        self.requests
            .lock()
            .expect("lock prompt requests")
            .push(request);
        Ok(self
            .answers
            .lock()
            .expect("lock answers")
            .pop_front()
            .unwrap_or(cancel))
    }
}

pub struct Harness {
    pub runtime: WorkbenchRuntime,
    pub manifests: Arc<MemoryManifestStore>,
    pub packages: Arc<RecordingPackageManager>,
    pub spawner: Arc<ScriptedSpawner>,
    pub prompt: Arc<ScriptedPrompt>,
}

impl Harness {
    pub fn start(packages: RecordingPackageManager) -> Self {
        let mut settings = RuntimeSettings::new(HOME);
        settings.failure_patterns = vec!["Failed to compile".to_owned()];
        Self::with_settings(packages, settings)
    }

    pub fn with_settings(packages: RecordingPackageManager, settings: RuntimeSettings) -> Self {
        let manifests = Arc::new(MemoryManifestStore::default());
        let packages = Arc::new(packages);
        let spawner = Arc::new(ScriptedSpawner::default());
        let prompt = Arc::new(ScriptedPrompt::default());
        let runtime = WorkbenchRuntime::start(
            RuntimeCollaborators {
                manifests: manifests.clone(),
                packages: packages.clone(),
                spawner: spawner.clone(),
                prompt: prompt.clone(),
            },
            settings,
        );
        Self {
            runtime,
            manifests,
            packages,
            spawner,
            prompt,
        }
    }

    /// Polls the state until `check` holds.
    pub async fn wait_until(&self, what: &str, check: impl Fn(&WorkbenchState) -> bool) {
        let deadline = Instant::now() + TEST_TIMEOUT;
        loop {
            if self.runtime.read(&check).await {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            sleep(Duration::from_millis(5)).await;
        }
    }
}

pub async fn with_timeout<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("timed out")
}

pub fn plugin_manifest(name: &str, title: &str) -> Value {
    serde_json::json!({
        "name": name,
        "version": "0.1.0",
        "scripts": {
            "build": "skpm-build",
            "watch": "skpm-build --watch",
            "eject": "skpm eject"
        },
        "dependencies": { "lodash": "^4.0.0" },
        "skpm": {
            "name": title,
            "manifest": "src/manifest.json",
            "commands": [
                { "identifier": "open", "name": "Open" },
                { "identifier": "close", "name": "Close", "shortcut": "cmd+w" }
            ],
            "menu": { "title": title, "items": ["open", "-", "close"] }
        }
    })
}
