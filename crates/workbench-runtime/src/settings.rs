use std::path::PathBuf;

use workbench_core::CorePolicy;
use workbench_eventbus::WorkbenchEventBusConfig;
use workbench_protocol::{DEFAULT_COMMAND_RUNNER, DEFAULT_EVENT_BUFFER, DEFAULT_PACKAGE_MANAGER_BINARY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Scanned on refresh and parent of newly created projects.
    pub projects_home: PathBuf,
    pub policy: CorePolicy,
    /// Runs scripts as `<binary> run <script>`.
    pub package_manager_binary: String,
    pub command_runner: Vec<String>,
    pub failure_patterns: Vec<String>,
    pub event_buffer: usize,
    pub eventbus: WorkbenchEventBusConfig,
}

impl RuntimeSettings {
    pub fn new(projects_home: impl Into<PathBuf>) -> Self {
        Self {
            projects_home: projects_home.into(),
            policy: CorePolicy::default(),
            package_manager_binary: DEFAULT_PACKAGE_MANAGER_BINARY.to_owned(),
            command_runner: DEFAULT_COMMAND_RUNNER
                .iter()
                .map(|part| (*part).to_owned())
                .collect(),
            failure_patterns: Vec::new(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            eventbus: WorkbenchEventBusConfig::default(),
        }
    }
}
