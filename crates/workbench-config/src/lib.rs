use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use workbench_protocol::{
    DEFAULT_BATCH_LIMIT, DEFAULT_COMMAND_RUNNER, DEFAULT_EVENTBUS_GLOBAL_CAPACITY,
    DEFAULT_EVENTBUS_PROJECT_CAPACITY, DEFAULT_EVENT_BUFFER, DEFAULT_PACKAGE_MANAGER_BINARY,
    DEFAULT_RELOAD_AFTER, DEFAULT_SUSTAINED_TASKS,
};

pub use workbench_protocol::IDENTIFIER_PLACEHOLDER;

pub const ENV_WORKBENCH_CONFIG: &str = "WORKBENCH_CONFIG";

const DEFAULT_INSTALL_ARGS: &[&str] = &["install", "--save"];
const DEFAULT_UNINSTALL_ARGS: &[&str] = &["uninstall", "--save"];
const MAX_BATCH_LIMIT: usize = 32;
const DEFAULT_FAILURE_PATTERNS: &[&str] = &["Failed to compile", "npm ERR!"];
const DEFAULT_STOP_GRACE_MS: u64 = 3_000;
const MAX_STOP_GRACE_MS: u64 = 60_000;
const MIN_EVENT_BUFFER: usize = 16;
const MAX_BUFFER: usize = 65_536;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkbenchConfig {
    #[serde(default = "default_projects_home")]
    pub projects_home: String,
    #[serde(default)]
    pub package_manager: PackageManagerConfigToml,
    #[serde(default)]
    pub commands: CommandsConfigToml,
    #[serde(default)]
    pub tasks: TasksConfigToml,
    #[serde(default)]
    pub runtime: RuntimeConfigToml,
    #[serde(default)]
    pub logging: LoggingConfigToml,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            projects_home: default_projects_home(),
            package_manager: PackageManagerConfigToml::default(),
            commands: CommandsConfigToml::default(),
            tasks: TasksConfigToml::default(),
            runtime: RuntimeConfigToml::default(),
            logging: LoggingConfigToml::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManagerRuntimeConfig {
    pub binary: String,
    pub install_args: Vec<String>,
    pub uninstall_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicyConfig {
    pub sustained_tasks: Vec<String>,
    pub reload_after: Vec<String>,
    pub failure_patterns: Vec<String>,
    pub batch_limit: usize,
    pub stop_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLoopConfig {
    pub event_buffer: usize,
    pub eventbus_project_capacity: usize,
    pub eventbus_global_capacity: usize,
}

impl WorkbenchConfig {
    pub fn projects_home(&self) -> PathBuf {
        PathBuf::from(&self.projects_home)
    }

    pub fn package_manager_runtime(&self) -> PackageManagerRuntimeConfig {
        PackageManagerRuntimeConfig {
            binary: self.package_manager.binary.clone(),
            install_args: self.package_manager.install_args.clone(),
            uninstall_args: self.package_manager.uninstall_args.clone(),
        }
    }

    pub fn execution_policy(&self) -> ExecutionPolicyConfig {
        ExecutionPolicyConfig {
            sustained_tasks: self.tasks.sustained.clone(),
            reload_after: self.tasks.reload_after.clone(),
            failure_patterns: self.tasks.failure_patterns.clone(),
            batch_limit: self.package_manager.batch_limit,
            stop_grace_ms: self.tasks.stop_grace_ms,
        }
    }

    pub fn event_loop(&self) -> EventLoopConfig {
        EventLoopConfig {
            event_buffer: self.runtime.event_buffer,
            eventbus_project_capacity: self.runtime.eventbus_project_capacity,
            eventbus_global_capacity: self.runtime.eventbus_global_capacity,
        }
    }
}

pub fn load_from_env() -> Result<WorkbenchConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<WorkbenchConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

pub fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_WORKBENCH_CONFIG) {
        Ok(raw) => {
            if raw.trim().is_empty() {
                default_config_path()
            } else {
                Ok(raw.into())
            }
        }
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "WORKBENCH_CONFIG contained invalid UTF-8",
        )),
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home.join(".config").join("workbench").join("config.toml"))
}

fn default_workbench_data_dir() -> PathBuf {
    resolve_data_local_dir().join("workbench")
}

fn resolve_data_local_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(path) = std::env::var("LOCALAPPDATA") {
            let path = path.trim();
            if !path.is_empty() {
                return absolutize_path(PathBuf::from(path));
            }
        }
        if let Some(home) = resolve_home_dir() {
            return home.join("AppData").join("Local");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = resolve_home_dir() {
            return home.join("Library").join("Application Support");
        }
    }

    #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
    {
        if let Ok(path) = std::env::var("XDG_DATA_HOME") {
            let path = path.trim();
            if !path.is_empty() {
                return absolutize_path(PathBuf::from(path));
            }
        }
        if let Some(home) = resolve_home_dir() {
            return home.join(".local").join("share");
        }
    }

    std::env::temp_dir()
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("USERPROFILE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
}

fn absolutize_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }

    if let Ok(current) = std::env::current_dir() {
        return current.join(path);
    }

    std::env::temp_dir().join(path)
}

fn default_projects_home() -> String {
    default_workbench_data_dir()
        .join("projects")
        .to_string_lossy()
        .to_string()
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageManagerConfigToml {
    #[serde(default = "default_package_manager_binary")]
    pub binary: String,
    #[serde(default = "default_install_args")]
    pub install_args: Vec<String>,
    #[serde(default = "default_uninstall_args")]
    pub uninstall_args: Vec<String>,
    /// Adjacent same-kind queue entries handed to one invocation.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for PackageManagerConfigToml {
    fn default() -> Self {
        Self {
            binary: default_package_manager_binary(),
            install_args: default_install_args(),
            uninstall_args: default_uninstall_args(),
            batch_limit: default_batch_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandsConfigToml {
    #[serde(default = "default_command_runner")]
    pub runner: Vec<String>,
}

impl Default for CommandsConfigToml {
    fn default() -> Self {
        Self {
            runner: default_command_runner(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TasksConfigToml {
    #[serde(default = "default_sustained_tasks")]
    pub sustained: Vec<String>,
    #[serde(default = "default_reload_after")]
    pub reload_after: Vec<String>,
    #[serde(default = "default_failure_patterns")]
    pub failure_patterns: Vec<String>,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl Default for TasksConfigToml {
    fn default() -> Self {
        Self {
            sustained: default_sustained_tasks(),
            reload_after: default_reload_after(),
            failure_patterns: default_failure_patterns(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfigToml {
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_eventbus_project_capacity")]
    pub eventbus_project_capacity: usize,
    #[serde(default = "default_eventbus_global_capacity")]
    pub eventbus_global_capacity: usize,
}

impl Default for RuntimeConfigToml {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            eventbus_project_capacity: default_eventbus_project_capacity(),
            eventbus_global_capacity: default_eventbus_global_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfigToml {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfigToml {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_package_manager_binary() -> String {
    DEFAULT_PACKAGE_MANAGER_BINARY.to_owned()
}

fn default_install_args() -> Vec<String> {
    owned(DEFAULT_INSTALL_ARGS)
}

fn default_uninstall_args() -> Vec<String> {
    owned(DEFAULT_UNINSTALL_ARGS)
}

fn default_batch_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}

fn default_command_runner() -> Vec<String> {
    owned(&DEFAULT_COMMAND_RUNNER)
}

fn default_sustained_tasks() -> Vec<String> {
    owned(&DEFAULT_SUSTAINED_TASKS)
}

fn default_reload_after() -> Vec<String> {
    owned(&DEFAULT_RELOAD_AFTER)
}

fn default_failure_patterns() -> Vec<String> {
    owned(DEFAULT_FAILURE_PATTERNS)
}

fn default_stop_grace_ms() -> u64 {
    DEFAULT_STOP_GRACE_MS
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_eventbus_project_capacity() -> usize {
    DEFAULT_EVENTBUS_PROJECT_CAPACITY
}

fn default_eventbus_global_capacity() -> usize {
    DEFAULT_EVENTBUS_GLOBAL_CAPACITY
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

fn persist_config(path: &Path, config: &WorkbenchConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize WORKBENCH_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write WORKBENCH_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<WorkbenchConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for WORKBENCH_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = WorkbenchConfig::default();
            persist_config(path, &default_config)?;
            return Ok(default_config);
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read WORKBENCH_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: WorkbenchConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse WORKBENCH_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    if normalize_config(&mut config) {
        persist_config(path, &config)?;
    }

    Ok(config)
}

fn normalize_config(config: &mut WorkbenchConfig) -> bool {
    let mut changed = normalize_non_empty_string(&mut config.projects_home, default_projects_home());
    changed |= normalize_package_manager_config(&mut config.package_manager);
    changed |= normalize_command_runner(&mut config.commands.runner);
    changed |= normalize_tasks_config(&mut config.tasks);
    changed |= normalize_runtime_config(&mut config.runtime);
    changed |= normalize_non_empty_string(&mut config.logging.filter, default_log_filter());
    changed
}

pub fn normalize_package_manager_config(config: &mut PackageManagerConfigToml) -> bool {
    let mut changed =
        normalize_non_empty_string(&mut config.binary, default_package_manager_binary());
    changed |= normalize_string_vec(&mut config.install_args);
    changed |= normalize_string_vec(&mut config.uninstall_args);

    let batch_limit = config.batch_limit.clamp(1, MAX_BATCH_LIMIT);
    if batch_limit != config.batch_limit {
        config.batch_limit = batch_limit;
        changed = true;
    }
    changed
}

/// A runner without the identifier placeholder could never select a command,
/// so it falls back to the default.
fn normalize_command_runner(runner: &mut Vec<String>) -> bool {
    let mut changed = normalize_string_vec(runner);
    if !runner
        .iter()
        .any(|part| part.contains(IDENTIFIER_PLACEHOLDER))
    {
        *runner = default_command_runner();
        changed = true;
    }
    changed
}

pub fn normalize_tasks_config(config: &mut TasksConfigToml) -> bool {
    let mut changed = normalize_string_vec(&mut config.sustained);
    changed |= normalize_string_vec(&mut config.reload_after);
    changed |= normalize_string_vec(&mut config.failure_patterns);

    let stop_grace_ms = config.stop_grace_ms.min(MAX_STOP_GRACE_MS);
    if stop_grace_ms != config.stop_grace_ms {
        config.stop_grace_ms = stop_grace_ms;
        changed = true;
    }
    changed
}

pub fn normalize_runtime_config(config: &mut RuntimeConfigToml) -> bool {
    let mut changed = false;
    for (value, min) in [
        (&mut config.event_buffer, MIN_EVENT_BUFFER),
        (&mut config.eventbus_project_capacity, 1),
        (&mut config.eventbus_global_capacity, 1),
    ] {
        let clamped = (*value).clamp(min, MAX_BUFFER);
        if clamped != *value {
            *value = clamped;
            changed = true;
        }
    }
    changed
}

fn normalize_non_empty_string(value: &mut String, default: String) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if *value != default {
            *value = default;
            return true;
        }
        return false;
    }

    if trimmed != value {
        *value = trimmed.to_owned();
        return true;
    }
    false
}

fn normalize_string_vec(values: &mut Vec<String>) -> bool {
    let normalized = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    if *values != normalized {
        *values = normalized;
        return true;
    }
    false
}
