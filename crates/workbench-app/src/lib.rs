//! System-backed collaborators for the workbench runtime: the filesystem
//! manifest store, the npm package manager, the tokio process spawner and a
//! terminal confirmation prompt.

mod fs_store;
mod packages;
mod prompt;
mod spawner;

use workbench_config::WorkbenchConfig;
use workbench_core::CorePolicy;
use workbench_eventbus::WorkbenchEventBusConfig;
use workbench_runtime::RuntimeSettings;

pub use fs_store::{installed_version, FsManifestStore, MANIFEST_FILE};
pub use packages::NpmPackageManager;
pub use prompt::TerminalPrompt;
pub use spawner::TokioProcessSpawner;

pub fn runtime_settings(config: &WorkbenchConfig) -> RuntimeSettings {
    let policy = config.execution_policy();
    let event_loop = config.event_loop();
    RuntimeSettings {
        projects_home: config.projects_home(),
        policy: CorePolicy {
            sustained_tasks: policy.sustained_tasks.into_iter().collect(),
            reload_after: policy.reload_after.into_iter().collect(),
            batch_limit: policy.batch_limit,
        },
        package_manager_binary: config.package_manager.binary.clone(),
        command_runner: config.commands.runner.clone(),
        failure_patterns: policy.failure_patterns,
        event_buffer: event_loop.event_buffer,
        eventbus: WorkbenchEventBusConfig {
            project_buffer_capacity: event_loop.eventbus_project_capacity,
            global_buffer_capacity: event_loop.eventbus_global_capacity,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_settings_follow_the_config() {
        let mut config = WorkbenchConfig::default();
        config.projects_home = "/tmp/plugins".to_owned();
        config.tasks.sustained = vec!["serve".to_owned()];
        config.package_manager.binary = "pnpm".to_owned();
        config.package_manager.batch_limit = 4;

        let settings = runtime_settings(&config);
        assert_eq!(settings.projects_home, std::path::PathBuf::from("/tmp/plugins"));
        assert!(settings.policy.sustained_tasks.contains("serve"));
        assert!(!settings.policy.sustained_tasks.contains("watch"));
        assert_eq!(settings.policy.batch_limit, 4);
        assert_eq!(settings.package_manager_binary, "pnpm");
        assert_eq!(settings.command_runner, config.commands.runner);
        assert_eq!(
            settings.eventbus.global_buffer_capacity,
            config.runtime.eventbus_global_capacity
        );
    }

    #[test]
    fn default_config_matches_the_built_in_defaults() {
        let config = WorkbenchConfig::default();
        let from_config = runtime_settings(&config);
        let built_in = RuntimeSettings::new(config.projects_home());

        assert_eq!(from_config.policy, built_in.policy);
        assert_eq!(from_config.package_manager_binary, built_in.package_manager_binary);
        assert_eq!(from_config.command_runner, built_in.command_runner);
        assert_eq!(from_config.event_buffer, built_in.event_buffer);
        assert_eq!(from_config.eventbus, built_in.eventbus);
    }
}
