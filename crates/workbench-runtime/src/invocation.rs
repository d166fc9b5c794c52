use std::path::PathBuf;

use workbench_core::Invocation;
use workbench_protocol::{ProcessSpawnRequest, RunId, IDENTIFIER_PLACEHOLDER};

use crate::settings::RuntimeSettings;

/// Scripts run through the package manager; plugin commands through the
/// configured runner template.
pub fn spawn_request(
    settings: &RuntimeSettings,
    run_id: RunId,
    project_path: PathBuf,
    invocation: &Invocation,
) -> ProcessSpawnRequest {
    let argv: Vec<String> = match invocation {
        Invocation::Script { name } => vec![
            settings.package_manager_binary.clone(),
            "run".to_owned(),
            name.to_string(),
        ],
        Invocation::PluginCommand { identifier } => settings
            .command_runner
            .iter()
            .map(|part| part.replace(IDENTIFIER_PLACEHOLDER, identifier.as_str()))
            .collect(),
    };
    let mut argv = argv.into_iter();

    ProcessSpawnRequest {
        run_id,
        program: argv.next().unwrap_or_default(),
        args: argv.collect(),
        workdir: project_path,
        environment: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use workbench_protocol::{CommandId, TaskName};

    use super::*;

    #[test]
    fn scripts_run_through_the_package_manager() {
        let settings = RuntimeSettings::new("/home/plugins");
        let request = spawn_request(
            &settings,
            RunId::new(3),
            PathBuf::from("/home/plugins/demo"),
            &Invocation::Script {
                name: TaskName::new("build"),
            },
        );
        assert_eq!(request.program, "npm");
        assert_eq!(request.args, vec!["run", "build"]);
        assert_eq!(request.workdir, PathBuf::from("/home/plugins/demo"));
    }

    #[test]
    fn plugin_commands_substitute_the_identifier() {
        let settings = RuntimeSettings::new("/home/plugins");
        let request = spawn_request(
            &settings,
            RunId::new(4),
            PathBuf::from("/home/plugins/demo"),
            &Invocation::PluginCommand {
                identifier: CommandId::new("open"),
            },
        );
        assert_eq!(request.program, "npx");
        assert_eq!(request.args, vec!["skpm-build", "--run", "open"]);
    }
}
