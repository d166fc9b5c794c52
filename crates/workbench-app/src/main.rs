use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::sync::broadcast;
use workbench_app::{
    runtime_settings, FsManifestStore, NpmPackageManager, TerminalPrompt, TokioProcessSpawner,
};
use workbench_config::WorkbenchConfig;
use workbench_core::{ExecutableKey, ExecutionStatus, ProjectView, WorkbenchEvent};
use workbench_eventbus::WorkbenchEventEnvelope;
use workbench_protocol::{MenuItem, ProjectId, WorkbenchError};
use workbench_runtime::{ProjectSettings, RuntimeCollaborators, WorkbenchRuntime};

const LOG_FILE_NAME: &str = "workbench.log";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_cli(std::env::args().skip(1))?;
    if cli.command == CliCommand::Help {
        print_cli_help();
        return Ok(());
    }

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => workbench_config::config_path_from_env()?,
    };
    let config = workbench_config::load_from_path(&config_path)?;
    init_file_logging(&config_path, &config.logging.filter)?;

    let runtime = WorkbenchRuntime::start(
        collaborators(&config, cli.assume_yes),
        runtime_settings(&config),
    );
    let result = execute(&runtime, cli.command).await;
    runtime.shutdown().await;
    result
}

fn collaborators(config: &WorkbenchConfig, assume_yes: bool) -> RuntimeCollaborators {
    let stop_grace = Duration::from_millis(config.execution_policy().stop_grace_ms);
    RuntimeCollaborators {
        manifests: Arc::new(FsManifestStore),
        packages: Arc::new(NpmPackageManager::new(config.package_manager_runtime())),
        spawner: Arc::new(TokioProcessSpawner::new(stop_grace)),
        prompt: Arc::new(TerminalPrompt::new(assume_yes)),
    }
}

fn init_file_logging(config_path: &Path, fallback_filter: &str) -> Result<(), WorkbenchError> {
    let log_path = log_file_path(config_path);
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| {
                WorkbenchError::Configuration(format!(
                    "failed to create workbench log directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|error| {
            WorkbenchError::Configuration(format!(
                "failed to open workbench log file '{}': {error}",
                log_path.display()
            ))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback_filter)),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    Ok(())
}

fn log_file_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(LOG_FILE_NAME)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Help,
    List,
    Create { name: String },
    Import { path: PathBuf },
    Run { project: ProjectId, script: String },
    Command { project: ProjectId, identifier: String },
    Install {
        project: ProjectId,
        package: String,
        version: Option<String>,
    },
    Uninstall { project: ProjectId, package: String },
    Rename { project: ProjectId, name: String },
    Delete { project: ProjectId },
    Menu { project: ProjectId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cli {
    config: Option<PathBuf>,
    assume_yes: bool,
    command: CliCommand,
}

fn parse_cli(args: impl IntoIterator<Item = String>) -> Result<Cli, WorkbenchError> {
    let mut config = None;
    let mut assume_yes = false;
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().ok_or_else(|| {
                    WorkbenchError::Configuration(
                        "Missing value after --config. Use --config <path>.".to_owned(),
                    )
                })?;
                config = Some(PathBuf::from(value));
            }
            "--yes" | "-y" => assume_yes = true,
            "--help" | "-h" => positional = vec!["help".to_owned()],
            value if value.starts_with("--") => {
                return Err(WorkbenchError::Configuration(format!(
                    "Unknown flag '{value}'. Run with --help for valid flags."
                )));
            }
            _ => positional.push(arg),
        }
    }

    let command = parse_command(&positional)?;
    Ok(Cli {
        config,
        assume_yes,
        command,
    })
}

fn parse_command(positional: &[String]) -> Result<CliCommand, WorkbenchError> {
    let Some((command, rest)) = positional.split_first() else {
        return Ok(CliCommand::Help);
    };
    let project = |index: usize| -> Result<ProjectId, WorkbenchError> {
        argument(rest, index, "project").map(ProjectId::new)
    };

    let parsed = match command.as_str() {
        "help" => CliCommand::Help,
        "list" => CliCommand::List,
        "create" => CliCommand::Create {
            name: rest.join(" "),
        },
        "import" => CliCommand::Import {
            path: PathBuf::from(argument(rest, 0, "path")?),
        },
        "run" => CliCommand::Run {
            project: project(0)?,
            script: argument(rest, 1, "script")?,
        },
        "command" => CliCommand::Command {
            project: project(0)?,
            identifier: argument(rest, 1, "identifier")?,
        },
        "install" => {
            let (package, version) = split_package_spec(&argument(rest, 1, "package")?);
            CliCommand::Install {
                project: project(0)?,
                package,
                version,
            }
        }
        "uninstall" => CliCommand::Uninstall {
            project: project(0)?,
            package: argument(rest, 1, "package")?,
        },
        "rename" => CliCommand::Rename {
            project: project(0)?,
            name: rest.get(1..).unwrap_or_default().join(" "),
        },
        "delete" => CliCommand::Delete {
            project: project(0)?,
        },
        "menu" => CliCommand::Menu {
            project: project(0)?,
        },
        unknown => {
            return Err(WorkbenchError::Configuration(format!(
                "Unknown command '{unknown}'. Run with --help for valid commands."
            )));
        }
    };
    Ok(parsed)
}

fn argument(rest: &[String], index: usize, name: &str) -> Result<String, WorkbenchError> {
    rest.get(index)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| WorkbenchError::Configuration(format!("Missing <{name}> argument.")))
}

/// `name@version`; a leading `@` belongs to a scoped package name.
fn split_package_spec(spec: &str) -> (String, Option<String>) {
    match spec.rfind('@') {
        Some(index) if index > 0 => (
            spec[..index].to_owned(),
            Some(spec[index + 1..].to_owned()).filter(|version| !version.is_empty()),
        ),
        _ => (spec.to_owned(), None),
    }
}

fn print_cli_help() {
    println!("Usage: workbench [--config <path>] [--yes] <command> [args]");
    println!();
    println!("  list                               List plugin projects");
    println!("  create <name>                      Create a plugin project");
    println!("  import <path>                      Add an existing plugin project");
    println!("  run <project> <script>             Run a script and stream its output");
    println!("  command <project> <identifier>     Run a plugin command");
    println!("  install <project> <pkg>[@version]  Install or update a dependency");
    println!("  uninstall <project> <pkg>          Remove a dependency");
    println!("  rename <project> <name>            Rename a project");
    println!("  delete <project>                   Remove a project from the list or disk");
    println!("  menu <project>                     Show the resolved plugin menu");
    println!();
    println!("  --config <path>                    Config file (default: $WORKBENCH_CONFIG)");
    println!("  --yes                              Answer every prompt with its default");
}

async fn execute(runtime: &WorkbenchRuntime, command: CliCommand) -> Result<()> {
    refresh(runtime).await?;

    match command {
        CliCommand::Help => print_cli_help(),
        CliCommand::List => {
            for view in runtime.projects_view().await {
                print_project(&view);
            }
        }
        CliCommand::Create { name } => {
            let project_id = runtime.create_project(&name).await?;
            println!("created {project_id}");
        }
        CliCommand::Import { path } => {
            let project_id = runtime.import_project(path).await?;
            println!("imported {project_id}");
        }
        CliCommand::Run { project, script } => {
            run_to_completion(runtime, ExecutableKey::task(project, script.as_str())).await?;
        }
        CliCommand::Command {
            project,
            identifier,
        } => {
            run_to_completion(runtime, ExecutableKey::command(project, identifier.as_str()))
                .await?;
        }
        CliCommand::Install {
            project,
            package,
            version,
        } => {
            let view = require_project(runtime, &project).await?;
            let updating = view
                .dependencies
                .iter()
                .any(|dependency| dependency.name == package);
            let mut events = runtime.subscribe_project(project.clone());
            runtime
                .queue_install(project, package, version, updating)
                .await?;
            match wait_for(&mut events, |event| {
                matches!(
                    event,
                    WorkbenchEvent::InstallDependenciesFinish { .. }
                        | WorkbenchEvent::InstallDependenciesError { .. }
                )
            })
            .await?
            {
                WorkbenchEvent::InstallDependenciesFinish { dependencies, .. } => {
                    for dependency in dependencies {
                        println!("installed {}@{}", dependency.name, dependency.version);
                    }
                }
                WorkbenchEvent::InstallDependenciesError { error, .. } => bail!(error),
                _ => {}
            }
        }
        CliCommand::Uninstall { project, package } => {
            require_project(runtime, &project).await?;
            let mut events = runtime.subscribe_project(project.clone());
            runtime.queue_uninstall(project, package).await?;
            match wait_for(&mut events, |event| {
                matches!(
                    event,
                    WorkbenchEvent::UninstallDependenciesFinish { .. }
                        | WorkbenchEvent::UninstallDependenciesError { .. }
                )
            })
            .await?
            {
                WorkbenchEvent::UninstallDependenciesFinish { names, .. } => {
                    println!("uninstalled {}", names.join(", "));
                }
                WorkbenchEvent::UninstallDependenciesError { error, .. } => bail!(error),
                _ => {}
            }
        }
        CliCommand::Rename { project, name } => {
            require_project(runtime, &project).await?;
            let (description, homepage) = runtime
                .read(|state| {
                    state
                        .projects()
                        .get(&project)
                        .map(|record| {
                            (
                                record.manifest.description.clone(),
                                record.manifest.homepage.clone(),
                            )
                        })
                        .unwrap_or_default()
                })
                .await;
            let new_id = runtime
                .save_project_settings(
                    &project,
                    ProjectSettings {
                        name,
                        icon: None,
                        description,
                        homepage,
                    },
                )
                .await?;
            println!("saved {new_id}");
        }
        CliCommand::Delete { project } => {
            require_project(runtime, &project).await?;
            let outcome = runtime.delete_project(&project).await?;
            println!("{project}: {outcome:?}");
        }
        CliCommand::Menu { project } => {
            let view = require_project(runtime, &project).await?;
            println!("{}", view.plugin_menu.title.as_deref().unwrap_or_default());
            print_menu(&view.plugin_menu.items, 1);
        }
    }
    Ok(())
}

async fn refresh(runtime: &WorkbenchRuntime) -> Result<()> {
    let mut events = runtime.subscribe_all();
    runtime.refresh_projects().await?;
    wait_for(&mut events, |event| {
        matches!(event, WorkbenchEvent::RefreshProjectsFinish { .. })
    })
    .await?;
    Ok(())
}

async fn require_project(runtime: &WorkbenchRuntime, project: &ProjectId) -> Result<ProjectView> {
    runtime
        .project_view(project)
        .await
        .ok_or_else(|| anyhow!("unknown project {project}"))
}

async fn wait_for(
    events: &mut broadcast::Receiver<WorkbenchEventEnvelope>,
    matches: impl Fn(&WorkbenchEvent) -> bool,
) -> Result<WorkbenchEvent> {
    loop {
        match events.recv().await {
            Ok(envelope) if matches(&envelope.event) => return Ok(envelope.event),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => bail!("workbench event bus closed"),
        }
    }
}

/// Streams the run's output and fails unless it succeeds.
async fn run_to_completion(runtime: &WorkbenchRuntime, key: ExecutableKey) -> Result<()> {
    let project = key.project_id().clone();
    require_project(runtime, &project).await?;
    match runtime.read(|state| state.execution(&key).map(|e| e.status)).await {
        None => bail!("{key} does not exist"),
        Some(status) if status.is_active() => bail!("{key} is already running"),
        Some(_) => {}
    }

    let mut events = runtime.subscribe_project(project);
    runtime.run(key.clone()).await?;
    loop {
        match wait_for(&mut events, |event| {
            matches!(
                event,
                WorkbenchEvent::ProcessOutput { .. }
                    | WorkbenchEvent::ProcessExited { .. }
                    | WorkbenchEvent::ProcessAborted { .. }
            )
        })
        .await?
        {
            WorkbenchEvent::ProcessOutput { text, is_error, .. } => {
                if is_error {
                    eprintln!("{text}");
                } else {
                    println!("{text}");
                }
            }
            _ => break,
        }
    }

    let status = runtime
        .read(|state| state.execution(&key).map(|execution| execution.status))
        .await;
    match status {
        Some(ExecutionStatus::Success) => Ok(()),
        Some(status) => bail!("{key} finished as {status:?}"),
        None => bail!("{key} disappeared while running"),
    }
}

fn print_project(view: &ProjectView) {
    println!("{}\t{}\t{}", view.id, view.name, view.path.display());
    let scripts: Vec<_> = view.tasks.iter().map(|task| task.name.as_str()).collect();
    if !scripts.is_empty() {
        println!("  scripts: {}", scripts.join(", "));
    }
    for dependency in &view.dependencies {
        match &dependency.latest_version {
            Some(latest) if latest != &dependency.version => println!(
                "  {}@{} (latest {latest})",
                dependency.name, dependency.version
            ),
            _ => println!("  {}@{}", dependency.name, dependency.version),
        }
    }
}

fn print_menu(items: &[MenuItem<workbench_core::Command>], depth: usize) {
    let indent = "  ".repeat(depth);
    for item in items {
        match item {
            MenuItem::Separator => println!("{indent}---"),
            MenuItem::Entry(command) => match &command.shortcut {
                Some(shortcut) => println!("{indent}{} [{shortcut}]", command.name),
                None => println!("{indent}{}", command.name),
            },
            MenuItem::Submenu(submenu) => {
                println!("{indent}{}", submenu.title);
                print_menu(&submenu.items, depth + 1);
            }
        }
    }
}
