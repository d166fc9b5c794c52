use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use workbench_config::PackageManagerRuntimeConfig;
use workbench_protocol::{DependencySpec, PackageManager, WorkbenchError, WorkbenchResult};

use crate::fs_store::installed_version;

const STDERR_TAIL_LINES: usize = 20;

/// Shells out to an npm-compatible binary.
#[derive(Debug, Clone)]
pub struct NpmPackageManager {
    config: PackageManagerRuntimeConfig,
}

impl NpmPackageManager {
    pub fn new(config: PackageManagerRuntimeConfig) -> Self {
        Self { config }
    }

    fn install_args(&self, dependencies: &[DependencySpec]) -> Vec<String> {
        self.config
            .install_args
            .iter()
            .cloned()
            .chain(
                dependencies
                    .iter()
                    .map(|spec| format!("{}@{}", spec.name, spec.version)),
            )
            .collect()
    }

    fn uninstall_args(&self, names: &[String]) -> Vec<String> {
        self.config
            .uninstall_args
            .iter()
            .chain(names)
            .cloned()
            .collect()
    }

    async fn run(&self, project_path: &Path, args: &[String]) -> WorkbenchResult<()> {
        debug!(binary = %self.config.binary, ?args, cwd = %project_path.display(), "running package manager");
        let output = Command::new(&self.config.binary)
            .args(args)
            .current_dir(project_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| {
                WorkbenchError::PackageManager(format!(
                    "failed to start {}: {error}",
                    self.config.binary
                ))
            })?;
        if output.status.success() {
            return Ok(());
        }
        Err(WorkbenchError::PackageManager(format!(
            "{} {} exited with {}: {}",
            self.config.binary,
            args.join(" "),
            output.status,
            stderr_tail(&output.stderr)
        )))
    }
}

#[async_trait]
impl PackageManager for NpmPackageManager {
    /// Resolved versions are read back from `node_modules`; a package that
    /// cannot be read keeps the requested version.
    async fn install(
        &self,
        project_path: &Path,
        dependencies: &[DependencySpec],
    ) -> WorkbenchResult<Vec<DependencySpec>> {
        self.run(project_path, &self.install_args(dependencies))
            .await?;
        let mut installed = Vec::with_capacity(dependencies.len());
        for spec in dependencies {
            let version = installed_version(project_path, &spec.name)
                .await
                .unwrap_or_else(|| spec.version.clone());
            installed.push(DependencySpec::new(spec.name.clone(), version));
        }
        info!(project = %project_path.display(), count = installed.len(), "installed dependencies");
        Ok(installed)
    }

    async fn uninstall(&self, project_path: &Path, names: &[String]) -> WorkbenchResult<()> {
        self.run(project_path, &self.uninstall_args(names)).await?;
        info!(project = %project_path.display(), count = names.len(), "uninstalled dependencies");
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> NpmPackageManager {
        NpmPackageManager::new(PackageManagerRuntimeConfig {
            binary: "npm".to_owned(),
            install_args: vec!["install".to_owned(), "--save".to_owned()],
            uninstall_args: vec!["uninstall".to_owned(), "--save".to_owned()],
        })
    }

    #[test]
    fn install_args_pin_each_requested_version() {
        let args = manager().install_args(&[
            DependencySpec::new("lodash", "4.17.21"),
            DependencySpec::new("react", "latest"),
        ]);
        assert_eq!(
            args,
            vec!["install", "--save", "lodash@4.17.21", "react@latest"]
        );
    }

    #[test]
    fn uninstall_args_list_names() {
        let args = manager().uninstall_args(&["left-pad".to_owned()]);
        assert_eq!(args, vec!["uninstall", "--save", "left-pad"]);
    }

    #[test]
    fn stderr_tail_keeps_the_last_lines() {
        let stderr: String = (0..30).map(|line| format!("line {line}\n")).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }
}
