use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};
use workbench_core::WorkbenchEvent;
use workbench_protocol::{DependencySpec, OperationId, ProjectId};

use crate::runtime::RuntimeContext;

pub(crate) async fn install(
    context: Arc<RuntimeContext>,
    operation_id: OperationId,
    project_id: ProjectId,
    project_path: PathBuf,
    dependencies: Vec<DependencySpec>,
) {
    debug!(
        project_id = %project_id,
        operation_id = %operation_id,
        count = dependencies.len(),
        "installing dependencies"
    );
    let event = match context.packages.install(&project_path, &dependencies).await {
        Ok(installed) => WorkbenchEvent::InstallDependenciesFinish {
            operation_id,
            project_id,
            dependencies: installed,
        },
        Err(error) => {
            warn!(
                project_id = %project_id,
                operation_id = %operation_id,
                error = %error,
                "dependency install failed"
            );
            WorkbenchEvent::InstallDependenciesError {
                operation_id,
                project_id,
                error: error.to_string(),
            }
        }
    };
    context.report(event).await;
}

pub(crate) async fn uninstall(
    context: Arc<RuntimeContext>,
    operation_id: OperationId,
    project_id: ProjectId,
    project_path: PathBuf,
    names: Vec<String>,
) {
    let event = match context.packages.uninstall(&project_path, &names).await {
        Ok(()) => WorkbenchEvent::UninstallDependenciesFinish {
            operation_id,
            project_id,
            names,
        },
        Err(error) => {
            warn!(
                project_id = %project_id,
                operation_id = %operation_id,
                error = %error,
                "dependency uninstall failed"
            );
            WorkbenchEvent::UninstallDependenciesError {
                operation_id,
                project_id,
                error: error.to_string(),
            }
        }
    };
    context.report(event).await;
}

/// Reads installed versions from disk. Failures only cost the listing, so
/// they are logged and nothing is reported.
pub(crate) async fn load_info(
    context: Arc<RuntimeContext>,
    project_id: ProjectId,
    generation: u64,
    project_path: PathBuf,
    names: Vec<String>,
) {
    match context
        .manifests
        .installed_dependencies(&project_path, &names)
        .await
    {
        Ok(dependencies) => {
            context
                .report(WorkbenchEvent::DependencyInfoLoaded {
                    project_id,
                    generation,
                    dependencies,
                })
                .await;
        }
        Err(error) => {
            warn!(
                project_id = %project_id,
                error = %error,
                "failed to load dependency info"
            );
        }
    }
}
