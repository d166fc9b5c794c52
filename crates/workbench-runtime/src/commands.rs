use tracing::warn;
use workbench_core::WorkbenchEvent;
use workbench_protocol::{
    CommandId, Manifest, PluginCommandDef, PluginMenu, ProjectId, WorkbenchError, WorkbenchResult,
};

use crate::runtime::WorkbenchRuntime;

impl WorkbenchRuntime {
    /// Adds the command, or replaces the one with the same identifier.
    pub async fn save_command(
        &self,
        project_id: &ProjectId,
        command: PluginCommandDef,
    ) -> WorkbenchResult<()> {
        if command.identifier.as_str().trim().is_empty() || command.name.trim().is_empty() {
            return Err(WorkbenchError::InvalidInput(
                "a command needs an identifier and a name".to_owned(),
            ));
        }

        let written = self
            .update_manifest(project_id, |manifest| {
                manifest.plugin_mut().upsert_command(&command);
            })
            .await;
        self.report_command_result(project_id, written, || WorkbenchEvent::CommandSaved {
            project_id: project_id.clone(),
            command,
        })
        .await
    }

    pub async fn delete_command(
        &self,
        project_id: &ProjectId,
        identifier: &CommandId,
    ) -> WorkbenchResult<()> {
        let written = self
            .update_manifest(project_id, |manifest| {
                if let Some(plugin) = manifest.plugin.as_mut() {
                    plugin.remove_command(identifier);
                }
            })
            .await;
        self.report_command_result(project_id, written, || WorkbenchEvent::CommandDeleted {
            project_id: project_id.clone(),
            identifier: identifier.clone(),
        })
        .await
    }

    pub async fn save_plugin_menu(
        &self,
        project_id: &ProjectId,
        menu: PluginMenu<CommandId>,
    ) -> WorkbenchResult<()> {
        let saved = menu.clone();
        if let Err(error) = self
            .update_manifest(project_id, move |manifest| {
                manifest.plugin_mut().menu = Some(saved);
            })
            .await
        {
            warn!(project_id = %project_id, error = %error, "failed to save plugin menu");
            return Err(error);
        }
        self.context
            .submit(WorkbenchEvent::PluginMenuSaved {
                project_id: project_id.clone(),
                menu,
            })
            .await
    }

    async fn update_manifest(
        &self,
        project_id: &ProjectId,
        update: impl FnOnce(&mut Manifest),
    ) -> WorkbenchResult<()> {
        let path = self.context.project_path(project_id).await?;
        let mut manifest = self.context.manifests.load_manifest(&path).await?;
        update(&mut manifest);
        self.context.manifests.write_manifest(&path, &manifest).await
    }

    async fn report_command_result(
        &self,
        project_id: &ProjectId,
        written: WorkbenchResult<()>,
        finished: impl FnOnce() -> WorkbenchEvent,
    ) -> WorkbenchResult<()> {
        match written {
            Ok(()) => self.context.submit(finished()).await,
            Err(error) => {
                warn!(project_id = %project_id, error = %error, "failed to save command");
                self.context
                    .submit(WorkbenchEvent::CommandSaveFailed {
                        project_id: project_id.clone(),
                        error: error.to_string(),
                    })
                    .await?;
                Err(error)
            }
        }
    }
}
