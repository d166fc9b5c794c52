use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use workbench_core::{
    project_id_for_path, slugify, LoadedProject, ProjectMetadata, WorkbenchEvent,
};
use workbench_protocol::{
    ConfirmRequest, Manifest, PluginBlock, ProjectId, WorkbenchError, WorkbenchResult,
};

use crate::runtime::{RuntimeContext, WorkbenchRuntime};

const DELETE_OPTIONS: [&str; 3] = ["Remove from list", "Delete from disk", "Cancel"];
const RENAME_FOLDER_OPTIONS: [&str; 2] = ["Yeah", "Nope"];
const RENAME_FOLDER_CONFIRMED: usize = 0;

/// Fields edited through the settings form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectSettings {
    pub name: String,
    /// Base64 icon data; `None` keeps the current icon.
    pub icon: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    RemovedFromList,
    DeletedFromDisk,
}

impl WorkbenchRuntime {
    /// Rescans the projects home and every directory already listed.
    /// Directories that fail to load or carry no plugin block are skipped.
    pub async fn refresh_projects(&self) -> WorkbenchResult<usize> {
        let context = &self.context;
        let home = &context.settings.projects_home;

        let mut candidates: BTreeSet<PathBuf> = context
            .state
            .read()
            .await
            .paths()
            .iter()
            .map(|(_, path)| path.to_path_buf())
            .collect();
        if context.manifests.path_exists(home).await {
            candidates.extend(context.manifests.list_project_directories(home).await?);
        }
        {
            let dismissed = context.dismissed.lock().await;
            candidates.retain(|path| !dismissed.contains(path));
        }

        let mut projects = Vec::with_capacity(candidates.len());
        for path in candidates {
            match load_plugin_project(context, &path).await {
                Ok(project) => projects.push(project),
                Err(error) => {
                    debug!(path = %path.display(), error = %error, "skipping directory on refresh");
                }
            }
        }

        let count = projects.len();
        info!(count, home = %home.display(), "refreshed projects");
        context
            .submit(WorkbenchEvent::RefreshProjectsFinish { projects })
            .await?;
        Ok(count)
    }

    pub async fn import_project(&self, path: PathBuf) -> WorkbenchResult<ProjectId> {
        let context = &self.context;
        let loaded = match load_plugin_project(context, &path).await {
            Ok(project) => ensure_id_available(context, project).await,
            Err(error) => Err(error),
        };
        match loaded {
            Ok(project) => {
                let project_id = project.id().clone();
                context.dismissed.lock().await.remove(&path);
                context
                    .submit(WorkbenchEvent::ImportProjectFinish(project))
                    .await?;
                Ok(project_id)
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to import project");
                context
                    .submit(WorkbenchEvent::ImportProjectFailed {
                        path,
                        error: error.to_string(),
                    })
                    .await?;
                Err(error)
            }
        }
    }

    /// Creates `<projects home>/<slug>` with a minimal plugin manifest.
    pub async fn create_project(&self, name: &str) -> WorkbenchResult<ProjectId> {
        let context = &self.context;
        let (name, slug) = validate_project_name(name)?;
        let path = context.settings.projects_home.join(&slug);
        if context.manifests.path_exists(&path).await {
            return Err(WorkbenchError::InvalidInput(format!(
                "{} already exists",
                path.display()
            )));
        }

        context.manifests.create_directory(&path).await?;
        context
            .manifests
            .write_manifest(&path, &starter_manifest(&slug, name))
            .await?;
        let project = load_project(context, &path).await?;
        let project_id = project.id().clone();
        info!(project_id = %project_id, path = %path.display(), "created project");
        context.submit(WorkbenchEvent::AddProject(project)).await?;
        Ok(project_id)
    }

    /// Asks whether to drop the project from the list or delete its
    /// directory. Only directories under the projects home are deleted.
    pub async fn delete_project(&self, project_id: &ProjectId) -> WorkbenchResult<DeleteOutcome> {
        let context = &self.context;
        let path = context.project_path(project_id).await?;
        let name = context
            .state
            .read()
            .await
            .projects()
            .get(project_id)
            .map(|record| record.name.clone())
            .unwrap_or_else(|| project_id.to_string());

        let choice = context
            .prompt
            .confirm(ConfirmRequest {
                title: format!("Delete {name}?"),
                message: "Remove the project from the workbench, or delete its folder as well?"
                    .to_owned(),
                options: DELETE_OPTIONS.iter().map(|option| (*option).to_owned()).collect(),
                default_option: 0,
                cancel_option: 2,
            })
            .await?;

        let outcome = match choice {
            0 => {
                context.dismissed.lock().await.insert(path);
                DeleteOutcome::RemovedFromList
            }
            1 => {
                if !path.starts_with(&context.settings.projects_home) {
                    return Err(WorkbenchError::InvalidInput(format!(
                        "{} is outside the projects home; remove it from the list instead",
                        path.display()
                    )));
                }
                context.manifests.remove_directory(&path).await?;
                DeleteOutcome::DeletedFromDisk
            }
            _ => {
                return Err(WorkbenchError::Cancelled(format!(
                    "deleting {project_id}"
                )))
            }
        };

        info!(project_id = %project_id, outcome = ?outcome, "deleted project");
        context
            .submit(WorkbenchEvent::FinishDeletingProject {
                project_id: project_id.clone(),
            })
            .await?;
        Ok(outcome)
    }

    /// Writes the settings to disk, optionally renaming the folder, and only
    /// then re-keys the stores. The icon is decoded before anything on disk
    /// changes; a failed write puts the folder and manifest back, and the
    /// stores are never touched on failure.
    pub async fn save_project_settings(
        &self,
        project_id: &ProjectId,
        settings: ProjectSettings,
    ) -> WorkbenchResult<ProjectId> {
        match self.write_project_settings(project_id, settings).await {
            Ok(new_id) => Ok(new_id),
            Err(error) => {
                warn!(project_id = %project_id, error = %error, "failed to save project settings");
                self.context
                    .submit(WorkbenchEvent::SaveProjectSettingsFailed {
                        project_id: project_id.clone(),
                        error: error.to_string(),
                    })
                    .await?;
                Err(error)
            }
        }
    }

    async fn write_project_settings(
        &self,
        project_id: &ProjectId,
        settings: ProjectSettings,
    ) -> WorkbenchResult<ProjectId> {
        let context = &self.context;
        let (name, slug) = validate_project_name(&settings.name)?;
        let (old_path, old_name, old_icon) = {
            let state = context.state.read().await;
            let record = state.projects().get(project_id).ok_or_else(|| {
                WorkbenchError::Consistency(format!("unknown project {project_id}"))
            })?;
            let path = state.paths().get(project_id).ok_or_else(|| {
                WorkbenchError::Consistency(format!("project {project_id} has no path"))
            })?;
            (path.to_path_buf(), record.name.clone(), record.icon.clone())
        };
        let icon_bytes = match &settings.icon {
            Some(icon) if Some(icon) != old_icon.as_ref() => Some(decode_icon(icon)?),
            _ => None,
        };

        let original = context.manifests.load_manifest(&old_path).await?;

        let mut new_path = old_path.clone();
        if name != old_name {
            let choice = context
                .prompt
                .confirm(ConfirmRequest {
                    title: "Are you sure?".to_owned(),
                    message: "Do you also want to rename the project folder?".to_owned(),
                    options: RENAME_FOLDER_OPTIONS
                        .iter()
                        .map(|option| (*option).to_owned())
                        .collect(),
                    default_option: 1,
                    cancel_option: 1,
                })
                .await?;
            if choice == RENAME_FOLDER_CONFIRMED {
                new_path = old_path.with_file_name(&slug);
            }
        }

        if new_path != old_path {
            if context.manifests.path_exists(&new_path).await {
                return Err(WorkbenchError::Io(format!(
                    "cannot rename {}: {} already exists",
                    old_path.display(),
                    new_path.display()
                )));
            }
            context
                .manifests
                .rename_directory(&old_path, &new_path)
                .await?;
        }

        let mut manifest = original.clone();
        manifest.name = slug;
        manifest.description = settings.description.clone();
        manifest.homepage = settings.homepage.clone();
        manifest.plugin_mut().name = Some(name.to_owned());
        if let Err(error) =
            write_settings_files(context, &new_path, &manifest, icon_bytes.as_deref()).await
        {
            restore_project_folder(context, &old_path, &new_path, &original).await;
            return Err(error);
        }

        let icon = match settings.icon {
            Some(icon) => Some(icon),
            None => old_icon,
        };

        let new_id = project_id_for_path(&new_path);
        info!(old_id = %project_id, new_id = %new_id, "saved project settings");
        context
            .submit(WorkbenchEvent::SaveProjectSettingsFinish {
                old_id: project_id.clone(),
                new_id: new_id.clone(),
                name: name.to_owned(),
                metadata: ProjectMetadata {
                    icon,
                    homepage: settings.homepage,
                    description: settings.description,
                },
                new_path,
            })
            .await?;
        Ok(new_id)
    }
}

async fn write_settings_files(
    context: &RuntimeContext,
    path: &Path,
    manifest: &Manifest,
    icon: Option<&[u8]>,
) -> WorkbenchResult<()> {
    context.manifests.write_manifest(path, manifest).await?;
    if let Some(icon) = icon {
        context.manifests.write_icon(path, manifest, icon).await?;
    }
    Ok(())
}

/// Puts the original manifest back and moves the folder to where it was.
async fn restore_project_folder(
    context: &RuntimeContext,
    old_path: &Path,
    new_path: &Path,
    original: &Manifest,
) {
    if let Err(error) = context.manifests.write_manifest(new_path, original).await {
        debug!(path = %new_path.display(), error = %error, "could not restore manifest");
    }
    if new_path == old_path {
        return;
    }
    match context.manifests.rename_directory(new_path, old_path).await {
        Ok(()) => info!(path = %old_path.display(), "rolled back project folder rename"),
        Err(error) => warn!(
            from = %new_path.display(),
            to = %old_path.display(),
            error = %error,
            "failed to roll back project folder rename"
        ),
    }
}

fn decode_icon(icon: &str) -> WorkbenchResult<Vec<u8>> {
    BASE64_STANDARD
        .decode(icon.trim())
        .map_err(|error| WorkbenchError::InvalidInput(format!("icon is not base64: {error}")))
}

/// Re-reads one project after a task changed it on disk.
pub(crate) async fn reload(context: Arc<RuntimeContext>, project_id: ProjectId, path: PathBuf) {
    match load_project(&context, &path).await {
        Ok(project) => {
            context
                .report(WorkbenchEvent::ProjectReloaded(project))
                .await;
        }
        Err(error) => {
            warn!(project_id = %project_id, error = %error, "failed to reload project");
        }
    }
}

async fn load_project(context: &RuntimeContext, path: &Path) -> WorkbenchResult<LoadedProject> {
    let manifest = context.manifests.load_manifest(path).await?;
    let created_at = context.manifests.created_at(path).await?;
    let icon = match context.manifests.read_icon(path, &manifest).await {
        Ok(icon) => icon,
        Err(error) => {
            debug!(path = %path.display(), error = %error, "project icon unreadable");
            None
        }
    };
    Ok(LoadedProject::new(
        path.to_path_buf(),
        manifest,
        created_at,
        icon,
    ))
}

async fn load_plugin_project(
    context: &RuntimeContext,
    path: &Path,
) -> WorkbenchResult<LoadedProject> {
    let project = load_project(context, path).await?;
    if project.record.manifest.plugin.is_none() {
        return Err(WorkbenchError::InvalidInput(format!(
            "{} is not a plugin project: its manifest has no skpm block",
            path.display()
        )));
    }
    Ok(project)
}

/// Two directories with the same name would collide on the identifier.
async fn ensure_id_available(
    context: &RuntimeContext,
    project: LoadedProject,
) -> WorkbenchResult<LoadedProject> {
    let state = context.state.read().await;
    match state.paths().get(project.id()) {
        Some(existing) if existing != project.path.as_path() => Err(WorkbenchError::InvalidInput(format!(
            "a project named {} is already listed from {}",
            project.id(),
            existing.display()
        ))),
        _ => Ok(project),
    }
}

fn validate_project_name(name: &str) -> WorkbenchResult<(&str, String)> {
    let name = name.trim();
    if name.is_empty() {
        return Err(WorkbenchError::InvalidInput(
            "project name cannot be empty".to_owned(),
        ));
    }
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(WorkbenchError::InvalidInput(format!(
            "project name {name:?} needs at least one letter or digit"
        )));
    }
    Ok((name, slug))
}

fn starter_manifest(slug: &str, name: &str) -> Manifest {
    let scripts = [
        ("build", "skpm-build"),
        ("watch", "skpm-build --watch"),
        ("start", "skpm-build --watch --run"),
        ("postinstall", "npm run build && skpm-link"),
    ]
    .into_iter()
    .map(|(script, command)| (script.to_owned(), command.to_owned()))
    .collect::<BTreeMap<_, _>>();

    let mut extra = Map::new();
    extra.insert(
        "main".to_owned(),
        Value::String(format!("{slug}.sketchplugin")),
    );

    Manifest {
        name: slug.to_owned(),
        scripts,
        plugin: Some(PluginBlock {
            name: Some(name.to_owned()),
            manifest: Some("src/manifest.json".to_owned()),
            extra,
            ..PluginBlock::default()
        }),
        ..Manifest::default()
    }
}
