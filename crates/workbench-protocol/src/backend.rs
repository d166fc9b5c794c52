use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::WorkbenchResult;
use crate::manifest::Manifest;
use crate::process::{ProcessHandle, ProcessSpawnRequest, SpawnedProcess, StopStrategy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub version: String,
}

impl DependencySpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn load_manifest(&self, project_path: &Path) -> WorkbenchResult<Manifest>;
    async fn write_manifest(&self, project_path: &Path, manifest: &Manifest)
        -> WorkbenchResult<()>;
    async fn rename_directory(&self, from: &Path, to: &Path) -> WorkbenchResult<()>;
    async fn create_directory(&self, path: &Path) -> WorkbenchResult<()>;
    async fn remove_directory(&self, path: &Path) -> WorkbenchResult<()>;
    async fn path_exists(&self, path: &Path) -> bool;
    async fn list_project_directories(&self, home: &Path) -> WorkbenchResult<Vec<PathBuf>>;
    async fn created_at(&self, project_path: &Path) -> WorkbenchResult<OffsetDateTime>;
    /// Base64 icon data referenced by the manifest, if the file exists.
    async fn read_icon(
        &self,
        project_path: &Path,
        manifest: &Manifest,
    ) -> WorkbenchResult<Option<String>>;
    /// Writes already-decoded icon bytes to the file the manifest names.
    async fn write_icon(
        &self,
        project_path: &Path,
        manifest: &Manifest,
        icon: &[u8],
    ) -> WorkbenchResult<()>;
    /// Installed versions of `names`; names that are not installed are omitted.
    async fn installed_dependencies(
        &self,
        project_path: &Path,
        names: &[String],
    ) -> WorkbenchResult<Vec<DependencySpec>>;
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn install(
        &self,
        project_path: &Path,
        dependencies: &[DependencySpec],
    ) -> WorkbenchResult<Vec<DependencySpec>>;
    async fn uninstall(&self, project_path: &Path, names: &[String]) -> WorkbenchResult<()>;
}

#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, request: ProcessSpawnRequest) -> WorkbenchResult<SpawnedProcess>;
    async fn terminate(&self, handle: &ProcessHandle, strategy: StopStrategy)
        -> WorkbenchResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub title: String,
    pub message: String,
    pub options: Vec<String>,
    pub default_option: usize,
    pub cancel_option: usize,
}

#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    /// Index into `request.options` of the option the user picked.
    async fn confirm(&self, request: ConfirmRequest) -> WorkbenchResult<usize>;
}
