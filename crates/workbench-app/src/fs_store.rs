use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;
use workbench_protocol::{DependencySpec, Manifest, ManifestStore, WorkbenchError, WorkbenchResult};

pub const MANIFEST_FILE: &str = "package.json";
const NODE_MODULES: &str = "node_modules";

/// Projects as directories holding a `package.json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsManifestStore;

#[async_trait]
impl ManifestStore for FsManifestStore {
    async fn load_manifest(&self, project_path: &Path) -> WorkbenchResult<Manifest> {
        let path = project_path.join(MANIFEST_FILE);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|error| WorkbenchError::io(format!("failed to read {}", path.display()), error))?;
        serde_json::from_str(&raw)
            .map_err(|error| WorkbenchError::io(format!("failed to parse {}", path.display()), error))
    }

    async fn write_manifest(
        &self,
        project_path: &Path,
        manifest: &Manifest,
    ) -> WorkbenchResult<()> {
        let path = project_path.join(MANIFEST_FILE);
        let mut raw = serde_json::to_string_pretty(manifest).map_err(|error| {
            WorkbenchError::io(format!("failed to serialize {}", path.display()), error)
        })?;
        raw.push('\n');
        tokio::fs::write(&path, raw)
            .await
            .map_err(|error| WorkbenchError::io(format!("failed to write {}", path.display()), error))
    }

    async fn rename_directory(&self, from: &Path, to: &Path) -> WorkbenchResult<()> {
        tokio::fs::rename(from, to).await.map_err(|error| {
            WorkbenchError::io(
                format!("failed to rename {} to {}", from.display(), to.display()),
                error,
            )
        })
    }

    async fn create_directory(&self, path: &Path) -> WorkbenchResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|error| WorkbenchError::io(format!("failed to create {}", path.display()), error))
    }

    async fn remove_directory(&self, path: &Path) -> WorkbenchResult<()> {
        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|error| WorkbenchError::io(format!("failed to remove {}", path.display()), error))
    }

    async fn path_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Visible subdirectories of `home`, sorted by name.
    async fn list_project_directories(&self, home: &Path) -> WorkbenchResult<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(home)
            .await
            .map_err(|error| WorkbenchError::io(format!("failed to list {}", home.display()), error))?;
        let mut directories = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| WorkbenchError::io(format!("failed to list {}", home.display()), error))?
        {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => directories.push(entry.path()),
                Ok(_) => {}
                Err(error) => {
                    debug!(path = %entry.path().display(), error = %error, "skipping unreadable entry");
                }
            }
        }
        directories.sort();
        Ok(directories)
    }

    async fn created_at(&self, project_path: &Path) -> WorkbenchResult<OffsetDateTime> {
        let metadata = tokio::fs::metadata(project_path).await.map_err(|error| {
            WorkbenchError::io(format!("failed to stat {}", project_path.display()), error)
        })?;
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|error| {
                WorkbenchError::io(
                    format!("no timestamps for {}", project_path.display()),
                    error,
                )
            })?;
        Ok(OffsetDateTime::from(created))
    }

    async fn read_icon(
        &self,
        project_path: &Path,
        manifest: &Manifest,
    ) -> WorkbenchResult<Option<String>> {
        let path = project_path.join(manifest.icon_path());
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(BASE64_STANDARD.encode(bytes))),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(WorkbenchError::io(
                format!("failed to read {}", path.display()),
                error,
            )),
        }
    }

    async fn write_icon(
        &self,
        project_path: &Path,
        manifest: &Manifest,
        icon: &[u8],
    ) -> WorkbenchResult<()> {
        let path = project_path.join(manifest.icon_path());
        if let Some(parent) = path.parent() {
            self.create_directory(parent).await?;
        }
        tokio::fs::write(&path, icon)
            .await
            .map_err(|error| WorkbenchError::io(format!("failed to write {}", path.display()), error))
    }

    async fn installed_dependencies(
        &self,
        project_path: &Path,
        names: &[String],
    ) -> WorkbenchResult<Vec<DependencySpec>> {
        let mut installed = Vec::with_capacity(names.len());
        for name in names {
            if let Some(version) = installed_version(project_path, name).await {
                installed.push(DependencySpec::new(name.clone(), version));
            }
        }
        Ok(installed)
    }
}

/// Version recorded in `node_modules/<name>/package.json`, if installed.
pub async fn installed_version(project_path: &Path, name: &str) -> Option<String> {
    let path = project_path
        .join(NODE_MODULES)
        .join(name)
        .join(MANIFEST_FILE);
    let raw = tokio::fs::read_to_string(&path).await.ok()?;
    let package: Value = serde_json::from_str(&raw).ok()?;
    package
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde_json::json;

    use super::*;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "workbench-app-{prefix}-{}-{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn write_json(path: &Path, value: Value) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, value.to_string()).expect("write json");
    }

    #[tokio::test]
    async fn manifest_write_keeps_unknown_fields() {
        let root = unique_temp_dir("manifest");
        write_json(
            &root.join(MANIFEST_FILE),
            json!({
                "name": "my-plugin",
                "version": "1.0.0",
                "skpm": { "name": "My Plugin", "main": "my-plugin.sketchplugin" }
            }),
        );

        let store = FsManifestStore;
        let mut manifest = store.load_manifest(&root).await.expect("load");
        manifest.description = Some("Does things".to_owned());
        store.write_manifest(&root, &manifest).await.expect("write");

        let raw: Value = serde_json::from_str(
            &std::fs::read_to_string(root.join(MANIFEST_FILE)).expect("read back"),
        )
        .expect("parse back");
        assert_eq!(raw["version"], "1.0.0");
        assert_eq!(raw["description"], "Does things");
        assert_eq!(raw["skpm"]["main"], "my-plugin.sketchplugin");

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn listing_skips_files_and_hidden_directories() {
        let root = unique_temp_dir("listing");
        std::fs::create_dir_all(root.join("beta")).expect("beta");
        std::fs::create_dir_all(root.join("alpha")).expect("alpha");
        std::fs::create_dir_all(root.join(".cache")).expect("hidden");
        std::fs::write(root.join("notes.txt"), "x").expect("file");

        let listed = FsManifestStore
            .list_project_directories(&root)
            .await
            .expect("list");
        assert_eq!(listed, vec![root.join("alpha"), root.join("beta")]);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn installed_dependencies_read_node_modules() {
        let root = unique_temp_dir("installed");
        write_json(
            &root.join(NODE_MODULES).join("lodash").join(MANIFEST_FILE),
            json!({ "name": "lodash", "version": "4.17.21" }),
        );

        let installed = FsManifestStore
            .installed_dependencies(&root, &["lodash".to_owned(), "react".to_owned()])
            .await
            .expect("installed");
        assert_eq!(installed, vec![DependencySpec::new("lodash", "4.17.21")]);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn icons_round_trip_as_base64() {
        let root = unique_temp_dir("icon");
        let manifest = Manifest::default();
        let store = FsManifestStore;

        assert_eq!(store.read_icon(&root, &manifest).await.expect("read"), None);
        let bytes = BASE64_STANDARD.decode("iVBORw0KGgo=").expect("fixture icon");
        store
            .write_icon(&root, &manifest, &bytes)
            .await
            .expect("write icon");
        assert_eq!(
            store.read_icon(&root, &manifest).await.expect("read"),
            Some("iVBORw0KGgo=".to_owned())
        );

        let _ = std::fs::remove_dir_all(root);
    }
}
