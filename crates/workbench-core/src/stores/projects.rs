use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use workbench_protocol::{Manifest, ProjectId};

/// Canonical project record. The manifest is kept whole so every write can
/// round-trip fields the workbench does not interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Base64 icon data.
    pub icon: Option<String>,
    pub manifest: Manifest,
}

/// A project as read from disk, before it is split across the stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedProject {
    pub record: ProjectRecord,
    pub path: PathBuf,
}

impl LoadedProject {
    /// The identifier is the name of the backing directory.
    pub fn new(
        path: PathBuf,
        manifest: Manifest,
        created_at: OffsetDateTime,
        icon: Option<String>,
    ) -> Self {
        let id = project_id_for_path(&path);
        let name = manifest.display_name().to_owned();
        Self {
            record: ProjectRecord {
                id,
                name,
                created_at,
                icon,
                manifest,
            },
            path,
        }
    }

    pub fn id(&self) -> &ProjectId {
        &self.record.id
    }
}

/// Settings fields carried by a settings save besides the name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub icon: Option<String>,
    pub homepage: Option<String>,
    pub description: Option<String>,
}

pub fn project_id_for_path(path: &Path) -> ProjectId {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    ProjectId::new(name)
}

/// Lowercase directory-safe form of a display name: runs of anything other
/// than ASCII letters and digits collapse into a single `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for character in name.trim().chars() {
        if character.is_ascii_alphanumeric() {
            slug.push(character.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectStore {
    records: HashMap<ProjectId, ProjectRecord>,
}

impl ProjectStore {
    pub fn get(&self, project_id: &ProjectId) -> Option<&ProjectRecord> {
        self.records.get(project_id)
    }

    pub fn get_mut(&mut self, project_id: &ProjectId) -> Option<&mut ProjectRecord> {
        self.records.get_mut(project_id)
    }

    pub fn contains(&self, project_id: &ProjectId) -> bool {
        self.records.contains_key(project_id)
    }

    pub fn insert(&mut self, record: ProjectRecord) -> Option<ProjectRecord> {
        self.records.insert(record.id.clone(), record)
    }

    pub fn remove(&mut self, project_id: &ProjectId) -> Option<ProjectRecord> {
        self.records.remove(project_id)
    }

    /// Moves the record under `to`, applying `update` to the moved copy.
    /// Returns false when `from` is unknown.
    pub fn rekey(
        &mut self,
        from: &ProjectId,
        to: &ProjectId,
        update: impl FnOnce(&mut ProjectRecord),
    ) -> bool {
        let Some(mut record) = self.records.remove(from) else {
            return false;
        };
        record.id = to.clone();
        update(&mut record);
        self.records.insert(to.clone(), record);
        true
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&ProjectId) -> bool) {
        self.records.retain(|project_id, _| keep(project_id));
    }

    pub fn ids(&self) -> impl Iterator<Item = &ProjectId> {
        self.records.keys()
    }

    pub fn records(&self) -> impl Iterator<Item = &ProjectRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  My Cool  Plugin! "), "my-cool-plugin");
        assert_eq!(slugify("Already-slugged"), "already-slugged");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn loaded_project_id_comes_from_directory_name() {
        let manifest = Manifest {
            name: "package-name".to_owned(),
            ..Manifest::default()
        };
        let project = LoadedProject::new(
            PathBuf::from("/plugins/my-plugin"),
            manifest,
            OffsetDateTime::UNIX_EPOCH,
            None,
        );
        assert_eq!(project.id(), &ProjectId::new("my-plugin"));
        assert_eq!(project.record.name, "package-name");
    }
}
