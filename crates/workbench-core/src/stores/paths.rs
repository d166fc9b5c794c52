use std::collections::HashMap;
use std::path::{Path, PathBuf};

use workbench_protocol::ProjectId;

/// Backing directory of each known project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathStore {
    paths: HashMap<ProjectId, PathBuf>,
}

impl PathStore {
    pub fn get(&self, project_id: &ProjectId) -> Option<&Path> {
        self.paths.get(project_id).map(PathBuf::as_path)
    }

    pub fn insert(&mut self, project_id: ProjectId, path: PathBuf) -> Option<PathBuf> {
        self.paths.insert(project_id, path)
    }

    pub fn remove(&mut self, project_id: &ProjectId) -> Option<PathBuf> {
        self.paths.remove(project_id)
    }

    /// Re-keys `from` to `to`, pointing it at `new_path`.
    pub fn rekey(&mut self, from: &ProjectId, to: &ProjectId, new_path: PathBuf) {
        self.paths.remove(from);
        self.paths.insert(to.clone(), new_path);
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&ProjectId) -> bool) {
        self.paths.retain(|project_id, _| keep(project_id));
    }

    pub fn project_for_path(&self, path: &Path) -> Option<&ProjectId> {
        self.paths
            .iter()
            .find(|(_, known)| known.as_path() == path)
            .map(|(project_id, _)| project_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProjectId, &Path)> {
        self.paths
            .iter()
            .map(|(project_id, path)| (project_id, path.as_path()))
    }
}
