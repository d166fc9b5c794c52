//! Independently keyed collections joined by project id.
//!
//! Stores never perform I/O. Removing or patching entries of a project the
//! store has never seen is a no-op.

pub mod commands;
pub mod dependencies;
pub mod paths;
pub mod projects;
pub mod tasks;

use std::collections::{BTreeMap, HashMap};

use workbench_protocol::ProjectId;

pub use commands::{Command, CommandStore};
pub use dependencies::{Dependency, DependencyStore};
pub use paths::PathStore;
pub use projects::{
    project_id_for_path, slugify, LoadedProject, ProjectMetadata, ProjectRecord, ProjectStore,
};
pub use tasks::{Task, TaskStore};

/// Collection keyed by project id and a secondary per-project key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedStore<K: Ord, V> {
    by_project: HashMap<ProjectId, BTreeMap<K, V>>,
}

impl<K: Ord, V> Default for ScopedStore<K, V> {
    fn default() -> Self {
        Self {
            by_project: HashMap::new(),
        }
    }
}

impl<K: Ord, V> ScopedStore<K, V> {
    pub fn get(&self, project_id: &ProjectId, key: &K) -> Option<&V> {
        self.by_project.get(project_id)?.get(key)
    }

    pub fn get_mut(&mut self, project_id: &ProjectId, key: &K) -> Option<&mut V> {
        self.by_project.get_mut(project_id)?.get_mut(key)
    }

    pub fn upsert(&mut self, project_id: &ProjectId, key: K, value: V) -> Option<V> {
        self.by_project
            .entry(project_id.clone())
            .or_default()
            .insert(key, value)
    }

    pub fn remove(&mut self, project_id: &ProjectId, key: &K) -> Option<V> {
        self.by_project.get_mut(project_id)?.remove(key)
    }

    pub fn replace_project(&mut self, project_id: ProjectId, values: BTreeMap<K, V>) {
        self.by_project.insert(project_id, values);
    }

    pub fn remove_project(&mut self, project_id: &ProjectId) -> Option<BTreeMap<K, V>> {
        self.by_project.remove(project_id)
    }

    /// Moves every entry of `from` under `to`. Returns false when `from` had
    /// no entries.
    pub fn rekey(&mut self, from: &ProjectId, to: &ProjectId) -> bool {
        match self.by_project.remove(from) {
            Some(values) => {
                self.by_project.insert(to.clone(), values);
                true
            }
            None => false,
        }
    }

    pub fn for_project(&self, project_id: &ProjectId) -> impl Iterator<Item = &V> {
        self.by_project
            .get(project_id)
            .into_iter()
            .flat_map(|values| values.values())
    }

    pub fn for_project_mut(&mut self, project_id: &ProjectId) -> impl Iterator<Item = &mut V> {
        self.by_project
            .get_mut(project_id)
            .into_iter()
            .flat_map(|values| values.values_mut())
    }

    pub fn contains_project(&self, project_id: &ProjectId) -> bool {
        self.by_project.contains_key(project_id)
    }
}
