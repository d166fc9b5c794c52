use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use workbench_protocol::{DependencySpec, ProjectId};

use super::ScopedStore;

/// Installed package as last confirmed by the package manager or the
/// project's installed modules. Never written optimistically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

pub type DependencyStore = ScopedStore<String, Dependency>;

impl DependencyStore {
    /// Upserts confirmed installs, keeping any known latest version.
    pub fn apply_installed(&mut self, project_id: &ProjectId, installed: &[DependencySpec]) {
        for spec in installed {
            let latest_version = self
                .get(project_id, &spec.name)
                .and_then(|existing| existing.latest_version.clone());
            self.upsert(
                project_id,
                spec.name.clone(),
                Dependency {
                    name: spec.name.clone(),
                    version: spec.version.clone(),
                    latest_version,
                },
            );
        }
    }

    pub fn apply_uninstalled(&mut self, project_id: &ProjectId, names: &[String]) {
        for name in names {
            self.remove(project_id, name);
        }
    }

    /// Bulk replacement after reading installed versions from disk.
    pub fn replace_installed(&mut self, project_id: &ProjectId, installed: &[DependencySpec]) {
        let values = installed
            .iter()
            .map(|spec| {
                let latest_version = self
                    .get(project_id, &spec.name)
                    .and_then(|existing| existing.latest_version.clone());
                (
                    spec.name.clone(),
                    Dependency {
                        name: spec.name.clone(),
                        version: spec.version.clone(),
                        latest_version,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        self.replace_project(project_id.clone(), values);
    }

    /// Returns false when the dependency is not installed.
    pub fn set_latest_version(
        &mut self,
        project_id: &ProjectId,
        name: &str,
        latest_version: String,
    ) -> bool {
        match self.get_mut(project_id, &name.to_owned()) {
            Some(dependency) => {
                dependency.latest_version = Some(latest_version);
                true
            }
            None => false,
        }
    }

    pub fn version_map(&self, project_id: &ProjectId) -> BTreeMap<String, String> {
        self.for_project(project_id)
            .map(|dependency| (dependency.name.clone(), dependency.version.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installs_keep_latest_version_and_uninstalls_remove() {
        let project = ProjectId::new("p1");
        let mut store = DependencyStore::default();
        store.apply_installed(&project, &[DependencySpec::new("lodash", "4.0.0")]);
        assert!(store.set_latest_version(&project, "lodash", "4.17.21".to_owned()));

        store.apply_installed(&project, &[DependencySpec::new("lodash", "4.17.0")]);
        let lodash = store.get(&project, &"lodash".to_owned()).expect("lodash");
        assert_eq!(lodash.version, "4.17.0");
        assert_eq!(lodash.latest_version.as_deref(), Some("4.17.21"));

        store.apply_uninstalled(&project, &["lodash".to_owned(), "missing".to_owned()]);
        assert!(store.version_map(&project).is_empty());
    }

    #[test]
    fn latest_version_patch_for_unknown_dependency_is_ignored() {
        let mut store = DependencyStore::default();
        assert!(!store.set_latest_version(&ProjectId::new("p1"), "react", "18.0.0".to_owned()));
        assert!(!store.contains_project(&ProjectId::new("p1")));
    }
}
