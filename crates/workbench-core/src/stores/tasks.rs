use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use workbench_protocol::{ProjectId, TaskName};

use super::ScopedStore;
use crate::execution::{ExecutableKey, Execution};
use crate::status::TaskKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub project_id: ProjectId,
    pub name: TaskName,
    /// Script body as declared in the manifest.
    pub script: String,
    pub kind: TaskKind,
    pub execution: Execution,
}

impl Task {
    pub fn key(&self) -> ExecutableKey {
        ExecutableKey::Task {
            project_id: self.project_id.clone(),
            name: self.name.clone(),
        }
    }
}

pub type TaskStore = ScopedStore<TaskName, Task>;

impl TaskStore {
    /// Rebuilds a project's tasks from its declared scripts. Tasks whose
    /// script survives keep their execution; removed scripts drop their task,
    /// which is returned.
    pub fn reconcile(
        &mut self,
        project_id: &ProjectId,
        scripts: &BTreeMap<String, String>,
        sustained: &BTreeSet<String>,
    ) -> Vec<Task> {
        let mut previous = self.remove_project(project_id).unwrap_or_default();
        let tasks = scripts
            .iter()
            .map(|(name, script)| {
                let name = TaskName::new(name.as_str());
                let execution = previous
                    .remove(&name)
                    .map(|task| task.execution)
                    .unwrap_or_default();
                let kind = if sustained.contains(name.as_str()) {
                    TaskKind::Sustained
                } else {
                    TaskKind::ShortTerm
                };
                let task = Task {
                    project_id: project_id.clone(),
                    name: name.clone(),
                    script: script.clone(),
                    kind,
                    execution,
                };
                (name, task)
            })
            .collect();
        self.replace_project(project_id.clone(), tasks);
        previous.into_values().collect()
    }

    pub(crate) fn rekey_tasks(&mut self, from: &ProjectId, to: &ProjectId) {
        if self.rekey(from, to) {
            for task in self.for_project_mut(to) {
                task.project_id = to.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use workbench_protocol::RunId;

    use super::*;
    use crate::status::ExecutionStatus;

    fn scripts(names: &[&str]) -> BTreeMap<String, String> {
        names
            .iter()
            .map(|name| ((*name).to_owned(), format!("skpm-build --{name}")))
            .collect()
    }

    #[test]
    fn reconcile_keeps_surviving_executions_and_drops_removed_scripts() {
        let project = ProjectId::new("p1");
        let sustained = BTreeSet::from(["watch".to_owned()]);
        let mut store = TaskStore::default();
        store.reconcile(&project, &scripts(&["build", "eject", "watch"]), &sustained);

        let key = ExecutableKey::task("p1", "build");
        store
            .get_mut(&project, &TaskName::new("build"))
            .expect("build task")
            .execution
            .request(&key, RunId::new(1), datetime!(2026-02-01 09:00 UTC))
            .expect("request");

        let dropped = store.reconcile(&project, &scripts(&["build", "watch"]), &sustained);
        let dropped: Vec<_> = dropped.iter().map(|task| task.name.as_str()).collect();
        assert_eq!(dropped, vec!["eject"]);

        let names: Vec<_> = store.for_project(&project).map(|task| task.name.as_str()).collect();
        assert_eq!(names, vec!["build", "watch"]);
        assert_eq!(
            store
                .get(&project, &TaskName::new("build"))
                .expect("build")
                .execution
                .status,
            ExecutionStatus::Pending
        );
        assert_eq!(
            store.get(&project, &TaskName::new("watch")).expect("watch").kind,
            TaskKind::Sustained
        );
    }
}
