//! Per-project FIFO of dependency install/uninstall requests.
//!
//! At most one operation is in flight per project. Entries stay at the head
//! of the queue while their operation runs and are popped when it finishes,
//! successfully or not. Queues of different projects are independent.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use workbench_protocol::{OperationId, ProjectId};

use crate::status::QueueAction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedDependency {
    pub name: String,
    /// Requested version for installs; `None` means latest, or an uninstall.
    pub version: Option<String>,
    pub action: QueueAction,
    /// The package is already installed and this install updates it.
    pub updating: bool,
}

impl QueuedDependency {
    pub fn install(name: impl Into<String>, version: Option<String>, updating: bool) -> Self {
        Self {
            name: name.into(),
            version,
            action: QueueAction::Install,
            updating,
        }
    }

    pub fn uninstall(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            action: QueueAction::Uninstall,
            updating: false,
        }
    }
}

/// An operation handed to the package manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedOperation {
    pub operation_id: OperationId,
    pub project_id: ProjectId,
    pub action: QueueAction,
    pub entries: Vec<QueuedDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveOperation {
    operation_id: OperationId,
    batch_len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ProjectQueue {
    entries: VecDeque<QueuedDependency>,
    active: Option<ActiveOperation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyQueues {
    queues: HashMap<ProjectId, ProjectQueue>,
    next_operation_id: u64,
    batch_limit: usize,
}

impl Default for DependencyQueues {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DependencyQueues {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            queues: HashMap::new(),
            next_operation_id: 0,
            batch_limit: batch_limit.max(1),
        }
    }

    pub fn enqueue(&mut self, project_id: &ProjectId, entry: QueuedDependency) {
        self.queues
            .entry(project_id.clone())
            .or_default()
            .entries
            .push_back(entry);
    }

    /// Starts the head of the project's queue unless an operation is already
    /// in flight or the queue is empty. Adjacent entries of the same action
    /// are batched up to the batch limit.
    pub fn start_next(&mut self, project_id: &ProjectId) -> Option<StartedOperation> {
        let batch_limit = self.batch_limit;
        let queue = self.queues.get_mut(project_id)?;
        if queue.active.is_some() {
            return None;
        }
        let action = queue.entries.front()?.action;
        let entries: Vec<_> = queue
            .entries
            .iter()
            .take(batch_limit)
            .take_while(|entry| entry.action == action)
            .cloned()
            .collect();

        self.next_operation_id = self
            .next_operation_id
            .checked_add(1)
            .expect("dependency operation id space exhausted");
        let operation_id = OperationId::new(self.next_operation_id);
        queue.active = Some(ActiveOperation {
            operation_id,
            batch_len: entries.len(),
        });

        Some(StartedOperation {
            operation_id,
            project_id: project_id.clone(),
            action,
            entries,
        })
    }

    /// Pops the entries of a finished operation and returns the project it
    /// belonged to, or `None` when no project has that operation in flight.
    pub fn finish(&mut self, operation_id: OperationId) -> Option<ProjectId> {
        let (project_id, queue) = self.queues.iter_mut().find(|(_, queue)| {
            queue
                .active
                .as_ref()
                .is_some_and(|active| active.operation_id == operation_id)
        })?;
        let batch_len = queue.active.take().map_or(0, |active| active.batch_len);
        for _ in 0..batch_len {
            queue.entries.pop_front();
        }
        Some(project_id.clone())
    }

    /// Project whose queue is currently running `operation_id`.
    pub fn project_for_operation(&self, operation_id: OperationId) -> Option<&ProjectId> {
        self.queues.iter().find_map(|(project_id, queue)| {
            queue
                .active
                .as_ref()
                .filter(|active| active.operation_id == operation_id)
                .map(|_| project_id)
        })
    }

    pub fn pending(&self, project_id: &ProjectId) -> Vec<QueuedDependency> {
        self.queues
            .get(project_id)
            .map(|queue| queue.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_active(&self, project_id: &ProjectId) -> bool {
        self.queues
            .get(project_id)
            .is_some_and(|queue| queue.active.is_some())
    }

    pub fn is_empty(&self, project_id: &ProjectId) -> bool {
        self.queues
            .get(project_id)
            .map_or(true, |queue| queue.entries.is_empty())
    }

    pub fn remove_project(&mut self, project_id: &ProjectId) {
        self.queues.remove(project_id);
    }

    pub fn rekey_project(&mut self, from: &ProjectId, to: &ProjectId) {
        if let Some(queue) = self.queues.remove(from) {
            self.queues.insert(to.clone(), queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> ProjectId {
        ProjectId::new("p1")
    }

    #[test]
    fn start_next_peeks_and_guards_against_overlap() {
        let mut queues = DependencyQueues::default();
        queues.enqueue(&project(), QueuedDependency::install("react", None, false));
        queues.enqueue(&project(), QueuedDependency::uninstall("lodash"));

        let started = queues.start_next(&project()).expect("first operation");
        assert_eq!(started.entries, vec![QueuedDependency::install("react", None, false)]);
        assert_eq!(queues.pending(&project()).len(), 2);
        assert_eq!(queues.start_next(&project()), None);

        assert_eq!(queues.finish(started.operation_id), Some(project()));
        assert_eq!(queues.pending(&project()), vec![QueuedDependency::uninstall("lodash")]);

        let second = queues.start_next(&project()).expect("second operation");
        assert_eq!(second.action, QueueAction::Uninstall);
        assert_ne!(second.operation_id, started.operation_id);
    }

    #[test]
    fn batches_adjacent_entries_of_the_same_action() {
        let mut queues = DependencyQueues::new(3);
        queues.enqueue(&project(), QueuedDependency::install("a", None, false));
        queues.enqueue(&project(), QueuedDependency::install("b", None, false));
        queues.enqueue(&project(), QueuedDependency::uninstall("c"));
        queues.enqueue(&project(), QueuedDependency::install("d", None, false));

        let started = queues.start_next(&project()).expect("batch");
        let names: Vec<_> = started.entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        queues.finish(started.operation_id);
        assert_eq!(queues.pending(&project()).len(), 2);
    }

    #[test]
    fn finish_of_unknown_operation_is_reported() {
        let mut queues = DependencyQueues::default();
        assert_eq!(queues.finish(OperationId::new(99)), None);
        assert!(queues.is_empty(&project()));
    }

    #[test]
    fn operation_survives_project_rekey() {
        let mut queues = DependencyQueues::default();
        queues.enqueue(&project(), QueuedDependency::uninstall("lodash"));
        let started = queues.start_next(&project()).expect("start");

        queues.rekey_project(&project(), &ProjectId::new("p2"));
        assert_eq!(queues.finish(started.operation_id), Some(ProjectId::new("p2")));
        assert!(queues.is_empty(&ProjectId::new("p2")));
    }

    #[test]
    #[should_panic(expected = "dependency operation id space exhausted")]
    fn start_next_panics_when_operation_id_space_is_exhausted() {
        let mut queues = DependencyQueues {
            queues: HashMap::new(),
            next_operation_id: u64::MAX,
            batch_limit: 1,
        };
        queues.enqueue(&project(), QueuedDependency::uninstall("lodash"));
        let _ = queues.start_next(&project());
    }
}
