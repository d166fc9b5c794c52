use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use workbench_protocol::{CommandId, PluginCommandDef, ProjectId};

use super::ScopedStore;
use crate::execution::{ExecutableKey, Execution};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub project_id: ProjectId,
    pub identifier: CommandId,
    pub name: String,
    pub shortcut: Option<String>,
    pub execution: Execution,
}

impl Command {
    pub fn key(&self) -> ExecutableKey {
        ExecutableKey::Command {
            project_id: self.project_id.clone(),
            identifier: self.identifier.clone(),
        }
    }

    fn from_definition(project_id: &ProjectId, definition: &PluginCommandDef) -> Self {
        Self {
            project_id: project_id.clone(),
            identifier: definition.identifier.clone(),
            name: definition.name.clone(),
            shortcut: definition.shortcut.clone(),
            execution: Execution::default(),
        }
    }
}

pub type CommandStore = ScopedStore<CommandId, Command>;

impl CommandStore {
    /// Rebuilds a project's commands from the manifest plugin block, keeping
    /// executions of commands that still exist. Returns the commands that
    /// no longer do.
    pub fn reconcile(
        &mut self,
        project_id: &ProjectId,
        definitions: &[PluginCommandDef],
    ) -> Vec<Command> {
        let mut previous = self.remove_project(project_id).unwrap_or_default();
        let commands: BTreeMap<_, _> = definitions
            .iter()
            .map(|definition| {
                let mut command = Command::from_definition(project_id, definition);
                if let Some(existing) = previous.remove(&definition.identifier) {
                    command.execution = existing.execution;
                }
                (command.identifier.clone(), command)
            })
            .collect();
        self.replace_project(project_id.clone(), commands);
        previous.into_values().collect()
    }

    /// Insert or update one command. An update keeps the execution state.
    pub fn save(&mut self, project_id: &ProjectId, definition: &PluginCommandDef) {
        match self.get_mut(project_id, &definition.identifier) {
            Some(command) => {
                command.name = definition.name.clone();
                command.shortcut = definition.shortcut.clone();
            }
            None => {
                self.upsert(
                    project_id,
                    definition.identifier.clone(),
                    Command::from_definition(project_id, definition),
                );
            }
        }
    }

    pub(crate) fn rekey_commands(&mut self, from: &ProjectId, to: &ProjectId) {
        if self.rekey(from, to) {
            for command in self.for_project_mut(to) {
                command.project_id = to.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(identifier: &str, name: &str) -> PluginCommandDef {
        PluginCommandDef {
            identifier: CommandId::new(identifier),
            name: name.to_owned(),
            shortcut: None,
            handler: None,
        }
    }

    #[test]
    fn save_updates_in_place_and_inserts_new_commands() {
        let project = ProjectId::new("p1");
        let mut store = CommandStore::default();
        store.reconcile(&project, &[definition("open", "Open")]);

        store.save(&project, &definition("open", "Open Document"));
        store.save(&project, &definition("close", "Close"));

        let names: Vec<_> = store.for_project(&project).map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Close", "Open Document"]);
    }

    #[test]
    fn rekey_rewrites_owner_of_every_command() {
        let mut store = CommandStore::default();
        store.reconcile(&ProjectId::new("old"), &[definition("open", "Open")]);
        store.rekey_commands(&ProjectId::new("old"), &ProjectId::new("new"));

        let command = store
            .get(&ProjectId::new("new"), &CommandId::new("open"))
            .expect("moved command");
        assert_eq!(command.project_id, ProjectId::new("new"));
        assert_eq!(command.key(), ExecutableKey::command("new", "open"));
    }
}
