//! Read-only view models joined from the stores. Nothing here mutates or
//! caches; every call recomputes from the current collections.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use time::OffsetDateTime;
use workbench_protocol::{CommandId, MenuItem, PluginMenu, ProjectId, Submenu};

use crate::queue::QueuedDependency;
use crate::state::WorkbenchState;
use crate::stores::{Command, Dependency, ProjectRecord, Task};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectView {
    pub id: ProjectId,
    pub name: String,
    pub path: PathBuf,
    pub manifest_path: PathBuf,
    pub icon: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub tasks: Vec<Task>,
    pub dependencies: Vec<Dependency>,
    pub commands: Vec<Command>,
    pub plugin_menu: PluginMenu<Command>,
    /// Requests still waiting in (or running at the head of) the queue.
    pub queued_dependencies: Vec<QueuedDependency>,
}

/// Resolves menu identifiers against `commands`. Separators pass through,
/// unknown identifiers are dropped and submenus keep their title.
pub fn resolve_menu_items(items: &[MenuItem<CommandId>], commands: &[Command]) -> Vec<MenuItem<Command>> {
    items
        .iter()
        .filter_map(|item| match item {
            MenuItem::Separator => Some(MenuItem::Separator),
            MenuItem::Entry(identifier) => commands
                .iter()
                .find(|command| &command.identifier == identifier)
                .cloned()
                .map(MenuItem::Entry),
            MenuItem::Submenu(submenu) => Some(MenuItem::Submenu(Submenu {
                title: submenu.title.clone(),
                items: resolve_menu_items(&submenu.items, commands),
            })),
        })
        .collect()
}

impl WorkbenchState {
    /// `None` when no canonical record exists for `project_id`.
    pub fn compose_project(&self, project_id: &ProjectId) -> Option<ProjectView> {
        self.projects
            .get(project_id)
            .map(|record| self.compose_record(record))
    }

    /// Every project, newest first.
    pub fn projects_view(&self) -> Vec<ProjectView> {
        let mut views: Vec<_> = self
            .projects
            .records()
            .map(|record| self.compose_record(record))
            .collect();
        views.sort_by(|left, right| {
            right
                .created_at
                .cmp(&left.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        views
    }

    pub fn selected_project_view(&self) -> Option<ProjectView> {
        self.compose_project(self.selection.selected()?)
    }

    pub fn dependency_map_for_selected(&self) -> BTreeMap<String, Dependency> {
        let Some(project_id) = self.selection.selected() else {
            return BTreeMap::new();
        };
        self.dependencies
            .for_project(project_id)
            .map(|dependency| (dependency.name.clone(), dependency.clone()))
            .collect()
    }

    pub fn sidebar_visible(&self) -> bool {
        self.selection.onboarding().sidebar_visible()
    }

    fn compose_record(&self, record: &ProjectRecord) -> ProjectView {
        let project_id = &record.id;
        let path = self
            .paths
            .get(project_id)
            .map(|path| path.to_path_buf())
            .unwrap_or_default();
        let plugin = record.manifest.plugin.as_ref();
        let manifest_path = match plugin.and_then(|plugin| plugin.manifest.as_deref()) {
            Some(relative) => path.join(relative),
            None => path.clone(),
        };

        let commands: Vec<Command> = self.commands.for_project(project_id).cloned().collect();
        let menu = plugin.and_then(|plugin| plugin.menu.as_ref());
        let title = menu
            .and_then(|menu| menu.title.clone())
            .or_else(|| plugin.and_then(|plugin| plugin.name.clone()))
            .unwrap_or_else(|| project_id.to_string());
        let plugin_menu = PluginMenu {
            title: Some(title),
            is_root: menu.is_some_and(|menu| menu.is_root),
            items: menu
                .map(|menu| resolve_menu_items(&menu.items, &commands))
                .unwrap_or_default(),
        };

        ProjectView {
            id: project_id.clone(),
            name: record.name.clone(),
            path,
            manifest_path,
            icon: record.icon.clone(),
            created_at: record.created_at,
            tasks: self.tasks.for_project(project_id).cloned().collect(),
            dependencies: self.dependencies.for_project(project_id).cloned().collect(),
            commands,
            plugin_menu,
            queued_dependencies: self.queues.pending(project_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Execution;

    fn command(identifier: &str) -> Command {
        Command {
            project_id: ProjectId::new("p1"),
            identifier: CommandId::new(identifier),
            name: identifier.to_uppercase(),
            shortcut: None,
            execution: Execution::default(),
        }
    }

    #[test]
    fn dangling_identifiers_are_dropped_at_every_depth() {
        let items = vec![
            MenuItem::Entry(CommandId::new("open")),
            MenuItem::Entry(CommandId::new("gone")),
            MenuItem::Separator,
            MenuItem::Submenu(Submenu {
                title: "More".to_owned(),
                items: vec![
                    MenuItem::Entry(CommandId::new("missing")),
                    MenuItem::Entry(CommandId::new("close")),
                ],
            }),
        ];
        let commands = vec![command("open"), command("close")];

        let resolved = resolve_menu_items(&items, &commands);
        assert_eq!(
            resolved,
            vec![
                MenuItem::Entry(command("open")),
                MenuItem::Separator,
                MenuItem::Submenu(Submenu {
                    title: "More".to_owned(),
                    items: vec![MenuItem::Entry(command("close"))],
                }),
            ]
        );
    }

    #[test]
    fn resolving_is_idempotent() {
        let items = vec![MenuItem::Entry(CommandId::new("open")), MenuItem::Separator];
        let commands = vec![command("open")];
        assert_eq!(
            resolve_menu_items(&items, &commands),
            resolve_menu_items(&items, &commands)
        );
    }
}
