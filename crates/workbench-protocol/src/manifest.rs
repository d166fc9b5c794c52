//! On-disk project manifest.
//!
//! Only the identity, dependency and plugin fields are typed. Everything else
//! is carried through `extra` so a load/write cycle does not drop data the
//! workbench does not understand.

use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::CommandId;

pub const MENU_SEPARATOR: &str = "-";
pub const DEFAULT_ICON_PATH: &str = "assets/icon.png";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "devDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "skpm", skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Display name: the plugin block name when present, the package name otherwise.
    pub fn display_name(&self) -> &str {
        self.plugin
            .as_ref()
            .and_then(|plugin| plugin.name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(self.name.as_str())
    }

    pub fn plugin_mut(&mut self) -> &mut PluginBlock {
        self.plugin.get_or_insert_with(PluginBlock::default)
    }

    pub fn icon_path(&self) -> &str {
        self.plugin
            .as_ref()
            .and_then(|plugin| plugin.icon.as_deref())
            .unwrap_or(DEFAULT_ICON_PATH)
    }

    pub fn declared_dependency_names(&self) -> Vec<String> {
        self.dependencies
            .keys()
            .chain(self.dev_dependencies.keys())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PluginBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Plugin manifest file, relative to the project directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu: Option<PluginMenu<CommandId>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<PluginCommandDef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginBlock {
    /// Replaces the definition with the same identifier, or appends it.
    pub fn upsert_command(&mut self, command: &PluginCommandDef) {
        match self
            .commands
            .iter_mut()
            .find(|definition| definition.identifier == command.identifier)
        {
            Some(existing) => *existing = command.clone(),
            None => self.commands.push(command.clone()),
        }
    }

    /// Menu entries naming the command are left alone.
    pub fn remove_command(&mut self, identifier: &CommandId) -> bool {
        let before = self.commands.len();
        self.commands
            .retain(|definition| &definition.identifier != identifier);
        self.commands.len() != before
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCommandDef {
    pub identifier: CommandId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuItem<T> {
    Separator,
    Entry(T),
    Submenu(Submenu<T>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submenu<T> {
    pub title: String,
    pub items: Vec<MenuItem<T>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "MenuItem<T>: Deserialize<'de>"))]
pub struct PluginMenu<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "isRoot")]
    pub is_root: bool,
    #[serde(default = "Vec::new")]
    pub items: Vec<MenuItem<T>>,
}

impl<T> Default for PluginMenu<T> {
    fn default() -> Self {
        Self {
            title: None,
            is_root: false,
            items: Vec::new(),
        }
    }
}

impl<T: Serialize> Serialize for MenuItem<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Separator => serializer.serialize_str(MENU_SEPARATOR),
            Self::Entry(entry) => entry.serialize(serializer),
            Self::Submenu(submenu) => {
                let mut state = serializer.serialize_struct("Submenu", 2)?;
                state.serialize_field("title", &submenu.title)?;
                state.serialize_field("items", &submenu.items)?;
                state.end()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMenuItem {
    Identifier(String),
    Submenu {
        title: String,
        #[serde(default)]
        items: Vec<RawMenuItem>,
    },
}

impl From<RawMenuItem> for MenuItem<CommandId> {
    fn from(raw: RawMenuItem) -> Self {
        match raw {
            RawMenuItem::Identifier(value) if value == MENU_SEPARATOR => Self::Separator,
            RawMenuItem::Identifier(value) => Self::Entry(CommandId::new(value)),
            RawMenuItem::Submenu { title, items } => Self::Submenu(Submenu {
                title,
                items: items.into_iter().map(Self::from).collect(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for MenuItem<CommandId> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawMenuItem::deserialize(deserializer)
            .map(Self::from)
            .map_err(|error| de::Error::custom(format!("invalid plugin menu item: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn menu_tree_parses_separators_identifiers_and_submenus() {
        let menu: PluginMenu<CommandId> = serde_json::from_value(json!({
            "title": "My Plugin",
            "items": ["open", "-", {"title": "More", "items": ["close"]}]
        }))
        .expect("parse menu");

        assert_eq!(menu.title.as_deref(), Some("My Plugin"));
        assert!(!menu.is_root);
        assert_eq!(
            menu.items,
            vec![
                MenuItem::Entry(CommandId::new("open")),
                MenuItem::Separator,
                MenuItem::Submenu(Submenu {
                    title: "More".to_owned(),
                    items: vec![MenuItem::Entry(CommandId::new("close"))],
                }),
            ]
        );
    }

    #[test]
    fn manifest_preserves_unknown_fields_through_a_write() {
        let raw = json!({
            "name": "my-plugin",
            "version": "1.2.0",
            "engines": {"sketch": ">=49"},
            "skpm": {"name": "My Plugin", "main": "my-plugin.sketchplugin"},
            "dependencies": {"lodash": "^4.0.0"}
        });

        let manifest: Manifest = serde_json::from_value(raw.clone()).expect("parse manifest");
        assert_eq!(manifest.display_name(), "My Plugin");
        assert_eq!(manifest.declared_dependency_names(), vec!["lodash"]);

        let written = serde_json::to_value(&manifest).expect("serialize manifest");
        assert_eq!(written, raw);
    }

    #[test]
    fn display_name_falls_back_to_package_name() {
        let manifest = Manifest {
            name: "bare-package".to_owned(),
            ..Manifest::default()
        };
        assert_eq!(manifest.display_name(), "bare-package");
        assert_eq!(manifest.icon_path(), DEFAULT_ICON_PATH);
    }
}
