//! Shared workbench protocol: identifiers, the manifest record and the
//! contracts of the external collaborators the core drives.

pub mod backend;
pub mod defaults;
pub mod error;
pub mod ids;
pub mod manifest;
pub mod process;

pub use backend::{
    ConfirmRequest, ConfirmationPrompt, DependencySpec, ManifestStore, PackageManager,
    ProcessSpawner,
};
pub use defaults::{
    DEFAULT_BATCH_LIMIT, DEFAULT_COMMAND_RUNNER, DEFAULT_EVENTBUS_GLOBAL_CAPACITY,
    DEFAULT_EVENTBUS_PROJECT_CAPACITY, DEFAULT_EVENT_BUFFER, DEFAULT_PACKAGE_MANAGER_BINARY,
    DEFAULT_RELOAD_AFTER, DEFAULT_SUSTAINED_TASKS, IDENTIFIER_PLACEHOLDER,
};
pub use error::{WorkbenchError, WorkbenchResult};
pub use ids::{CommandId, LogEntryId, OperationId, ProcessId, ProjectId, RunId, TaskName};
pub use manifest::{
    Manifest, MenuItem, PluginBlock, PluginCommandDef, PluginMenu, Submenu, DEFAULT_ICON_PATH,
    MENU_SEPARATOR,
};
pub use process::{
    ProcessEvent, ProcessEventStream, ProcessEventSubscription, ProcessExit, ProcessHandle,
    ProcessOutput, ProcessSpawnRequest, SpawnedProcess, StopStrategy,
};

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::error::{WorkbenchError, WorkbenchResult};
    use crate::ids::{ProjectId, RunId};
    use crate::process::{ProcessEvent, ProcessEventStream, ProcessEventSubscription};

    struct EmptyProcessEventSubscription;

    #[async_trait]
    impl ProcessEventSubscription for EmptyProcessEventSubscription {
        async fn next_event(&mut self) -> WorkbenchResult<Option<ProcessEvent>> {
            Ok(None)
        }
    }

    #[test]
    fn project_id_round_trips_as_json_string() {
        let project_id = ProjectId::new("my-plugin");
        let serialized = serde_json::to_string(&project_id).expect("serialize project id");
        let deserialized: ProjectId =
            serde_json::from_str(&serialized).expect("deserialize project id");

        assert_eq!(serialized, "\"my-plugin\"");
        assert_eq!(deserialized, project_id);
    }

    #[test]
    fn run_id_serializes_as_bare_number() {
        let serialized = serde_json::to_string(&RunId::new(7)).expect("serialize run id");
        assert_eq!(serialized, "7");
    }

    #[test]
    fn only_actionable_errors_are_user_facing() {
        assert!(WorkbenchError::Io("denied".to_owned()).is_user_facing());
        assert!(WorkbenchError::PackageManager("exit 1".to_owned()).is_user_facing());
        assert!(!WorkbenchError::Consistency("stale".to_owned()).is_user_facing());
        assert!(!WorkbenchError::Cancelled("nope".to_owned()).is_user_facing());
    }

    #[test]
    fn process_event_stream_alias_accepts_trait_objects() {
        let _stream: ProcessEventStream = Box::new(EmptyProcessEventSubscription);
    }
}
