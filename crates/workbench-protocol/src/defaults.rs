//! Defaults shared by configuration, the reducer policy and the runtime.

/// Replaced by the command identifier in the command runner template.
pub const IDENTIFIER_PLACEHOLDER: &str = "{identifier}";

pub const DEFAULT_PACKAGE_MANAGER_BINARY: &str = "npm";
pub const DEFAULT_COMMAND_RUNNER: [&str; 4] = ["npx", "skpm-build", "--run", IDENTIFIER_PLACEHOLDER];
pub const DEFAULT_SUSTAINED_TASKS: [&str; 3] = ["start", "watch", "dev"];
pub const DEFAULT_RELOAD_AFTER: [&str; 1] = ["eject"];
/// Adjacent same-kind queue entries handed to one package manager call.
pub const DEFAULT_BATCH_LIMIT: usize = 1;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_EVENTBUS_PROJECT_CAPACITY: usize = 64;
pub const DEFAULT_EVENTBUS_GLOBAL_CAPACITY: usize = 512;
