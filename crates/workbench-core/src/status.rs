use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    /// Run requested; the process has not reported a handle yet.
    Pending,
    Running,
    Aborted,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Success | Self::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    #[default]
    ShortTerm,
    /// Keeps running until stopped, e.g. a watcher or dev server.
    Sustained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnboardingStatus {
    #[default]
    BrandNew,
    CreatingFirstProject,
    IntroducingSidebar,
    Done,
}

impl OnboardingStatus {
    pub fn is_completed(self) -> bool {
        self == Self::Done
    }

    pub fn sidebar_visible(self) -> bool {
        matches!(self, Self::IntroducingSidebar | Self::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueAction {
    Install,
    Uninstall,
}
