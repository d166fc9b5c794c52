use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkbenchError {
    #[error("filesystem error: {0}")]
    Io(String),
    #[error("package manager error: {0}")]
    PackageManager(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("consistency error: {0}")]
    Consistency(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl WorkbenchError {
    pub fn io(context: impl AsRef<str>, error: impl std::fmt::Display) -> Self {
        Self::Io(format!("{}: {error}", context.as_ref()))
    }

    /// Failures that must be shown to the user as a blocking message.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Consistency(_) | Self::Cancelled(_))
    }
}

pub type WorkbenchResult<T> = Result<T, WorkbenchError>;
