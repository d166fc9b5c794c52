#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveRunState {
    /// Spawn requested, no process handle yet.
    #[default]
    Starting,
    Running,
    /// Termination requested and not yet observed.
    Stopping,
}
