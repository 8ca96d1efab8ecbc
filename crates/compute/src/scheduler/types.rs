use serde::Serialize;

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// No worker thread.
    Idle,
    Running,
    Paused,
}
