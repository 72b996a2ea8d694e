use serde::{Deserialize, Serialize};

/// Protocol-level result of a tracker operation.
///
/// `Suspend` tells a polling worker to sleep and retry; `NoMore` tells it to
/// exit because nothing will ever be handed to it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Suspend,
    NoMore,
    GalaxyError,
    WriteFileFail,
    OpenFileFail,
    NoSuchJob,
    NoSuchTask,
}

/// State of a single attempt, as recorded in the allocation table and as
/// reported by workers.
///
/// `MoveOutputFailed` is only ever reported by a worker whose task ran but
/// could not promote its output; the tracker re-maps it to `Failed` or
/// `Canceled` depending on whether the task id is already done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Running,
    Completed,
    Failed,
    Killed,
    Canceled,
    MoveOutputFailed,
}

/// Progress summary of one phase, for the job listing surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total: u32,
    pub pending: u32,
    pub running: u32,
    pub completed: u32,
    pub failed: u32,
    pub killed: u32,
}
