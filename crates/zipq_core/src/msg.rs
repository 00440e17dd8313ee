use std::time::Duration;

use crate::{Completion, FailureKind, StopPolicy, TaskId, TaskSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// A caller submitted a task; its size is already fixed.
    Submit(TaskSpec),
    /// A group callback was registered or replaced.
    SetGroupCallback { group: String },
    /// The executor found the target held open and did not run the archiver.
    TargetLocked { task_id: TaskId },
    /// The executor finished with the task, successfully or not.
    TaskFinished {
        task_id: TaskId,
        elapsed: Duration,
        result: Result<Completion, FailureKind>,
    },
    /// Drop a queued task or kill a running one.
    Cancel { task_id: TaskId },
    /// Safety-net timer; also paces lock retries.
    Tick,
    /// Archiver processes found in the OS process table, if the listing worked.
    ProcessCountObserved { running: Option<usize> },
    SetMaxProcessingBytes(u64),
    SetMultiProcess(bool),
    SetMaxConcurrentProcesses(usize),
    Stop { policy: StopPolicy },
}
