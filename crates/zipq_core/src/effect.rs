use crate::{GroupSummary, TaskId, TaskOutcome, TaskSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run the archiver for this task without waiting for it.
    Launch(TaskSpec),
    /// Deliver the final outcome to the task's callback and handle.
    Resolve(TaskOutcome),
    GroupCompleted(GroupSummary),
    /// Terminate the running archiver process of this task.
    Kill { task_id: TaskId },
    StartTicker,
    StopTicker,
    /// Count archiver processes in the OS process table and report back.
    CountProcesses,
    /// Nothing is left to do after a stop request.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// Refuse new work and drain what is queued.
    Finish,
    /// Cancel queued work and kill running processes.
    Immediate,
}
