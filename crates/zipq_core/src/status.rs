use serde::Serialize;

use crate::{TaskId, TaskKind};

/// Point-in-time snapshot of the scheduler for callers and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SchedulerStatus {
    pub queue_length: usize,
    /// The dispatch loop is live: something is queued or running.
    pub is_dispatching: bool,
    pub current_task: Option<CurrentTask>,
    pub size_limit_bytes: u64,
    pub current_size_bytes: u64,
    pub active_process_count: usize,
    pub max_concurrent_processes: usize,
    pub multi_process_enabled: bool,
    pub groups: Vec<String>,
    pub tick: u64,
}

impl SchedulerStatus {
    pub fn available_bytes(&self) -> u64 {
        self.size_limit_bytes.saturating_sub(self.current_size_bytes)
    }
}

/// The most recently launched task that is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub source: String,
    pub target: String,
}
