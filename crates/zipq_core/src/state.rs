use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use engine_logging::RateLimiter;

use crate::admission::can_start;
use crate::group::GroupTable;
use crate::status::{CurrentTask, SchedulerStatus};
use crate::{Limits, TaskId, TaskSpec, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Accepting,
    /// A stop was requested; queued work drains, new work is refused.
    Finishing,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub spec: TaskSpec,
    /// Times the task was found with a locked target.
    pub attempts: u32,
    /// The task may not be admitted before this tick.
    pub not_before_tick: u64,
}

impl QueuedTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            attempts: 0,
            not_before_tick: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTask {
    pub task: QueuedTask,
    pub reserved_bytes: u64,
    pub started_tick: u64,
}

/// All scheduler-owned mutable state. Only [`crate::update`] mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchedulerState {
    pub(crate) limits: Limits,
    pub(crate) queue: VecDeque<QueuedTask>,
    pub(crate) active: BTreeMap<TaskId, ActiveTask>,
    pub(crate) current_bytes: u64,
    pub(crate) observed_processes: Option<usize>,
    pub(crate) groups: GroupTable,
    pub(crate) tick: u64,
    pub(crate) ticking: bool,
    pub(crate) pass_in_progress: bool,
    pub(crate) skipped_passes: RateLimiter,
    pub(crate) lock_notices: RateLimiter,
    pub(crate) session: SessionState,
    pub(crate) current_task: Option<TaskId>,
}

impl SchedulerState {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued task ids, head first.
    pub fn queued_ids(&self) -> Vec<TaskId> {
        self.queue.iter().map(|task| task.spec.id).collect()
    }

    pub fn active_ids(&self) -> Vec<TaskId> {
        self.active.keys().copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// The count admission decisions use: owned handles, or the OS process
    /// table when that reported more.
    pub fn process_count(&self) -> usize {
        self.active
            .len()
            .max(self.observed_processes.unwrap_or(0))
    }

    pub fn current_processing_bytes(&self) -> u64 {
        self.current_bytes
    }

    /// Sum of the reservations held by running tasks; always equal to
    /// [`Self::current_processing_bytes`].
    pub fn reserved_total(&self) -> u64 {
        self.active.values().map(|a| a.reserved_bytes).sum()
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        if self.active.contains_key(&id) {
            Some(TaskState::Running)
        } else if self.queue.iter().any(|task| task.spec.id == id) {
            Some(TaskState::Queued)
        } else {
            None
        }
    }

    pub fn queued_task(&self, id: TaskId) -> Option<&QueuedTask> {
        self.queue.iter().find(|task| task.spec.id == id)
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.active.is_empty()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    pub fn session(&self) -> SessionState {
        self.session
    }

    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    pub fn status(&self) -> SchedulerStatus {
        let current_task = self
            .current_task
            .and_then(|id| self.active.get(&id))
            .map(|active| CurrentTask {
                id: active.task.spec.id,
                kind: active.task.spec.kind,
                source: active.task.spec.source.display().to_string(),
                target: active.task.spec.target.display().to_string(),
            });
        SchedulerStatus {
            queue_length: self.queue.len(),
            is_dispatching: self.ticking,
            current_task,
            size_limit_bytes: self.limits.max_processing_bytes,
            current_size_bytes: self.current_bytes,
            active_process_count: self.process_count(),
            max_concurrent_processes: self.limits.max_concurrent_processes,
            multi_process_enabled: self.limits.multi_process,
            groups: self.groups.names(),
            tick: self.tick,
        }
    }

    pub(crate) fn remaining_in_group(&self, group: &str) -> usize {
        let queued = self
            .queue
            .iter()
            .filter(|task| task.spec.group == group)
            .count();
        let running = self
            .active
            .values()
            .filter(|active| active.task.spec.group == group)
            .count();
        queued + running
    }

    pub(crate) fn has_target(&self, target: &Path) -> bool {
        self.queue.iter().any(|task| task.spec.target == target)
            || self
                .active
                .values()
                .any(|active| active.task.spec.target == target)
    }

    /// Pops the queue head into the active set if it may start now.
    /// A head that may not start blocks everything behind it.
    pub(crate) fn admit_head(&mut self) -> Option<TaskSpec> {
        let head = self.queue.front()?;
        if head.not_before_tick > self.tick {
            return None;
        }
        if !can_start(
            &self.limits,
            self.process_count(),
            self.current_bytes,
            head.spec.size.bytes,
        ) {
            return None;
        }

        let task = self.queue.pop_front()?;
        let id = task.spec.id;
        let reserved_bytes = task.spec.size.bytes;
        let spec = task.spec.clone();
        self.current_bytes = self.current_bytes.saturating_add(reserved_bytes);
        if let Some(observed) = self.observed_processes.as_mut() {
            *observed += 1;
        }
        self.active.insert(
            id,
            ActiveTask {
                task,
                reserved_bytes,
                started_tick: self.tick,
            },
        );
        self.current_task = Some(id);
        Some(spec)
    }

    /// Removes a running task and gives back its reservation.
    pub(crate) fn release(&mut self, id: TaskId) -> Option<ActiveTask> {
        let active = self.active.remove(&id)?;
        debug_assert!(self.current_bytes >= active.reserved_bytes);
        self.current_bytes = self.current_bytes.saturating_sub(active.reserved_bytes);
        if let Some(observed) = self.observed_processes.as_mut() {
            *observed = observed.saturating_sub(1);
        }
        if self.current_task == Some(id) {
            self.current_task = self.active.keys().next_back().copied();
        }
        Some(active)
    }
}
