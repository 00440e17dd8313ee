pub const DEFAULT_MAX_PROCESSING_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT_PROCESSES: usize = 10;

/// Concurrency and size limits enforced by the admission controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Ceiling on the summed source size of all running tasks.
    pub max_processing_bytes: u64,

    /// Upper bound on archiver processes when multi-process mode is on.
    pub max_concurrent_processes: usize,

    /// When false, strictly one task runs at a time.
    pub multi_process: bool,

    pub lock_retry: LockRetryPolicy,

    pub process_count: ProcessCountStrategy,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_processing_bytes: DEFAULT_MAX_PROCESSING_BYTES,
            max_concurrent_processes: DEFAULT_MAX_CONCURRENT_PROCESSES,
            multi_process: false,
            lock_retry: LockRetryPolicy::default(),
            process_count: ProcessCountStrategy::default(),
        }
    }
}

impl Limits {
    /// Multi-process limits with the given ceilings.
    pub fn concurrent(max_processes: usize, max_bytes: u64) -> Self {
        Self {
            max_processing_bytes: max_bytes,
            max_concurrent_processes: max_processes.max(1),
            multi_process: true,
            ..Self::default()
        }
    }
}

/// How a task whose target is held open elsewhere gets retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetryPolicy {
    /// Give up and fail the task after this many locked attempts.
    /// `None` retries until the lock clears.
    pub max_attempts: Option<u32>,

    /// Ticks to wait after the first locked attempt; doubles per attempt.
    pub base_backoff_ticks: u64,

    pub max_backoff_ticks: u64,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_backoff_ticks: 1,
            max_backoff_ticks: 1,
        }
    }
}

impl LockRetryPolicy {
    /// Whether a task that has now been found locked `attempts` times
    /// should be failed instead of requeued.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Ticks to hold a task back after its `attempts`-th locked attempt.
    pub fn backoff_ticks(&self, attempts: u32) -> u64 {
        let base = self.base_backoff_ticks.max(1);
        let shift = attempts.saturating_sub(1).min(32);
        base.saturating_mul(1u64 << shift)
            .min(self.max_backoff_ticks.max(base))
    }
}

/// Where the running-process count used for admission comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessCountStrategy {
    /// Count only the subprocesses the scheduler spawned itself.
    #[default]
    OwnedHandles,

    /// Before each tick's dispatch pass, also count archiver processes in the
    /// OS process table and use the larger of the two numbers.
    ProcessTable,
}
