//! Zipq core: pure scheduler state machine for archiver tasks.
//!
//! Nothing in this crate touches the filesystem or spawns processes. The
//! engine feeds [`Msg`]s into [`update`] and carries out the returned
//! [`Effect`]s.
pub mod admission;
mod effect;
mod format;
pub mod group;
mod limits;
mod msg;
mod state;
mod status;
mod task;
mod update;

pub use effect::{Effect, StopPolicy};
pub use format::format_size;
pub use group::{GroupEntry, GroupSummary, GroupTable};
pub use limits::{
    Limits, LockRetryPolicy, ProcessCountStrategy, DEFAULT_MAX_CONCURRENT_PROCESSES,
    DEFAULT_MAX_PROCESSING_BYTES,
};
pub use msg::Msg;
pub use state::{ActiveTask, QueuedTask, SchedulerState, SessionState};
pub use status::{CurrentTask, SchedulerStatus};
pub use task::{
    compress_target, extract_target, Completion, ExistingTarget, FailureKind, SizeEstimate,
    TaskId, TaskKind, TaskOutcome, TaskSpec, TaskState, DEFAULT_GROUP,
};
pub use update::update;
