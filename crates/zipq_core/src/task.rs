use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

pub type TaskId = u64;

pub const DEFAULT_GROUP: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    Compress,
    Extract,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Compress => write!(f, "compress"),
            TaskKind::Extract => write!(f, "extract"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Byte size of a task's source. `complete` is false when a directory scan
/// was cut short and `bytes` is an extrapolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SizeEstimate {
    pub bytes: u64,
    pub complete: bool,
}

impl SizeEstimate {
    pub fn exact(bytes: u64) -> Self {
        Self {
            bytes,
            complete: true,
        }
    }

    pub fn estimated(bytes: u64) -> Self {
        Self {
            bytes,
            complete: false,
        }
    }
}

/// What to do when a compression target already exists on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingTarget {
    /// Leave the archive in place and let the archiver add into it.
    #[default]
    Merge,
    /// Delete the archive and build it from scratch.
    Overwrite,
    /// Resolve the task successfully without running the archiver.
    Skip,
    /// Skip when the archive is at most a minute older than the source,
    /// rebuild otherwise.
    Update,
}

/// Everything the scheduler needs to know about one unit of work.
///
/// The size is fixed before a `TaskSpec` reaches the queue; admission and
/// budget accounting always read this one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub id: TaskId,
    pub kind: TaskKind,
    pub source: PathBuf,
    pub target: PathBuf,
    pub group: String,
    pub size: SizeEstimate,
    pub remove_source: bool,
    pub existing_target: ExistingTarget,
}

impl TaskSpec {
    pub fn describe(&self) -> String {
        format!("{} -> {}", self.source.display(), self.target.display())
    }
}

/// How a task that ran to completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Archived,
    Extracted,
    /// The existing-target policy decided nothing needed doing.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub source: PathBuf,
    pub target: PathBuf,
    pub group: String,
    pub elapsed: Duration,
    pub result: Result<Completion, FailureKind>,
}

impl TaskOutcome {
    pub fn new(
        spec: &TaskSpec,
        elapsed: Duration,
        result: Result<Completion, FailureKind>,
    ) -> Self {
        Self {
            task_id: spec.id,
            kind: spec.kind,
            source: spec.source.clone(),
            target: spec.target.clone(),
            group: spec.group.clone(),
            elapsed,
            result,
        }
    }

    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&FailureKind> {
        self.result.as_ref().err()
    }

    pub fn state(&self) -> TaskState {
        if self.success() {
            TaskState::Completed
        } else {
            TaskState::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    SizeLimitExceeded { size: u64, limit: u64, estimated: bool },
    DuplicateTarget,
    SourceMissing,
    TargetLocked { attempts: u32 },
    ArchiverNotFound,
    Subprocess { code: Option<i32>, message: String },
    Timeout { after_ms: u64 },
    Cancelled,
    Stopped,
    Io(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::SizeLimitExceeded {
                size,
                limit,
                estimated,
            } => {
                let qualifier = if *estimated { "estimated " } else { "" };
                write!(
                    f,
                    "{qualifier}size {} exceeds processing limit {}",
                    crate::format_size(*size),
                    crate::format_size(*limit)
                )
            }
            FailureKind::DuplicateTarget => write!(f, "target already queued or running"),
            FailureKind::SourceMissing => write!(f, "source path does not exist"),
            FailureKind::TargetLocked { attempts } => {
                write!(f, "target still locked after {attempts} attempts")
            }
            FailureKind::ArchiverNotFound => write!(f, "archiver executable not found"),
            FailureKind::Subprocess { code, message } => match code {
                Some(code) => write!(f, "archiver exited with code {code}: {message}"),
                None => write!(f, "archiver terminated by signal: {message}"),
            },
            FailureKind::Timeout { after_ms } => write!(f, "archiver timed out after {after_ms}ms"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Stopped => write!(f, "scheduler stopped"),
            FailureKind::Io(message) => write!(f, "io error: {message}"),
        }
    }
}

/// `<parent>/<name>.<ext>`; files lose their own extension, directories keep
/// their full name.
pub fn compress_target(source: &Path, source_is_dir: bool, extension: &str) -> PathBuf {
    let name = if source_is_dir {
        source.file_name()
    } else {
        source.file_stem()
    };
    let name = name
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let extension = extension.trim_start_matches('.');
    parent_of(source).join(format!("{name}.{extension}"))
}

/// `<parent>/<archive stem>`.
pub fn extract_target(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "extracted".to_string());
    parent_of(archive).join(stem)
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
