use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::future::join;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use zipq_core::{Completion, ExistingTarget, FailureKind, TaskKind, TaskSpec};

use crate::archiver::{compress_args, extract_args, failure_message, locate_archiver};
use crate::config::{ArchiveFormat, SchedulerConfig};
use crate::lock::LockProbe;

/// An archive no older than this relative to its source counts as current.
const UPDATE_TOLERANCE: Duration = Duration::from_secs(60);

/// Runs the archiver for one task. The scheduler owns everything around the
/// invocation; implementations only turn a spec into a finished process.
#[async_trait]
pub trait ArchiveRunner: Send + Sync {
    async fn run(&self, spec: &TaskSpec, cancel: CancellationToken) -> Result<(), FailureKind>;
}

#[derive(Debug, Clone)]
pub struct SevenZipRunner {
    archiver_path: Option<PathBuf>,
    format: ArchiveFormat,
    level: u8,
    timeout: Option<Duration>,
}

impl SevenZipRunner {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            archiver_path: config.archiver_path.clone(),
            format: config.archive_format,
            level: config.compression_level,
            timeout: config.process_timeout,
        }
    }
}

enum Waited {
    Exited(io::Result<std::process::ExitStatus>, Vec<u8>, Vec<u8>),
    Cancelled,
    TimedOut(Duration),
}

#[async_trait]
impl ArchiveRunner for SevenZipRunner {
    async fn run(&self, spec: &TaskSpec, cancel: CancellationToken) -> Result<(), FailureKind> {
        let archiver = locate_archiver(self.archiver_path.as_deref())
            .map_err(|_| FailureKind::ArchiverNotFound)?;
        let args = match spec.kind {
            TaskKind::Compress => {
                compress_args(&spec.source, &spec.target, self.format, self.level)
            }
            TaskKind::Extract => extract_args(&spec.source, &spec.target),
        };
        engine_debug!("Running {} {:?}", archiver.display(), args);

        let mut child = Command::new(&archiver)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                FailureKind::Io(format!("failed to start {}: {err}", archiver.display()))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(after) => {
                    tokio::time::sleep(after).await;
                    after
                }
                None => std::future::pending().await,
            }
        };

        let waited = tokio::select! {
            ((out, err), status) = join(join(read_all(stdout), read_all(stderr)), child.wait()) => {
                Waited::Exited(status, out, err)
            }
            _ = cancel.cancelled() => Waited::Cancelled,
            after = deadline => Waited::TimedOut(after),
        };

        match waited {
            Waited::Exited(status, out, err) => {
                let status = status.map_err(|err| FailureKind::Io(err.to_string()))?;
                if status.success() {
                    Ok(())
                } else {
                    Err(FailureKind::Subprocess {
                        code: status.code(),
                        message: failure_message(&err, &out),
                    })
                }
            }
            Waited::Cancelled => {
                kill(&mut child).await;
                Err(FailureKind::Cancelled)
            }
            Waited::TimedOut(after) => {
                kill(&mut child).await;
                Err(FailureKind::Timeout {
                    after_ms: after.as_millis() as u64,
                })
            }
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(err) = pipe.read_to_end(&mut buf).await {
            engine_debug!("Archiver output read failed: {}", err);
        }
    }
    buf
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(err) = child.kill().await {
        engine_warn!("Failed to kill archiver process: {}", err);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The target is held open elsewhere; nothing was run.
    Locked,
    Finished(Result<Completion, FailureKind>),
}

/// Everything that happens to one admitted task: lock probe, existing
/// archive handling, the archiver run and source removal.
pub async fn run_task(
    spec: &TaskSpec,
    runner: &dyn ArchiveRunner,
    probe: &dyn LockProbe,
    cancel: CancellationToken,
) -> ExecOutcome {
    if !spec.source.exists() {
        return ExecOutcome::Finished(Err(FailureKind::SourceMissing));
    }

    let guarded = match spec.kind {
        TaskKind::Compress => &spec.target,
        TaskKind::Extract => &spec.source,
    };
    if probe.is_locked(guarded) {
        return ExecOutcome::Locked;
    }

    let completion = match spec.kind {
        TaskKind::Compress => {
            match prepare_compress_target(spec) {
                Ok(Some(completion)) => return ExecOutcome::Finished(Ok(completion)),
                Ok(None) => {}
                Err(err) => {
                    return ExecOutcome::Finished(Err(FailureKind::Io(err.to_string())))
                }
            }
            Completion::Archived
        }
        TaskKind::Extract => {
            if let Err(err) = fs::create_dir_all(&spec.target) {
                return ExecOutcome::Finished(Err(FailureKind::Io(err.to_string())));
            }
            Completion::Extracted
        }
    };

    if let Err(failure) = runner.run(spec, cancel).await {
        return ExecOutcome::Finished(Err(failure));
    }

    if spec.remove_source {
        remove_source(&spec.source);
    }
    ExecOutcome::Finished(Ok(completion))
}

/// Applies the existing-archive policy. `Some` means the task is already
/// done and the archiver must not run.
fn prepare_compress_target(spec: &TaskSpec) -> io::Result<Option<Completion>> {
    let target = &spec.target;
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let Ok(meta) = fs::metadata(target) else {
        return Ok(None);
    };
    if meta.len() == 0 {
        engine_info!("Removing empty leftover archive {}", target.display());
        fs::remove_file(target)?;
        return Ok(None);
    }

    match spec.existing_target {
        ExistingTarget::Merge => Ok(None),
        ExistingTarget::Skip => {
            engine_info!("Archive {} exists, skipping", target.display());
            Ok(Some(Completion::Skipped))
        }
        ExistingTarget::Overwrite => {
            fs::remove_file(target)?;
            Ok(None)
        }
        ExistingTarget::Update => {
            if is_current(&spec.source, meta.modified()?) {
                engine_info!("Archive {} is up to date", target.display());
                Ok(Some(Completion::Skipped))
            } else {
                engine_info!("Archive {} is stale, rebuilding", target.display());
                fs::remove_file(target)?;
                Ok(None)
            }
        }
    }
}

fn is_current(source: &Path, archive_modified: SystemTime) -> bool {
    let Ok(source_modified) = fs::metadata(source).and_then(|m| m.modified()) else {
        return false;
    };
    match source_modified.duration_since(archive_modified) {
        Ok(newer_by) => newer_by <= UPDATE_TOLERANCE,
        Err(_) => true,
    }
}

fn remove_source(source: &Path) {
    let result = if source.is_dir() {
        fs::remove_dir_all(source)
    } else {
        fs::remove_file(source)
    };
    match result {
        Ok(()) => engine_debug!("Removed source {}", source.display()),
        Err(err) => engine_warn!("Could not remove source {}: {}", source.display(), err),
    }
}
