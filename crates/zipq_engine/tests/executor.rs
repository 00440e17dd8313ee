use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zipq_core::{Completion, ExistingTarget, FailureKind, SizeEstimate, TaskKind, TaskSpec};
use zipq_engine::{run_task, ArchiveRunner, ExecOutcome, LockProbe};

/// Records what the target looked like when the archiver would have run.
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<(PathBuf, bool)>>,
    fail_with: Option<FailureKind>,
}

impl RecordingRunner {
    fn calls(&self) -> Vec<(PathBuf, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveRunner for RecordingRunner {
    async fn run(&self, spec: &TaskSpec, _cancel: CancellationToken) -> Result<(), FailureKind> {
        self.calls
            .lock()
            .unwrap()
            .push((spec.target.clone(), spec.target.exists()));
        match &self.fail_with {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

/// Deletes the source while "archiving", so the later removal fails.
struct SourceDeletingRunner;

#[async_trait]
impl ArchiveRunner for SourceDeletingRunner {
    async fn run(&self, spec: &TaskSpec, _cancel: CancellationToken) -> Result<(), FailureKind> {
        fs::remove_file(&spec.source).map_err(|err| FailureKind::Io(err.to_string()))?;
        fs::write(&spec.target, "archive").map_err(|err| FailureKind::Io(err.to_string()))
    }
}

struct Probe(bool);

impl LockProbe for Probe {
    fn is_locked(&self, _path: &Path) -> bool {
        self.0
    }
}

fn compress_spec(source: &Path, target: &Path) -> TaskSpec {
    TaskSpec {
        id: 1,
        kind: TaskKind::Compress,
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        group: "default".to_string(),
        size: SizeEstimate::exact(1),
        remove_source: false,
        existing_target: ExistingTarget::Merge,
    }
}

async fn run(spec: &TaskSpec, runner: &RecordingRunner) -> ExecOutcome {
    run_task(spec, runner, &Probe(false), CancellationToken::new()).await
}

#[tokio::test]
async fn locked_target_does_not_run_the_archiver() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("a.txt");
    fs::write(&source, "data").unwrap();
    let runner = RecordingRunner::default();

    let spec = compress_spec(&source, &temp.path().join("a.7z"));
    let outcome = run_task(&spec, &runner, &Probe(true), CancellationToken::new()).await;

    assert_eq!(outcome, ExecOutcome::Locked);
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn missing_source_fails_before_lock_check() {
    let temp = TempDir::new().unwrap();
    let runner = RecordingRunner::default();
    let spec = compress_spec(&temp.path().join("gone"), &temp.path().join("gone.7z"));

    let outcome = run_task(&spec, &runner, &Probe(true), CancellationToken::new()).await;
    assert_eq!(outcome, ExecOutcome::Finished(Err(FailureKind::SourceMissing)));
}

#[tokio::test]
async fn creates_target_parent_and_removes_source_on_success() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("dir");
    fs::create_dir(&source).unwrap();
    fs::write(source.join("f.txt"), "x").unwrap();
    let target = temp.path().join("nested/out/dir.7z");
    let runner = RecordingRunner::default();

    let mut spec = compress_spec(&source, &target);
    spec.remove_source = true;
    let outcome = run(&spec, &runner).await;

    assert_eq!(outcome, ExecOutcome::Finished(Ok(Completion::Archived)));
    assert!(target.parent().unwrap().is_dir());
    assert!(!source.exists());
}

#[tokio::test]
async fn failed_run_keeps_source() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("a.txt");
    fs::write(&source, "data").unwrap();
    let failure = FailureKind::Subprocess {
        code: Some(2),
        message: "fatal".to_string(),
    };
    let runner = RecordingRunner {
        fail_with: Some(failure.clone()),
        ..RecordingRunner::default()
    };

    let mut spec = compress_spec(&source, &temp.path().join("a.7z"));
    spec.remove_source = true;
    let outcome = run(&spec, &runner).await;

    assert_eq!(outcome, ExecOutcome::Finished(Err(failure)));
    assert!(source.exists());
}

#[tokio::test]
async fn empty_leftover_archive_is_removed_first() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("a.txt");
    let target = temp.path().join("a.7z");
    fs::write(&source, "data").unwrap();
    File::create(&target).unwrap();
    let runner = RecordingRunner::default();

    let outcome = run(&compress_spec(&source, &target), &runner).await;

    assert_eq!(outcome, ExecOutcome::Finished(Ok(Completion::Archived)));
    assert_eq!(runner.calls(), vec![(target, false)]);
}

#[tokio::test]
async fn existing_archive_policies() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("a.txt");
    let target = temp.path().join("a.7z");
    fs::write(&source, "data").unwrap();

    let cases = [
        (ExistingTarget::Merge, Completion::Archived, Some(true)),
        (ExistingTarget::Overwrite, Completion::Archived, Some(false)),
        (ExistingTarget::Skip, Completion::Skipped, None),
        (ExistingTarget::Update, Completion::Skipped, None),
    ];
    for (policy, expected, target_seen) in cases {
        fs::write(&target, "old archive").unwrap();
        let runner = RecordingRunner::default();
        let mut spec = compress_spec(&source, &target);
        spec.existing_target = policy;

        let outcome = run(&spec, &runner).await;

        assert_eq!(outcome, ExecOutcome::Finished(Ok(expected)), "{policy:?}");
        let seen: Vec<bool> = runner.calls().into_iter().map(|(_, seen)| seen).collect();
        assert_eq!(seen, target_seen.into_iter().collect::<Vec<_>>(), "{policy:?}");
    }
}

#[tokio::test]
async fn stale_archive_is_rebuilt_on_update() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("a.txt");
    let target = temp.path().join("a.7z");
    fs::write(&source, "data").unwrap();
    fs::write(&target, "old archive").unwrap();
    let hour_ago = SystemTime::now() - Duration::from_secs(3600);
    File::options()
        .write(true)
        .open(&target)
        .unwrap()
        .set_modified(hour_ago)
        .unwrap();
    let runner = RecordingRunner::default();

    let mut spec = compress_spec(&source, &target);
    spec.existing_target = ExistingTarget::Update;
    let outcome = run(&spec, &runner).await;

    assert_eq!(outcome, ExecOutcome::Finished(Ok(Completion::Archived)));
    assert_eq!(runner.calls(), vec![(target, false)]);
}

#[tokio::test]
async fn extraction_creates_output_directory() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("bundle.7z");
    fs::write(&archive, "7z").unwrap();
    let target = temp.path().join("bundle");
    let runner = RecordingRunner::default();

    let spec = TaskSpec {
        kind: TaskKind::Extract,
        ..compress_spec(&archive, &target)
    };
    let outcome = run(&spec, &runner).await;

    assert_eq!(outcome, ExecOutcome::Finished(Ok(Completion::Extracted)));
    assert!(target.is_dir());
}

#[cfg(unix)]
mod seven_zip {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use zipq_core::{Completion, FailureKind};
    use zipq_engine::{
        run_task, test_archive, ArchiveRunner, ArchiverError, ExecOutcome, SchedulerConfig,
        SevenZipRunner,
    };

    use super::{compress_spec, Probe};

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn runner(archiver: PathBuf, timeout: Option<Duration>) -> SevenZipRunner {
        SevenZipRunner::new(&SchedulerConfig {
            archiver_path: Some(archiver),
            process_timeout: timeout,
            ..SchedulerConfig::default()
        })
    }

    // One test so no script is being written while another one is spawned.
    #[tokio::test]
    async fn subprocess_exit_codes_timeouts_and_cancellation() {
        let temp = TempDir::new().unwrap();
        let ok = script(temp.path(), "ok.sh", "exit 0");
        let broken = script(temp.path(), "broken.sh", "echo 'ERROR: broken archive' >&2\nexit 2");
        let slow = script(temp.path(), "slow.sh", "exec sleep 5");

        let source = temp.path().join("a.txt");
        fs::write(&source, "data").unwrap();
        let spec = compress_spec(&source, &temp.path().join("a.7z"));

        let ok_runner = runner(ok.clone(), None);
        let outcome = run_task(&spec, &ok_runner, &Probe(false), CancellationToken::new()).await;
        assert_eq!(outcome, ExecOutcome::Finished(Ok(Completion::Archived)));

        let result = runner(broken.clone(), None)
            .run(&spec, CancellationToken::new())
            .await;
        assert_eq!(
            result,
            Err(FailureKind::Subprocess {
                code: Some(2),
                message: "ERROR: broken archive".to_string(),
            })
        );

        let result = runner(slow.clone(), Some(Duration::from_millis(200)))
            .run(&spec, CancellationToken::new())
            .await;
        assert_eq!(result, Err(FailureKind::Timeout { after_ms: 200 }));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let result = runner(slow, None).run(&spec, cancel).await;
        assert_eq!(result, Err(FailureKind::Cancelled));

        let missing = runner(temp.path().join("no-such-7z"), None)
            .run(&spec, CancellationToken::new())
            .await;
        assert_eq!(missing, Err(FailureKind::ArchiverNotFound));

        assert!(test_archive(&ok, &source).await.is_ok());
        match test_archive(&broken, &source).await {
            Err(ArchiverError::Failed { code, message }) => {
                assert_eq!(code, Some(2));
                assert_eq!(message, "ERROR: broken archive");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

#[tokio::test]
async fn failed_source_removal_still_reports_success() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("report.csv");
    fs::write(&source, "a,b").unwrap();
    let target = temp.path().join("report.7z");
    let mut spec = compress_spec(&source, &target);
    spec.remove_source = true;

    let outcome = run_task(
        &spec,
        &SourceDeletingRunner,
        &Probe(false),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome, ExecOutcome::Finished(Ok(Completion::Archived)));
    assert!(target.exists());
    assert!(!source.exists());
}
