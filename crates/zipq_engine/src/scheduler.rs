use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use engine_logging::{engine_debug, engine_error, engine_info, engine_warn};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use zipq_core::{
    compress_target, extract_target, format_size, update, Effect, ExistingTarget, FailureKind,
    GroupSummary, Msg, SchedulerState, SchedulerStatus, SizeEstimate, StopPolicy, TaskId,
    TaskKind, TaskOutcome, TaskSpec, DEFAULT_GROUP,
};

use crate::config::SchedulerConfig;
use crate::executor::{run_task, ArchiveRunner, ExecOutcome, SevenZipRunner};
use crate::lock::{ExclusiveOpenProbe, LockProbe};
use crate::process_table::count_archiver_processes;
use crate::size::estimate_size;

pub type TaskCallback = Arc<dyn Fn(&TaskOutcome) + Send + Sync>;
pub type GroupCallback = Arc<dyn Fn(&GroupSummary) + Send + Sync>;

/// Per-submission options.
#[derive(Clone)]
pub struct TaskOptions {
    pub remove_source: bool,
    pub group: String,
    /// Directory scan budget; the scheduler default when `None`.
    pub scan_timeout: Option<Duration>,
    /// Known source size; skips the scan.
    pub source_size: Option<u64>,
    pub existing_target: ExistingTarget,
    pub callback: Option<TaskCallback>,
    /// Registers (or replaces) the callback of `group`.
    pub group_callback: Option<GroupCallback>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            remove_source: false,
            group: DEFAULT_GROUP.to_string(),
            scan_timeout: None,
            source_size: None,
            existing_target: ExistingTarget::default(),
            callback: None,
            group_callback: None,
        }
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("remove_source", &self.remove_source)
            .field("group", &self.group)
            .field("scan_timeout", &self.scan_timeout)
            .field("source_size", &self.source_size)
            .field("existing_target", &self.existing_target)
            .field("callback", &self.callback.is_some())
            .field("group_callback", &self.group_callback.is_some())
            .finish()
    }
}

impl TaskOptions {
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn on_complete(mut self, callback: impl Fn(&TaskOutcome) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn on_group_complete(
        mut self,
        callback: impl Fn(&GroupSummary) + Send + Sync + 'static,
    ) -> Self {
        self.group_callback = Some(Arc::new(callback));
        self
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("source does not exist: {0}")]
    SourceMissing(PathBuf),
    #[error("{path} is not a {expected}")]
    WrongSourceType { path: PathBuf, expected: &'static str },
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("scheduler has stopped")]
    SchedulerStopped,
}

/// Resolves to the task's outcome once it has run, failed or been refused.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    target: PathBuf,
    rx: oneshot::Receiver<TaskOutcome>,
    fallback: TaskOutcome,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub async fn wait(self) -> TaskOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => self.fallback,
        }
    }
}

struct Submission {
    spec: TaskSpec,
    callback: Option<TaskCallback>,
    reply: oneshot::Sender<TaskOutcome>,
}

enum Command {
    /// The group callback is kept only if a task of the batch was queued.
    Submit {
        batch: Vec<Submission>,
        group_callback: Option<(String, GroupCallback)>,
    },
    SetGroupCallback {
        group: String,
        callback: GroupCallback,
    },
    Cancel(TaskId),
    SetMaxProcessingBytes(u64),
    SetMultiProcess(bool),
    SetMaxConcurrentProcesses(usize),
    Shutdown(StopPolicy),
}

enum Internal {
    Finished {
        task_id: TaskId,
        elapsed: Duration,
        result: Result<zipq_core::Completion, FailureKind>,
    },
    Locked {
        task_id: TaskId,
    },
    ProcessCount(Option<usize>),
}

/// Handle to the scheduler thread. Dropping it cancels queued work and
/// kills running archivers.
pub struct Scheduler {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<SchedulerStatus>,
    stopped_rx: watch::Receiver<bool>,
    next_id: AtomicU64,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let runner = Arc::new(SevenZipRunner::new(&config));
        Self::with_runner(config, runner, Arc::new(ExclusiveOpenProbe))
    }

    pub fn with_runner(
        config: SchedulerConfig,
        runner: Arc<dyn ArchiveRunner>,
        probe: Arc<dyn LockProbe>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let state = SchedulerState::new(config.limits);
        let (status_tx, status_rx) = watch::channel(state.status());
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let tick_interval = config.tick_interval;

        thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    engine_error!("Failed to start scheduler runtime: {}", err);
                    let _ = stopped_tx.send(true);
                    return;
                }
            };
            let (internal_tx, internal_rx) = mpsc::unbounded_channel();
            let actor = Actor {
                state,
                runner,
                probe,
                internal_tx,
                waiters: HashMap::new(),
                group_callbacks: HashMap::new(),
                running: HashMap::new(),
                ticker: None,
                tick_interval,
                status_tx,
                stopped: false,
            };
            runtime.block_on(actor.run(cmd_rx, internal_rx));
            let _ = stopped_tx.send(true);
        });

        Self {
            cmd_tx,
            status_rx,
            stopped_rx,
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Queues compression of `source` into `target`, or into
    /// `<parent>/<name>.<ext>` when no target is given.
    pub fn submit_compress(
        &self,
        source: impl AsRef<Path>,
        target: Option<PathBuf>,
        options: TaskOptions,
    ) -> Result<TaskHandle, SubmitError> {
        let (submission, handle) = self.prepare_compress(source.as_ref(), target, &options)?;
        self.submit_batch(vec![submission], &options)?;
        Ok(handle)
    }

    /// Queues extraction of `archive` into `target`, or into
    /// `<parent>/<archive stem>` when no target is given.
    pub fn submit_extract(
        &self,
        archive: impl AsRef<Path>,
        target: Option<PathBuf>,
        options: TaskOptions,
    ) -> Result<TaskHandle, SubmitError> {
        let archive = archive.as_ref();
        let meta = self.source_metadata(archive, TaskKind::Extract, &options)?;
        if !meta.is_file() {
            return Err(SubmitError::WrongSourceType {
                path: archive.to_path_buf(),
                expected: "file",
            });
        }
        let target = target.unwrap_or_else(|| extract_target(archive));
        let (submission, handle) = self.prepare(TaskKind::Extract, archive, target, &options)?;
        self.submit_batch(vec![submission], &options)?;
        Ok(handle)
    }

    /// One compression task per non-hidden subdirectory of `source_dir`,
    /// written to `<out_dir>/<name>.<ext>` (`out_dir` defaults to
    /// `source_dir`). The tasks reach the queue together, so the group
    /// cannot complete before the last of them is queued.
    pub fn compress_subdirectories(
        &self,
        source_dir: impl AsRef<Path>,
        out_dir: Option<&Path>,
        options: TaskOptions,
    ) -> Result<Vec<TaskHandle>, SubmitError> {
        let source_dir = source_dir.as_ref();
        let entries = fs::read_dir(source_dir).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => SubmitError::SourceMissing(source_dir.to_path_buf()),
            _ => SubmitError::Unreadable {
                path: source_dir.to_path_buf(),
                source: err,
            },
        })?;

        let mut dirs: Vec<(String, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                (!name.starts_with('.')).then(|| (name, entry.path()))
            })
            .collect();
        dirs.sort();

        let out_dir = out_dir.unwrap_or(source_dir);
        let extension = self.config.archive_format.extension();
        engine_info!(
            "Compressing {} subdirectories of {} into {}",
            dirs.len(),
            source_dir.display(),
            out_dir.display()
        );

        let mut batch = Vec::with_capacity(dirs.len());
        let mut handles = Vec::with_capacity(dirs.len());
        for (name, path) in dirs {
            let target = out_dir.join(format!("{name}.{extension}"));
            let (submission, handle) = self.prepare_compress(&path, Some(target), &options)?;
            batch.push(submission);
            handles.push(handle);
        }
        self.submit_batch(batch, &options)?;
        Ok(handles)
    }

    pub fn set_group_callback(
        &self,
        group: impl Into<String>,
        callback: impl Fn(&GroupSummary) + Send + Sync + 'static,
    ) -> Result<(), SubmitError> {
        self.send(Command::SetGroupCallback {
            group: group.into(),
            callback: Arc::new(callback),
        })
    }

    pub fn cancel(&self, task_id: TaskId) -> Result<(), SubmitError> {
        self.send(Command::Cancel(task_id))
    }

    pub fn set_max_processing_size(&self, bytes: u64) -> Result<(), SubmitError> {
        self.send(Command::SetMaxProcessingBytes(bytes))
    }

    pub fn set_multi_process(&self, enabled: bool) -> Result<(), SubmitError> {
        self.send(Command::SetMultiProcess(enabled))
    }

    pub fn set_max_concurrent_processes(&self, max: usize) -> Result<(), SubmitError> {
        self.send(Command::SetMaxConcurrentProcesses(max))
    }

    /// Latest snapshot published by the scheduler thread.
    pub fn status(&self) -> SchedulerStatus {
        self.status_rx.borrow().clone()
    }

    /// Requests a stop and waits until the scheduler thread has finished.
    pub async fn shutdown(&self, policy: StopPolicy) {
        if self.send(Command::Shutdown(policy)).is_err() {
            engine_debug!("Shutdown requested on a stopped scheduler");
        }
        self.wait_stopped().await;
    }

    pub async fn wait_stopped(&self) {
        let mut stopped = self.stopped_rx.clone();
        // An error means the thread is gone, which is stopped too.
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }

    fn prepare_compress(
        &self,
        source: &Path,
        target: Option<PathBuf>,
        options: &TaskOptions,
    ) -> Result<(Submission, TaskHandle), SubmitError> {
        let meta = self.source_metadata(source, TaskKind::Compress, options)?;
        let target = target.unwrap_or_else(|| {
            compress_target(source, meta.is_dir(), self.config.archive_format.extension())
        });
        self.prepare(TaskKind::Compress, source, target, options)
    }

    fn source_metadata(
        &self,
        source: &Path,
        kind: TaskKind,
        options: &TaskOptions,
    ) -> Result<fs::Metadata, SubmitError> {
        match fs::metadata(source) {
            Ok(meta) => Ok(meta),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                engine_warn!("Source path does not exist: {}", source.display());
                if let Some(callback) = &options.callback {
                    let spec = TaskSpec {
                        id: 0,
                        kind,
                        source: source.to_path_buf(),
                        target: PathBuf::new(),
                        group: options.group.clone(),
                        size: SizeEstimate::default(),
                        remove_source: options.remove_source,
                        existing_target: options.existing_target,
                    };
                    let outcome =
                        TaskOutcome::new(&spec, Duration::ZERO, Err(FailureKind::SourceMissing));
                    invoke_task_callback(callback, &outcome);
                }
                Err(SubmitError::SourceMissing(source.to_path_buf()))
            }
            Err(err) => Err(SubmitError::Unreadable {
                path: source.to_path_buf(),
                source: err,
            }),
        }
    }

    /// Fixes the task's size and id. Nothing is sent yet.
    fn prepare(
        &self,
        kind: TaskKind,
        source: &Path,
        target: PathBuf,
        options: &TaskOptions,
    ) -> Result<(Submission, TaskHandle), SubmitError> {
        let size = match options.source_size {
            Some(bytes) => SizeEstimate::exact(bytes),
            None => {
                let timeout = options
                    .scan_timeout
                    .unwrap_or(self.config.default_scan_timeout);
                estimate_size(source, timeout).map_err(|err| SubmitError::Unreadable {
                    path: source.to_path_buf(),
                    source: err,
                })?
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let spec = TaskSpec {
            id,
            kind,
            source: source.to_path_buf(),
            target: target.clone(),
            group: options.group.clone(),
            size,
            remove_source: options.remove_source,
            existing_target: options.existing_target,
        };
        let fallback = TaskOutcome::new(&spec, Duration::ZERO, Err(FailureKind::Stopped));
        let (reply, rx) = oneshot::channel();
        let submission = Submission {
            spec,
            callback: options.callback.clone(),
            reply,
        };
        let handle = TaskHandle {
            id,
            target,
            rx,
            fallback,
        };
        Ok((submission, handle))
    }

    fn submit_batch(
        &self,
        batch: Vec<Submission>,
        options: &TaskOptions,
    ) -> Result<(), SubmitError> {
        self.send(Command::Submit {
            batch,
            group_callback: options
                .group_callback
                .clone()
                .map(|callback| (options.group.clone(), callback)),
        })
    }

    fn send(&self, command: Command) -> Result<(), SubmitError> {
        self.cmd_tx
            .send(command)
            .map_err(|_| SubmitError::SchedulerStopped)
    }
}

struct Waiter {
    callback: Option<TaskCallback>,
    reply: oneshot::Sender<TaskOutcome>,
}

/// Owns the scheduler state on the scheduler thread and carries out effects.
struct Actor {
    state: SchedulerState,
    runner: Arc<dyn ArchiveRunner>,
    probe: Arc<dyn LockProbe>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    waiters: HashMap<TaskId, Waiter>,
    group_callbacks: HashMap<String, GroupCallback>,
    running: HashMap<TaskId, CancellationToken>,
    ticker: Option<Interval>,
    tick_interval: Duration,
    status_tx: watch::Sender<SchedulerStatus>,
    stopped: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut commands_open = true;
        while !self.stopped {
            tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        commands_open = false;
                        self.apply(Msg::Stop { policy: StopPolicy::Immediate });
                    }
                },
                Some(event) = internal.recv() => self.handle_internal(event),
                _ = next_tick(&mut self.ticker) => {
                    engine_logging::set_dispatch_tick(self.state.tick() + 1);
                    self.apply(Msg::Tick);
                }
            }
            self.status_tx.send_replace(self.state.status());
        }
        engine_info!("Scheduler stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                batch,
                group_callback,
            } => {
                let mut accepted = false;
                for Submission {
                    spec,
                    callback,
                    reply,
                } in batch
                {
                    let task_id = spec.id;
                    self.waiters.insert(task_id, Waiter { callback, reply });
                    self.apply(Msg::Submit(spec));
                    accepted |= self.state.task_state(task_id).is_some();
                }
                match group_callback {
                    Some((group, callback)) if accepted => {
                        self.group_callbacks.insert(group.clone(), callback);
                        self.apply(Msg::SetGroupCallback { group });
                    }
                    Some((group, _)) => {
                        engine_debug!("Nothing queued for group {}; callback dropped", group)
                    }
                    None => {}
                }
            }
            Command::SetGroupCallback { group, callback } => {
                self.group_callbacks.insert(group.clone(), callback);
                self.apply(Msg::SetGroupCallback { group });
            }
            Command::Cancel(task_id) => self.apply(Msg::Cancel { task_id }),
            Command::SetMaxProcessingBytes(bytes) => self.apply(Msg::SetMaxProcessingBytes(bytes)),
            Command::SetMultiProcess(enabled) => self.apply(Msg::SetMultiProcess(enabled)),
            Command::SetMaxConcurrentProcesses(max) => {
                self.apply(Msg::SetMaxConcurrentProcesses(max))
            }
            Command::Shutdown(policy) => self.apply(Msg::Stop { policy }),
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Finished {
                task_id,
                elapsed,
                result,
            } => {
                self.running.remove(&task_id);
                self.apply(Msg::TaskFinished {
                    task_id,
                    elapsed,
                    result,
                });
            }
            Internal::Locked { task_id } => {
                self.running.remove(&task_id);
                self.apply(Msg::TargetLocked { task_id });
            }
            Internal::ProcessCount(running) => self.apply(Msg::ProcessCountObserved { running }),
        }
    }

    fn apply(&mut self, msg: Msg) {
        let state = std::mem::take(&mut self.state);
        let (state, effects) = update(state, msg);
        self.state = state;
        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Launch(spec) => self.launch(spec),
            Effect::Resolve(outcome) => self.resolve(outcome),
            Effect::GroupCompleted(summary) => {
                engine_info!(
                    "Group {} finished: {} completed, {} failed, {} in {:.2?}",
                    summary.name,
                    summary.completed,
                    summary.failed,
                    format_size(summary.bytes),
                    summary.total_elapsed
                );
                match self.group_callbacks.remove(&summary.name) {
                    Some(callback) => {
                        if catch_unwind(AssertUnwindSafe(|| callback(&summary))).is_err() {
                            engine_error!("Group callback for {} panicked", summary.name);
                        }
                    }
                    None => engine_debug!("No callback stored for group {}", summary.name),
                }
            }
            Effect::Kill { task_id } => match self.running.get(&task_id) {
                Some(token) => token.cancel(),
                None => engine_debug!("Kill for task {} without a running process", task_id),
            },
            Effect::StartTicker => {
                let start = tokio::time::Instant::now() + self.tick_interval;
                let mut ticker = interval_at(start, self.tick_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
            }
            Effect::StopTicker => self.ticker = None,
            Effect::CountProcesses => {
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let running = tokio::task::spawn_blocking(count_archiver_processes)
                        .await
                        .unwrap_or(None);
                    let _ = tx.send(Internal::ProcessCount(running));
                });
            }
            Effect::Stopped => self.stopped = true,
        }
    }

    fn launch(&mut self, spec: TaskSpec) {
        let task_id = spec.id;
        let token = CancellationToken::new();
        self.running.insert(task_id, token.clone());

        let runner = self.runner.clone();
        let probe = self.probe.clone();
        let work = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = run_task(&spec, runner.as_ref(), probe.as_ref(), token).await;
            (outcome, started.elapsed())
        });

        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let event = match work.await {
                Ok((ExecOutcome::Locked, _)) => Internal::Locked { task_id },
                Ok((ExecOutcome::Finished(result), elapsed)) => Internal::Finished {
                    task_id,
                    elapsed,
                    result,
                },
                Err(err) => {
                    engine_error!("Task {} panicked: {}", task_id, err);
                    Internal::Finished {
                        task_id,
                        elapsed: Duration::ZERO,
                        result: Err(FailureKind::Io(format!("task panicked: {err}"))),
                    }
                }
            };
            let _ = tx.send(event);
        });
    }

    fn resolve(&mut self, outcome: TaskOutcome) {
        match &outcome.result {
            Ok(completion) => engine_info!(
                "Task {} {} {:?} in {:.2?} [{}] {}",
                outcome.task_id,
                outcome.kind,
                completion,
                outcome.elapsed,
                outcome.group,
                outcome.target.display()
            ),
            Err(failure) => engine_warn!(
                "Task {} {} failed after {:.2?} [{}] {}: {}",
                outcome.task_id,
                outcome.kind,
                outcome.elapsed,
                outcome.group,
                outcome.source.display(),
                failure
            ),
        }
        if let Some(entry) = self.state.groups().get(&outcome.group) {
            engine_debug!(
                "Group {} progress: {} completed, {} failed",
                outcome.group,
                entry.completed,
                entry.failed
            );
        }

        let Some(waiter) = self.waiters.remove(&outcome.task_id) else {
            engine_warn!("No waiter for task {}", outcome.task_id);
            return;
        };
        if let Some(callback) = &waiter.callback {
            invoke_task_callback(callback, &outcome);
        }
        let _ = waiter.reply.send(outcome);
    }
}

fn invoke_task_callback(callback: &TaskCallback, outcome: &TaskOutcome) {
    if catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
        engine_error!("Callback for task {} panicked", outcome.task_id);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
