use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Local;
use engine_logging::{engine_error, engine_info};
use zipq_core::{
    compress_target, extract_target, format_size, GroupSummary, StopPolicy, TaskOutcome,
};
use zipq_engine::{
    locate_archiver, test_archive, Scheduler, SchedulerConfig, SubmitError, TaskHandle,
    TaskOptions,
};

use crate::cli::{Cli, Commands};
use crate::config::{scheduler_config, FileConfig};
use crate::report::{ReportedTask, RunReport};

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let file = match &cli.global.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = scheduler_config(&file, &cli.global);

    match cli.command {
        Commands::Test { archive } => check_archive(&config, &archive).await,
        Commands::Compress {
            paths,
            output,
            group,
            remove_source,
            subdirs,
            existing,
            format,
            level,
        } => {
            let mut config = config;
            if let Some(format) = format {
                config.archive_format = format.into();
            }
            if let Some(level) = level {
                config.compression_level = level;
            }
            let options = TaskOptions {
                remove_source,
                existing_target: existing.into(),
                ..TaskOptions::default()
            }
            .in_group(group);
            let extension = config.archive_format.extension();
            let batch = Batch::start(config.clone(), "compress");
            let options = batch.collect_groups(options);

            let mut handles = Vec::new();
            let mut rejected = Vec::new();
            for path in &paths {
                let submitted = if subdirs {
                    batch
                        .scheduler
                        .compress_subdirectories(path, output.as_deref(), options.clone())
                } else {
                    let target = output.as_deref().map(|dir| {
                        retarget(dir, &compress_target(path, path.is_dir(), extension))
                    });
                    batch
                        .scheduler
                        .submit_compress(path, target, options.clone())
                        .map(|handle| vec![handle])
                };
                match submitted {
                    Ok(new) => handles.extend(new),
                    Err(err) => rejected.push(rejection(path, err)),
                }
            }
            batch.finish(handles, rejected, cli.global.report.as_deref()).await
        }
        Commands::Extract {
            archives,
            output,
            group,
            remove_source,
        } => {
            let options = TaskOptions {
                remove_source,
                ..TaskOptions::default()
            }
            .in_group(group);
            let batch = Batch::start(config, "extract");
            let options = batch.collect_groups(options);

            let mut handles = Vec::new();
            let mut rejected = Vec::new();
            for archive in &archives {
                let target = output
                    .as_deref()
                    .map(|dir| retarget(dir, &extract_target(archive)));
                match batch
                    .scheduler
                    .submit_extract(archive, target, options.clone())
                {
                    Ok(handle) => handles.push(handle),
                    Err(err) => rejected.push(rejection(archive, err)),
                }
            }
            batch.finish(handles, rejected, cli.global.report.as_deref()).await
        }
    }
}

async fn check_archive(config: &SchedulerConfig, archive: &Path) -> Result<ExitCode> {
    let archiver = locate_archiver(config.archiver_path.as_deref())?;
    match test_archive(&archiver, archive).await {
        Ok(()) => {
            println!("{}: OK", archive.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            println!("{}: FAILED ({err})", archive.display());
            Ok(ExitCode::FAILURE)
        }
    }
}

/// `default`'s file name placed in `dir`.
fn retarget(dir: &Path, default: &Path) -> PathBuf {
    match default.file_name() {
        Some(name) => dir.join(name),
        None => dir.to_path_buf(),
    }
}

/// A submission the scheduler refused before queueing.
struct Rejected {
    path: PathBuf,
    reason: String,
}

fn rejection(path: &Path, err: SubmitError) -> Rejected {
    engine_error!("Not queued {}: {}", path.display(), err);
    Rejected {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// One CLI invocation's worth of submissions.
struct Batch {
    scheduler: Scheduler,
    command: &'static str,
    started_at: chrono::DateTime<Local>,
    groups: Arc<Mutex<Vec<GroupSummary>>>,
}

impl Batch {
    fn start(config: SchedulerConfig, command: &'static str) -> Self {
        engine_info!(
            "Starting {}: multi-process {}, up to {} processes, size limit {}",
            command,
            config.limits.multi_process,
            config.limits.max_concurrent_processes,
            format_size(config.limits.max_processing_bytes)
        );
        Self {
            scheduler: Scheduler::new(config),
            command,
            started_at: Local::now(),
            groups: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn collect_groups(&self, options: TaskOptions) -> TaskOptions {
        let groups = Arc::clone(&self.groups);
        options.on_group_complete(move |summary| {
            if let Ok(mut groups) = groups.lock() {
                groups.push(summary.clone());
            }
        })
    }

    async fn finish(
        self,
        handles: Vec<TaskHandle>,
        rejected: Vec<Rejected>,
        report_path: Option<&Path>,
    ) -> Result<ExitCode> {
        let status = self.scheduler.status();
        engine_info!(
            "{} tasks submitted, {} queued, {} running",
            handles.len(),
            status.queue_length,
            status.active_process_count
        );

        let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.wait().await);
        }
        self.scheduler.shutdown(StopPolicy::Finish).await;

        let groups = self
            .groups
            .lock()
            .map(|groups| groups.clone())
            .unwrap_or_default();
        let mut report = RunReport::new(self.command, self.started_at, &outcomes, &groups);
        report.tasks.extend(rejected.iter().map(|refused| {
            ReportedTask::rejected(self.command, &refused.path, &refused.reason)
        }));

        for outcome in &outcomes {
            if let Err(failure) = &outcome.result {
                println!("FAILED {}: {}", outcome.source.display(), failure);
            }
        }
        let failed = report.failed();
        println!(
            "{} of {} tasks succeeded",
            report.tasks.len() - failed,
            report.tasks.len()
        );

        if let Some(path) = report_path {
            let written = report.save(path).context("saving run report")?;
            engine_info!("Report written to {}", written.display());
        }

        Ok(if failed == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }
}
