//! Optional RON config file, merged under the command-line flags.
//!
//! ```ron
//! (
//!     multi_process: Some(true),
//!     max_concurrent_processes: Some(4),
//!     max_processing_size: Some(2147483648),
//!     process_timeout_secs: Some(3600),
//!     archive_format: Some(Zip),
//! )
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use zipq_core::ProcessCountStrategy;
use zipq_engine::{ArchiveFormat, SchedulerConfig};

use crate::cli::GlobalArgs;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub multi_process: Option<bool>,
    pub max_concurrent_processes: Option<usize>,
    pub max_processing_size: Option<u64>,
    pub process_timeout_secs: Option<u64>,
    pub tick_interval_ms: Option<u64>,
    pub scan_timeout_ms: Option<u64>,
    pub lock_retry_attempts: Option<u32>,
    pub lock_retry_max_backoff_ticks: Option<u64>,
    /// Also count archiver processes started outside this run.
    pub count_foreign_processes: Option<bool>,
    pub archive_format: Option<FormatName>,
    pub compression_level: Option<u8>,
    pub archiver_path: Option<PathBuf>,
}

/// `SevenZ` or `Zip`; RON identifiers cannot start with a digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FormatName {
    SevenZ,
    Zip,
}

impl From<FormatName> for ArchiveFormat {
    fn from(value: FormatName) -> Self {
        match value {
            FormatName::SevenZ => ArchiveFormat::SevenZ,
            FormatName::Zip => ArchiveFormat::Zip,
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(ron::from_str(text)?)
    }
}

/// Defaults, then the file, then the flags.
pub fn scheduler_config(file: &FileConfig, args: &GlobalArgs) -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    let limits = &mut config.limits;

    if let Some(multi) = file.multi_process {
        limits.multi_process = multi;
    }
    if args.multi {
        limits.multi_process = true;
    }
    if let Some(max) = args.jobs.or(file.max_concurrent_processes) {
        limits.max_concurrent_processes = max.max(1);
    }
    if let Some(bytes) = args.max_size.or(file.max_processing_size) {
        limits.max_processing_bytes = bytes;
    }
    if let Some(attempts) = args.lock_retries.or(file.lock_retry_attempts) {
        limits.lock_retry.max_attempts = Some(attempts);
    }
    if let Some(ticks) = file.lock_retry_max_backoff_ticks {
        limits.lock_retry.max_backoff_ticks = ticks;
    }
    if file.count_foreign_processes == Some(true) {
        limits.process_count = ProcessCountStrategy::ProcessTable;
    }

    if let Some(secs) = args.timeout_secs.or(file.process_timeout_secs) {
        config.process_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(ms) = file.tick_interval_ms {
        config.tick_interval = Duration::from_millis(ms.max(1));
    }
    if let Some(ms) = file.scan_timeout_ms {
        config.default_scan_timeout = Duration::from_millis(ms);
    }
    if let Some(format) = file.archive_format {
        config.archive_format = format.into();
    }
    if let Some(level) = file.compression_level {
        config.compression_level = level.min(9);
    }
    config.archiver_path = args.archiver.clone().or_else(|| file.archiver_path.clone());
    config
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use pretty_assertions::assert_eq;
    use zipq_core::ProcessCountStrategy;
    use zipq_engine::ArchiveFormat;

    use super::{scheduler_config, FileConfig, FormatName};
    use crate::cli::Cli;

    fn args(extra: &[&str]) -> Cli {
        let mut argv = vec!["zipq"];
        argv.extend_from_slice(extra);
        argv.extend_from_slice(&["test", "a.7z"]);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn parses_partial_file() {
        let file = FileConfig::parse(
            r#"(
                multi_process: Some(true),
                max_concurrent_processes: Some(4),
                archive_format: Some(Zip),
                count_foreign_processes: Some(true),
            )"#,
        )
        .unwrap();
        assert_eq!(file.multi_process, Some(true));
        assert_eq!(file.archive_format, Some(FormatName::Zip));
        assert_eq!(file.process_timeout_secs, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FileConfig::parse("(max_jobs: Some(3))").is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let file = FileConfig {
            max_concurrent_processes: Some(4),
            max_processing_size: Some(100),
            process_timeout_secs: Some(60),
            count_foreign_processes: Some(true),
            compression_level: Some(5),
            ..FileConfig::default()
        };
        let cli = args(&["--jobs", "2", "--timeout-secs", "5"]);
        let config = scheduler_config(&file, &cli.global);

        assert_eq!(config.limits.max_concurrent_processes, 2);
        assert_eq!(config.limits.max_processing_bytes, 100);
        assert!(!config.limits.multi_process);
        assert_eq!(config.limits.process_count, ProcessCountStrategy::ProcessTable);
        assert_eq!(config.process_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.compression_level, 5);
    }

    #[test]
    fn empty_file_keeps_defaults() {
        let config = scheduler_config(&FileConfig::default(), &args(&[]).global);
        assert_eq!(config.limits, zipq_core::Limits::default());
        assert_eq!(config.process_timeout, None);
        assert_eq!(config.archive_format, ArchiveFormat::SevenZ);
    }
}
