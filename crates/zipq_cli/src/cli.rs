use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use zipq_core::ExistingTarget;
use zipq_engine::ArchiveFormat;

use crate::logging::LogDestination;

#[derive(Debug, Parser)]
#[command(
    name = "zipq",
    version,
    about = "Queue 7-Zip compress and extract jobs",
    long_about = "Runs 7-Zip jobs under a process cap and an in-flight size budget."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// RON config file; flags override its values.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Run several archiver processes at once.
    #[arg(long, global = true)]
    pub multi: bool,

    /// In-flight size budget (supports suffixes K/M/G, e.g. 512M, 2G).
    #[arg(long, global = true, value_parser = parse_size)]
    pub max_size: Option<u64>,

    /// Maximum concurrent archiver processes in multi-process mode.
    #[arg(long, global = true)]
    pub jobs: Option<usize>,

    /// Kill an archiver process after this many seconds.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Fail a task after its target was found locked this many times.
    #[arg(long, global = true)]
    pub lock_retries: Option<u32>,

    /// Path to the 7z executable; searched on PATH when omitted.
    #[arg(long, global = true)]
    pub archiver: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogDestination::Terminal)]
    pub log: LogDestination,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write a run report here (RON, or JSON for a `.json` path).
    #[arg(long, global = true)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compress files or directories into archives.
    Compress {
        /// Sources to compress.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Directory for the archives (defaults to each source's parent).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Completion group the tasks belong to.
        #[arg(long, default_value = zipq_core::DEFAULT_GROUP)]
        group: String,

        /// Delete each source after its archive was written.
        #[arg(long)]
        remove_source: bool,

        /// Compress every subdirectory of each path separately.
        #[arg(long)]
        subdirs: bool,

        /// What to do with an archive that already exists.
        #[arg(long, value_enum, default_value_t = ExistingArg::Merge)]
        existing: ExistingArg,

        #[arg(long, value_enum)]
        format: Option<FormatArg>,

        /// 7z compression level, 0..=9.
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
        level: Option<u8>,
    },
    /// Extract archives.
    Extract {
        /// Archives to extract.
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Parent directory for the extracted folders (defaults to each archive's).
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, default_value = zipq_core::DEFAULT_GROUP)]
        group: String,

        /// Delete each archive after a successful extraction.
        #[arg(long)]
        remove_source: bool,
    },
    /// Check an archive's integrity.
    Test {
        archive: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExistingArg {
    Merge,
    Overwrite,
    Skip,
    Update,
}

impl From<ExistingArg> for ExistingTarget {
    fn from(value: ExistingArg) -> Self {
        match value {
            ExistingArg::Merge => ExistingTarget::Merge,
            ExistingArg::Overwrite => ExistingTarget::Overwrite,
            ExistingArg::Skip => ExistingTarget::Skip,
            ExistingArg::Update => ExistingTarget::Update,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    #[value(name = "7z")]
    SevenZ,
    Zip,
}

impl From<FormatArg> for ArchiveFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::SevenZ => ArchiveFormat::SevenZ,
            FormatArg::Zip => ArchiveFormat::Zip,
        }
    }
}

pub fn parse_size(value: &str) -> Result<u64, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("size cannot be empty".to_string());
    }

    let split_at = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (num_part, suffix_part) = trimmed.split_at(split_at);
    if num_part.is_empty() {
        return Err(format!("invalid size: {value}"));
    }

    let base: u64 = num_part
        .parse()
        .map_err(|_| format!("invalid size number: {value}"))?;

    let multiplier: u64 = match suffix_part.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        other => {
            return Err(format!("invalid size suffix '{other}' in '{value}'"));
        }
    };

    base.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: {value}"))
}
