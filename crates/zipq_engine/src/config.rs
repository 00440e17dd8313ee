use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zipq_core::Limits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    #[serde(rename = "7z")]
    SevenZ,
    Zip,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::SevenZ => "7z",
            ArchiveFormat::Zip => "zip",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub limits: Limits,

    /// Safety-net dispatch interval; also the unit of lock-retry backoff.
    pub tick_interval: Duration,

    /// Kill the archiver after this long. `None` waits indefinitely.
    pub process_timeout: Option<Duration>,

    /// Directory scan budget used when a submission does not set one.
    pub default_scan_timeout: Duration,

    pub archive_format: ArchiveFormat,

    /// 7z `-mx` level, 0..=9.
    pub compression_level: u8,

    /// Skip discovery and use this executable.
    pub archiver_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            tick_interval: Duration::from_secs(1),
            process_timeout: None,
            default_scan_timeout: Duration::from_millis(5000),
            archive_format: ArchiveFormat::default(),
            compression_level: 9,
            archiver_path: None,
        }
    }
}
