//! Zipq engine: filesystem and subprocess IO around the core scheduler.
pub mod archiver;
mod config;
mod executor;
mod lock;
mod persist;
pub mod process_table;
mod scheduler;
mod size;

pub use archiver::{locate_archiver, test_archive, ArchiverError};
pub use config::{ArchiveFormat, SchedulerConfig};
pub use executor::{run_task, ArchiveRunner, ExecOutcome, SevenZipRunner};
pub use lock::{ExclusiveOpenProbe, LockProbe};
pub use persist::{ensure_report_dir, AtomicFileWriter, PersistError};
pub use scheduler::{
    GroupCallback, Scheduler, SubmitError, TaskCallback, TaskHandle, TaskOptions,
};
pub use size::estimate_size;
