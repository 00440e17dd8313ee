//! Admission control: may a task enter the queue, and may it start now?

use engine_logging::engine_warn;

use crate::{format_size, FailureKind, Limits, SizeEstimate, TaskKind};

/// Submission-time gate. Compression sources larger than the processing
/// budget are refused outright, whatever the current load. Extraction
/// archives are not capped here; an oversized one simply runs alone.
pub fn check_submission(
    limits: &Limits,
    kind: TaskKind,
    size: SizeEstimate,
) -> Result<(), FailureKind> {
    if kind != TaskKind::Compress || size.bytes <= limits.max_processing_bytes {
        return Ok(());
    }
    if !size.complete {
        engine_warn!(
            "Size limit check based on estimated size: {}",
            format_size(size.bytes)
        );
    }
    Err(FailureKind::SizeLimitExceeded {
        size: size.bytes,
        limit: limits.max_processing_bytes,
        estimated: !size.complete,
    })
}

/// Dispatch-time gate for the task at the head of the queue.
///
/// With no process running the answer is always yes in multi-process mode,
/// so a task bigger than the whole budget can still make progress alone.
pub fn can_start(limits: &Limits, active_processes: usize, current_bytes: u64, size: u64) -> bool {
    if !limits.multi_process {
        return active_processes == 0;
    }

    if size > limits.max_processing_bytes {
        return active_processes == 0;
    }

    active_processes < limits.max_concurrent_processes
        && (current_bytes.saturating_add(size) <= limits.max_processing_bytes
            || active_processes == 0)
}
