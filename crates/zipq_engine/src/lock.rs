use std::fs::OpenOptions;
use std::io;
use std::path::Path;

/// Answers whether another process holds a file open in a way that would
/// make the archiver fail.
pub trait LockProbe: Send + Sync {
    fn is_locked(&self, path: &Path) -> bool;
}

/// Tries to open an existing file for reading and writing. A missing file
/// is never locked.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExclusiveOpenProbe;

impl LockProbe for ExclusiveOpenProbe {
    fn is_locked(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(_) => false,
            Err(err) => is_lock_error(&err),
        }
    }
}

#[cfg(windows)]
fn is_lock_error(err: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(err.raw_os_error(), Some(32) | Some(33))
        || err.kind() == io::ErrorKind::PermissionDenied
}

#[cfg(not(windows))]
fn is_lock_error(err: &io::Error) -> bool {
    const EBUSY: i32 = 16;
    const ETXTBSY: i32 = 26;
    matches!(err.raw_os_error(), Some(EBUSY) | Some(ETXTBSY))
}
