//! 7-Zip discovery and command lines.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use engine_logging::{engine_debug, engine_info};
use thiserror::Error;
use tokio::process::Command;

use crate::config::ArchiveFormat;

#[cfg(windows)]
const CANDIDATES: &[&str] = &["7z.exe", "7za.exe"];
#[cfg(not(windows))]
const CANDIDATES: &[&str] = &["7z", "7zz", "7za"];

#[cfg(windows)]
const INSTALL_DIRS: &[&str] = &[r"C:\Program Files\7-Zip", r"C:\Program Files (x86)\7-Zip"];
#[cfg(not(windows))]
const INSTALL_DIRS: &[&str] = &[
    "/usr/bin",
    "/usr/local/bin",
    "/opt/homebrew/bin",
    "/opt/local/bin",
];

/// Bytes of stderr kept in failure messages.
const STDERR_TAIL: usize = 512;

#[derive(Debug, Error)]
pub enum ArchiverError {
    #[error("7-Zip executable not found (tried {0})")]
    NotFound(String),
    #[error("failed to start {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archiver exited with {code:?}: {message}")]
    Failed { code: Option<i32>, message: String },
}

static DISCOVERED: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Finds the archiver: `explicit` when given, else a `PATH` search and the
/// usual install directories. The search runs once per process.
pub fn locate_archiver(explicit: Option<&Path>) -> Result<PathBuf, ArchiverError> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(ArchiverError::NotFound(path.display().to_string()))
        };
    }

    DISCOVERED
        .get_or_init(|| {
            let path_var = std::env::var_os("PATH").unwrap_or_default();
            let found = discover(&path_var);
            match &found {
                Some(path) => engine_info!("Using archiver {}", path.display()),
                None => engine_debug!("No archiver found on PATH or install directories"),
            }
            found
        })
        .clone()
        .ok_or_else(|| ArchiverError::NotFound(CANDIDATES.join(", ")))
}

fn discover(path_var: &OsStr) -> Option<PathBuf> {
    CANDIDATES.iter().find_map(|name| {
        resolve_in_path(name, path_var).or_else(|| {
            INSTALL_DIRS
                .iter()
                .map(|dir| Path::new(dir).join(name))
                .find(|candidate| is_executable(candidate))
        })
    })
}

/// First executable `name` in the directories of `path_var`.
pub fn resolve_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|meta| meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// `a -t<fmt> -mx=<level> -mmt=on -y <target> <source>`
pub fn compress_args(
    source: &Path,
    target: &Path,
    format: ArchiveFormat,
    level: u8,
) -> Vec<OsString> {
    vec![
        "a".into(),
        format!("-t{}", format.extension()).into(),
        format!("-mx={}", level.min(9)).into(),
        "-mmt=on".into(),
        "-y".into(),
        target.as_os_str().to_owned(),
        source.as_os_str().to_owned(),
    ]
}

/// `x -y -aoa -o<target> <archive>`
pub fn extract_args(archive: &Path, target: &Path) -> Vec<OsString> {
    let mut out_dir = OsString::from("-o");
    out_dir.push(target.as_os_str());
    vec![
        "x".into(),
        "-y".into(),
        "-aoa".into(),
        out_dir,
        archive.as_os_str().to_owned(),
    ]
}

pub fn test_args(archive: &Path) -> Vec<OsString> {
    vec!["t".into(), archive.as_os_str().to_owned()]
}

/// Runs `7z t` on `archive`.
pub async fn test_archive(archiver: &Path, archive: &Path) -> Result<(), ArchiverError> {
    let output = Command::new(archiver)
        .args(test_args(archive))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ArchiverError::Spawn {
            path: archiver.to_path_buf(),
            source,
        })?;

    if output.status.success() {
        engine_info!("Archive {} tested OK", archive.display());
        Ok(())
    } else {
        Err(ArchiverError::Failed {
            code: output.status.code(),
            message: failure_message(&output.stderr, &output.stdout),
        })
    }
}

/// Tail of stderr, or of stdout when stderr is empty; 7z writes some errors
/// to stdout.
pub(crate) fn failure_message(stderr: &[u8], stdout: &[u8]) -> String {
    let raw = if stderr.iter().all(u8::is_ascii_whitespace) {
        stdout
    } else {
        stderr
    };
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
