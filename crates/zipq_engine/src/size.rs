use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use engine_logging::{engine_debug, engine_warn};
use zipq_core::{format_size, SizeEstimate};

/// Margin applied to a partial directory scan.
const ESTIMATE_MARGIN: f64 = 1.5;

/// Measures `path` once. Files are exact. Directories are walked until
/// `timeout` runs out; a cut-short walk extrapolates from what it saw.
///
/// Fails only when `path` itself cannot be read.
pub fn estimate_size(path: &Path, timeout: Duration) -> io::Result<SizeEstimate> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_dir() {
        return Ok(SizeEstimate::exact(metadata.len()));
    }

    let started = Instant::now();
    let mut total: u64 = 0;
    let mut files: u64 = 0;
    let mut pending: Vec<PathBuf> = vec![path.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                engine_debug!("Skipping unreadable directory {}: {}", dir.display(), err);
                continue;
            }
        };
        for entry in entries {
            if started.elapsed() > timeout {
                let estimate = extrapolate(total, files);
                engine_warn!(
                    "Scan timeout reached. Estimated size: {} based on {} files",
                    format_size(estimate),
                    files
                );
                return Ok(SizeEstimate::estimated(estimate));
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    engine_debug!("Skipping entry in {}: {}", dir.display(), err);
                    continue;
                }
            };
            match entry.metadata() {
                Ok(meta) if meta.is_dir() => pending.push(entry.path()),
                Ok(meta) if meta.is_file() => {
                    total = total.saturating_add(meta.len());
                    files += 1;
                }
                Ok(_) => {}
                Err(err) => engine_debug!("Skipping {}: {}", entry.path().display(), err),
            }
        }
    }

    Ok(SizeEstimate::exact(total))
}

fn extrapolate(total: u64, files: u64) -> u64 {
    if files == 0 {
        return 0;
    }
    let average = total as f64 / files as f64;
    (average * files as f64 * ESTIMATE_MARGIN).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::extrapolate;

    #[test]
    fn extrapolation_adds_half_again() {
        assert_eq!(extrapolate(0, 0), 0);
        assert_eq!(extrapolate(100, 4), 150);
        assert_eq!(extrapolate(3, 2), 5);
    }
}
