use std::process::Command;

use engine_logging::engine_debug;

const ARCHIVER_NAMES: &[&str] = &["7z", "7zz", "7za", "7z.exe", "7za.exe", "7zg.exe"];

/// Counts archiver processes in the OS process table. `None` when the
/// listing could not be taken.
pub fn count_archiver_processes() -> Option<usize> {
    #[cfg(windows)]
    let output = Command::new("tasklist").args(["/FO", "CSV", "/NH"]).output();
    #[cfg(not(windows))]
    let output = Command::new("ps").args(["-A", "-o", "comm="]).output();

    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            engine_debug!("Process listing exited with {}", output.status);
            return None;
        }
        Err(err) => {
            engine_debug!("Process listing failed: {}", err);
            return None;
        }
    };
    Some(count_in_listing(&String::from_utf8_lossy(&output.stdout)))
}

/// Counts listing lines whose image name is an archiver. Accepts both
/// `ps` output (one command per line, possibly a path) and `tasklist` CSV.
pub fn count_in_listing(listing: &str) -> usize {
    listing
        .lines()
        .filter_map(|line| {
            let first = line.split(',').next()?.trim().trim_matches('"');
            let name = first.rsplit(|c: char| c == '/' || c == '\\').next()?;
            (!name.is_empty()).then_some(name)
        })
        .filter(|name| {
            ARCHIVER_NAMES
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(name))
        })
        .count()
}
