const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human-readable byte count with two decimals, e.g. `1.50MB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2}{}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::format_size;

    #[test]
    fn picks_largest_whole_unit() {
        assert_eq!(format_size(0), "0.00B");
        assert_eq!(format_size(1023), "1023.00B");
        assert_eq!(format_size(1536), "1.50KB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00GB");
    }

    #[test]
    fn stops_at_terabytes() {
        assert_eq!(format_size(1024u64.pow(5)), "1024.00TB");
    }
}
