use std::fs;
use std::io::ErrorKind;
use std::time::Duration;

use tempfile::TempDir;
use zipq_core::SizeEstimate;
use zipq_engine::{estimate_size, ExclusiveOpenProbe, LockProbe};

const SCAN: Duration = Duration::from_secs(30);

#[test]
fn file_size_is_exact() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("a.bin");
    fs::write(&file, vec![0u8; 1234]).unwrap();

    assert_eq!(estimate_size(&file, SCAN).unwrap(), SizeEstimate::exact(1234));
}

#[test]
fn directory_size_sums_nested_files() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("x/y")).unwrap();
    fs::write(temp.path().join("a"), vec![1u8; 100]).unwrap();
    fs::write(temp.path().join("x/b"), vec![1u8; 200]).unwrap();
    fs::write(temp.path().join("x/y/c"), vec![1u8; 300]).unwrap();

    assert_eq!(
        estimate_size(temp.path(), SCAN).unwrap(),
        SizeEstimate::exact(600)
    );
}

#[test]
fn empty_directory_is_zero() {
    let temp = TempDir::new().unwrap();
    assert_eq!(estimate_size(temp.path(), SCAN).unwrap(), SizeEstimate::exact(0));
}

#[test]
fn exhausted_scan_budget_extrapolates() {
    let temp = TempDir::new().unwrap();
    for i in 0..50 {
        fs::write(temp.path().join(format!("f{i}")), vec![0u8; 10]).unwrap();
    }

    let estimate = estimate_size(temp.path(), Duration::ZERO).unwrap();
    if estimate.complete {
        assert_eq!(estimate.bytes, 500);
    } else {
        assert!(estimate.bytes <= 750);
        assert_eq!(estimate.bytes % 15, 0);
    }
}

#[test]
fn missing_path_is_an_error() {
    let temp = TempDir::new().unwrap();
    let err = estimate_size(&temp.path().join("nope"), SCAN).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn unlocked_and_missing_files_are_not_locked() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("a.7z");
    fs::write(&file, "x").unwrap();

    let probe = ExclusiveOpenProbe;
    assert!(!probe.is_locked(&file));
    assert!(!probe.is_locked(&temp.path().join("missing.7z")));
    assert!(!probe.is_locked(temp.path()));
}
