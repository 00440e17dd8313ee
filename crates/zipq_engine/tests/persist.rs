use std::fs;

use tempfile::TempDir;
use zipq_engine::{ensure_report_dir, AtomicFileWriter, PersistError};

#[test]
fn creates_missing_report_dir() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("reports/daily");
    ensure_report_dir(&dir).unwrap();
    assert!(dir.is_dir());
}

#[test]
fn rewrite_replaces_previous_report() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write("run.ron", "(tasks: [])").unwrap();
    let second = writer.write("run.ron", "(tasks: [1])").unwrap();

    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "(tasks: [1])");
    let leftovers = fs::read_dir(temp.path()).unwrap().count();
    assert_eq!(leftovers, 1, "no temp files left behind");
}

#[test]
fn write_path_splits_directory_and_name() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("out/report.ron");

    let written = AtomicFileWriter::write_path(&path, "()").unwrap();
    assert_eq!(written, path);
    assert_eq!(fs::read_to_string(&path).unwrap(), "()");
}

#[test]
fn report_dir_that_is_a_file_is_rejected() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    let result = writer.write("run.ron", "data");
    assert!(matches!(result, Err(PersistError::ReportDir(_))));
}
