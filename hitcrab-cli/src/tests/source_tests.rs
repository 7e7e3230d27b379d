use super::*;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("hitcrab-{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_input(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn drain(source: &mut FileSource) -> Vec<(PartitionId, Offset, String)> {
    let mut out = Vec::new();
    while let Some(record) = source.poll(Duration::ZERO).unwrap() {
        out.push((
            record.partition_id,
            record.offset,
            String::from_utf8(record.payload).unwrap(),
        ));
    }
    out
}

#[test]
fn test_file_source_one_partition_per_file() {
    let dir = unique_temp_dir("file-source");
    let a = write_input(&dir, "a.jsonl", &["a0", "a1"]);
    let b = write_input(&dir, "b.jsonl", &["b0"]);

    let mut source = FileSource::open(&[a, b]).unwrap();
    assert_eq!(source.num_partitions(), 2);
    assert!(!source.is_exhausted());
    assert_eq!(
        drain(&mut source),
        vec![
            (0, 0, "a0".to_string()),
            (1, 0, "b0".to_string()),
            (0, 1, "a1".to_string()),
        ]
    );
    assert!(source.is_exhausted());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_file_source_seek_resumes_at_line() {
    let dir = unique_temp_dir("file-seek");
    let a = write_input(&dir, "a.jsonl", &["l0", "l1", "l2"]);

    let mut source = FileSource::open(&[a]).unwrap();
    source.seek(0, 2).unwrap();
    assert_eq!(drain(&mut source), vec![(0, 2, "l2".to_string())]);

    // Seeking to the end is allowed and leaves nothing to read.
    source.seek(0, 3).unwrap();
    assert!(source.is_exhausted());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_file_source_seek_past_end_is_fatal() {
    let dir = unique_temp_dir("file-seek-err");
    let a = write_input(&dir, "a.jsonl", &["only"]);

    let mut source = FileSource::open(&[a]).unwrap();
    let err = source.seek(0, 4).unwrap_err();
    assert!(hitcrab_core::error::is_fatal(&err));
    assert!(err.to_string().contains("has only 1 lines"), "unexpected: {err}");

    let err = source.seek(3, 0).unwrap_err();
    assert!(
        err.to_string().contains("no input file"),
        "unexpected: {err}"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_file_source_missing_file() {
    let dir = unique_temp_dir("file-missing");
    let err = FileSource::open(&[dir.join("nope.jsonl")]).err().unwrap();
    assert!(err.to_string().contains("open input"), "unexpected: {err}");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_file_source_commit_records_horizon() {
    let dir = unique_temp_dir("file-commit");
    let a = write_input(&dir, "a.jsonl", &["x"]);

    let mut source = FileSource::open(&[a]).unwrap();
    source.commit(0, 1).unwrap();
    assert_eq!(source.committed().get(&0), Some(&1));

    let _ = std::fs::remove_dir_all(&dir);
}
