use super::*;
use std::fs;
use tempfile::TempDir;

fn write_tree(dir: &Path, files: &[(&str, &[u8])]) {
    for (rel, content) in files {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
    }
}

#[test]
fn test_compute_is_deterministic_and_ordered() {
    let temp = TempDir::new().unwrap();
    write_tree(
        temp.path(),
        &[("zeta", b"zz"), ("alpha", b"aa"), ("sub/inner", b"ii")],
    );

    let one = Signature::compute(temp.path(), 4).unwrap();
    let two = Signature::compute(temp.path(), 4).unwrap();
    assert_eq!(one, two);

    let paths: Vec<&str> = one.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["alpha", "sub/inner", "zeta"]);
    assert_eq!(one.total_size(), 6);
}

#[test]
fn test_block_boundaries() {
    let temp = TempDir::new().unwrap();
    // 10 bytes with block size 4: blocks of 4, 4, 2.
    write_tree(temp.path(), &[("data", b"0123456789")]);

    let sig = Signature::compute(temp.path(), 4).unwrap();
    assert_eq!(sig.files[0].blocks.len(), 3);
    assert_eq!(sig.files[0].blocks[0], hash_block(b"0123"));
    assert_eq!(sig.files[0].blocks[1], hash_block(b"4567"));
    assert_eq!(sig.files[0].blocks[2], hash_block(b"89"));
}

#[test]
fn test_empty_file_has_no_blocks() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("empty", b"")]);

    let sig = Signature::compute(temp.path(), 4).unwrap();
    assert_eq!(sig.files[0].size, 0);
    assert!(sig.files[0].blocks.is_empty());
}

#[test]
fn test_parse_round_trips_compute() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("app", b"binary bytes"), ("lib/helper", b"more")]);

    let sig = Signature::compute(temp.path(), 8).unwrap();
    let bytes = sig.to_bytes().unwrap();
    let back = Signature::parse(bytes.as_slice()).unwrap();
    assert_eq!(back, sig);
}

#[test]
fn test_parse_rejects_traversal_paths() {
    let raw = serde_json::json!({
        "block_size": 4,
        "files": [{ "path": "../evil", "size": 0, "mode": 420, "blocks": [] }]
    });
    let err = Signature::parse(raw.to_string().as_bytes()).unwrap_err();
    assert!(err.to_string().contains("../evil"));
}

#[test]
fn test_parse_rejects_block_count_mismatch() {
    let raw = serde_json::json!({
        "block_size": 4,
        "files": [{ "path": "a", "size": 10, "mode": 420, "blocks": ["00"] }]
    });
    assert!(Signature::parse(raw.to_string().as_bytes()).is_err());
}

#[test]
fn test_expected_block_count() {
    assert_eq!(expected_block_count(0, 4), 0);
    assert_eq!(expected_block_count(1, 4), 1);
    assert_eq!(expected_block_count(4, 4), 1);
    assert_eq!(expected_block_count(5, 4), 2);
}
