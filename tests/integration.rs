use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use pdar::pdar::archive::Archive;
use pdar::pdar::delta::BsdiffCodec;
use pdar::pdar::digest::{DigestAlgorithm, HashEngine};
use pdar::pdar::patcher::{DefaultErrorHandler, Patcher};
use pdar::pdar::planner::plan;

fn write(dir: &Path, name: &str, content: &[u8]) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn read_tree(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(dir).unwrap().to_path_buf();
            out.insert(rel, fs::read(entry.path()).unwrap());
        }
    }
    out
}

fn plan_and_archive(origin: &Path, dest: &Path) -> Archive {
    let codec = BsdiffCodec;
    let entries = plan(origin, dest, &[], DigestAlgorithm::Sha1, &codec).unwrap();
    Archive::new(DigestAlgorithm::Sha1, Utc::now(), entries)
}

/// A new file in the destination tree with no content match anywhere in the origin tree
/// produces a `New` entry.
#[test]
fn new_file_is_added_to_target() {
    let origin = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();

    write(origin.path(), "a.txt", b"unchanged");
    write(dest.path(), "a.txt", b"unchanged");
    write(dest.path(), "c.txt", b"brand new content");
    write(target.path(), "a.txt", b"unchanged");

    let archive = plan_and_archive(origin.path(), dest.path());
    assert!(archive
        .entries
        .iter()
        .any(|e| e.type_code() == "new" && e.target() == Path::new("c.txt")));

    let hash = HashEngine::new(DigestAlgorithm::Sha1);
    let handler = DefaultErrorHandler;
    let mut patcher = Patcher::new(target.path(), hash, &BsdiffCodec, &handler);
    patcher.apply_archive(&archive).unwrap();

    assert_eq!(read_tree(target.path()), read_tree(dest.path()));
}

/// A file present only in the origin tree, with no content match in the destination, is
/// removed.
#[test]
fn vanished_file_is_deleted_from_target() {
    let origin = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();

    write(origin.path(), "a.txt", b"stays");
    write(origin.path(), "d.txt", b"goes away entirely");
    write(dest.path(), "a.txt", b"stays");
    write(target.path(), "a.txt", b"stays");
    write(target.path(), "d.txt", b"goes away entirely");

    let archive = plan_and_archive(origin.path(), dest.path());
    assert!(archive
        .entries
        .iter()
        .any(|e| e.type_code() == "delete" && e.target() == Path::new("d.txt")));

    let hash = HashEngine::new(DigestAlgorithm::Sha1);
    let handler = DefaultErrorHandler;
    let mut patcher = Patcher::new(target.path(), hash, &BsdiffCodec, &handler);
    patcher.apply_archive(&archive).unwrap();

    assert_eq!(read_tree(target.path()), read_tree(dest.path()));
    assert!(!target.path().join("d.txt").exists());
}

/// Two files that fully exchange content plan as two `Diff` entries (their paths are common
/// to both trees, so they're never treated as a copy/move source).
#[test]
fn swapped_file_contents_apply_as_two_diffs() {
    let origin = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();

    write(origin.path(), "a.txt", b"alpha content here");
    write(origin.path(), "b.txt", b"beta content here");
    write(dest.path(), "a.txt", b"beta content here");
    write(dest.path(), "b.txt", b"alpha content here");
    write(target.path(), "a.txt", b"alpha content here");
    write(target.path(), "b.txt", b"beta content here");

    let archive = plan_and_archive(origin.path(), dest.path());
    assert_eq!(archive.entries.len(), 2);
    assert!(archive.entries.iter().all(|e| e.type_code() == "diff"));

    let hash = HashEngine::new(DigestAlgorithm::Sha1);
    let handler = DefaultErrorHandler;
    let mut patcher = Patcher::new(target.path(), hash, &BsdiffCodec, &handler);
    patcher.apply_archive(&archive).unwrap();

    assert_eq!(read_tree(target.path()), read_tree(dest.path()));
}

/// When one entry in an archive can't be committed, every entry already applied during the
/// same `apply_archive` call is rolled back to its pre-apply content.
#[test]
fn failure_partway_through_rolls_back_earlier_entries() {
    let origin = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();

    write(origin.path(), "a.txt", b"alpha content here");
    write(origin.path(), "b.txt", b"beta content here");
    write(dest.path(), "a.txt", b"beta content here");
    write(dest.path(), "b.txt", b"alpha content here");
    write(target.path(), "a.txt", b"alpha content here");

    // b.txt is a directory in the target tree, so the patcher's attempt to read its state as
    // a file fails partway through the archive, after a.txt's diff has already been applied.
    fs::create_dir_all(target.path().join("b.txt")).unwrap();

    let archive = plan_and_archive(origin.path(), dest.path());

    let hash = HashEngine::new(DigestAlgorithm::Sha1);
    let handler = DefaultErrorHandler;
    let mut patcher = Patcher::new(target.path(), hash, &BsdiffCodec, &handler);

    assert!(patcher.apply_archive(&archive).is_err());

    // a.txt must have been restored to its pre-apply content, not left patched.
    assert_eq!(
        fs::read(target.path().join("a.txt")).unwrap(),
        b"alpha content here"
    );
}
