use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use regex::Regex;
use snafu::ResultExt;
use walkdir::WalkDir;

use crate::pdar::delta::BinaryDeltaCodec;
use crate::pdar::digest::{DigestAlgorithm, HashEngine, HexDigest};
use crate::pdar::entry::Entry;
use crate::pdar::error::{IoReadSnafu, Result, UnsupportedFileSnafu, WalkFileSnafu};
use crate::pdar::glob;
use crate::pdar::mode::file_mode;

/// Compares an origin tree against a destination tree and emits the ordered list of entries
/// (`Copy`, then `Move`, then `Diff`, then `Delete`, then `New`) that transforms the former into
/// the latter, restricted to file names matching any of `patterns` (an empty slice matches
/// everything).
pub fn plan(
    origin_root: &Path,
    dest_root: &Path,
    patterns: &[String],
    algorithm: DigestAlgorithm,
    delta_codec: &dyn BinaryDeltaCodec,
) -> Result<Vec<Entry>> {
    let hash = HashEngine::new(algorithm);
    let compiled: Vec<Regex> = patterns
        .iter()
        .map(|p| glob::compile(p))
        .collect::<Result<_>>()?;

    info!("Scanning origin tree {}", origin_root.display());
    let origin_digests = scan_tree(origin_root, &compiled, &hash)?;
    info!("Scanning destination tree {}", dest_root.display());
    let dest_digests = scan_tree(dest_root, &compiled, &hash)?;

    let origin_set: BTreeSet<&PathBuf> = origin_digests.keys().collect();
    let dest_set: BTreeSet<&PathBuf> = dest_digests.keys().collect();

    let common: BTreeSet<PathBuf> = origin_set
        .intersection(&dest_set)
        .map(|p| (*p).clone())
        .collect();
    let origin_only: BTreeSet<PathBuf> = origin_set
        .difference(&dest_set)
        .map(|p| (*p).clone())
        .collect();
    let dest_only: BTreeSet<PathBuf> = dest_set
        .difference(&origin_set)
        .map(|p| (*p).clone())
        .collect();

    // First origin path (in sorted order) carrying any given digest - the deterministic
    // "first match wins" rule from the tie-break section.
    let mut origin_digest_index: BTreeMap<HexDigest, PathBuf> = BTreeMap::new();
    for path in origin_digests.keys() {
        let digest = origin_digests[path].clone();
        origin_digest_index.entry(digest).or_insert_with(|| path.clone());
    }

    // source -> bound destination targets, in sorted-dest-target iteration order (so the last
    // element is well defined for the "last match becomes a move" rule).
    let mut bound: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    let mut new_targets: BTreeSet<PathBuf> = BTreeSet::new();

    for target in &dest_only {
        match origin_digest_index.get(&dest_digests[target]) {
            Some(source) => bound.entry(source.clone()).or_default().push(target.clone()),
            None => {
                new_targets.insert(target.clone());
            }
        }
    }

    let mut copy_entries = Vec::new();
    let mut move_entries = Vec::new();
    let mut move_sources: BTreeSet<PathBuf> = BTreeSet::new();

    for (source, targets) in &bound {
        if dest_set.contains(source) {
            // Source persists in the destination tree: every bound target is a copy.
            for target in targets {
                debug!("Planning copy {} -> {}", source.display(), target.display());
                copy_entries.push(Entry::Copy {
                    target: target.clone(),
                    target_source: source.clone(),
                    dest_digest: origin_digests[source].clone(),
                    mode: file_mode(&dest_root.join(target)),
                });
            }
        } else {
            // Source vanishes: the last bound target becomes a move, the rest copies sharing
            // the same (about-to-be-unlinked) source.
            let mut targets = targets.clone();
            let move_target = targets.pop().expect("bound sources always have >=1 target");

            for target in &targets {
                debug!(
                    "Planning copy (shared move source) {} -> {}",
                    source.display(),
                    target.display()
                );
                copy_entries.push(Entry::Copy {
                    target: target.clone(),
                    target_source: source.clone(),
                    dest_digest: origin_digests[source].clone(),
                    mode: file_mode(&dest_root.join(target)),
                });
            }

            debug!("Planning move {} -> {}", source.display(), move_target.display());
            move_entries.push(Entry::Move {
                target: move_target.clone(),
                target_source: source.clone(),
                dest_digest: origin_digests[source].clone(),
                mode: file_mode(&dest_root.join(&move_target)),
            });
            move_sources.insert(source.clone());
        }
    }

    let mut entries = Vec::new();
    entries.extend(copy_entries);
    entries.extend(move_entries);

    // Diff entries for common targets with differing content.
    for target in &common {
        let orig_digest = &origin_digests[target];
        let dest_digest = &dest_digests[target];
        if orig_digest != dest_digest {
            let orig_bytes = read_file(&origin_root.join(target))?;
            let dest_bytes = read_file(&dest_root.join(target))?;
            debug!("Planning diff for {}", target.display());
            let payload = delta_codec.diff(&orig_bytes, &dest_bytes)?;
            entries.push(Entry::Diff {
                target: target.clone(),
                orig_digest: orig_digest.clone(),
                dest_digest: dest_digest.clone(),
                mode: file_mode(&dest_root.join(target)),
                payload,
            });
        }
    }

    // Delete entries: origin-only targets that weren't consumed as a move source.
    for target in &origin_only {
        if !move_sources.contains(target) {
            debug!("Planning delete for {}", target.display());
            entries.push(Entry::Delete {
                target: target.clone(),
                orig_digest: origin_digests[target].clone(),
            });
        }
    }

    // New entries: destination-only targets with no content match anywhere in the origin tree.
    for target in &new_targets {
        let dest_bytes = read_file(&dest_root.join(target))?;
        debug!("Planning new file {}", target.display());
        entries.push(Entry::New {
            target: target.clone(),
            dest_digest: dest_digests[target].clone(),
            mode: file_mode(&dest_root.join(target)),
            payload: dest_bytes,
        });
    }

    Ok(entries)
}

/// Walks a tree, restricting to regular files whose base name matches `patterns`, and returns
/// each matching relative path's content digest.
fn scan_tree(
    root: &Path,
    patterns: &[Regex],
    hash: &HashEngine,
) -> Result<BTreeMap<PathBuf, HexDigest>> {
    let mut digests = BTreeMap::new();

    for entry in WalkDir::new(root) {
        let entry = entry.context(WalkFileSnafu)?;
        if entry.path() == root {
            continue;
        }
        if entry.file_type().is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if !glob::any_matches(patterns, &name) {
            continue;
        }

        if !entry.file_type().is_file() {
            return Err(UnsupportedFileSnafu {
                path: entry.path().to_path_buf(),
            }
            .build());
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .expect("walked entries are always rooted under the tree being scanned")
            .to_path_buf();

        digests.insert(relative, hash.hash_file(entry.path())?);
    }

    Ok(digests)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).context(IoReadSnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdar::delta::BsdiffCodec;
    use crate::pdar::error::Error;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &[u8]) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn plan_default(origin: &Path, dest: &Path) -> Vec<Entry> {
        let codec = BsdiffCodec;
        plan(origin, dest, &[], DigestAlgorithm::Sha1, &codec).unwrap()
    }

    #[test]
    fn s2_new_file_has_no_origin_match() {
        let origin = tempdir().unwrap();
        let dest = tempdir().unwrap();
        write(origin.path(), "a", b"x");
        write(dest.path(), "a", b"x");
        write(dest.path(), "b", b"z");

        let entries = plan_default(origin.path(), dest.path());
        assert_eq!(entries.len(), 1);
        assert!(matches!(&entries[0], Entry::New { target, .. } if target == Path::new("b")));
    }

    #[test]
    fn s3_removed_file_with_no_match_is_deleted() {
        let origin = tempdir().unwrap();
        let dest = tempdir().unwrap();
        write(origin.path(), "a", b"x");

        let entries = plan_default(origin.path(), dest.path());
        assert_eq!(entries.len(), 1);
        assert!(matches!(&entries[0], Entry::Delete { target, .. } if target == Path::new("a")));
    }

    #[test]
    fn s4_sole_destination_is_a_move() {
        let origin = tempdir().unwrap();
        let dest = tempdir().unwrap();
        write(origin.path(), "a", b"x");
        write(dest.path(), "b", b"x");

        let entries = plan_default(origin.path(), dest.path());
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            Entry::Move { target, target_source, .. } => {
                assert_eq!(target, Path::new("b"));
                assert_eq!(target_source, Path::new("a"));
            }
            other => panic!("expected a single Move entry, got {other:?}"),
        }
    }

    #[test]
    fn s5_surviving_source_produces_a_copy() {
        let origin = tempdir().unwrap();
        let dest = tempdir().unwrap();
        write(origin.path(), "a", b"x");
        write(dest.path(), "a", b"x");
        write(dest.path(), "b", b"x");

        let entries = plan_default(origin.path(), dest.path());
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            Entry::Copy { target, target_source, .. } => {
                assert_eq!(target, Path::new("b"));
                assert_eq!(target_source, Path::new("a"));
            }
            other => panic!("expected a single Copy entry, got {other:?}"),
        }
    }

    #[test]
    fn multiple_destinations_sharing_a_vanished_source_split_into_copy_and_move() {
        let origin = tempdir().unwrap();
        let dest = tempdir().unwrap();
        write(origin.path(), "a", b"x");
        write(dest.path(), "b", b"x");
        write(dest.path(), "c", b"x");

        let entries = plan_default(origin.path(), dest.path());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().filter(|e| e.type_code() == "copy").count(), 1);
        assert_eq!(entries.iter().filter(|e| e.type_code() == "move").count(), 1);
        // The move target is the lexicographically last bound destination ("c" after "b").
        assert!(entries
            .iter()
            .any(|e| e.type_code() == "move" && e.target() == Path::new("c")));
    }

    #[test]
    fn patterns_restrict_which_files_are_planned() {
        let origin = tempdir().unwrap();
        let dest = tempdir().unwrap();
        write(origin.path(), "a.txt", b"x");
        write(dest.path(), "a.txt", b"y");
        write(dest.path(), "a.md", b"ignored new file");

        let codec = BsdiffCodec;
        let entries = plan(
            origin.path(),
            dest.path(),
            &["*.txt".to_string()],
            DigestAlgorithm::Sha1,
            &codec,
        )
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target(), Path::new("a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn matching_symlink_is_rejected_as_unsupported() {
        let origin = tempdir().unwrap();
        let dest = tempdir().unwrap();
        write(origin.path(), "real.txt", b"x");
        std::os::unix::fs::symlink(
            origin.path().join("real.txt"),
            origin.path().join("link.txt"),
        )
        .unwrap();

        let codec = BsdiffCodec;
        let result = plan(origin.path(), dest.path(), &[], DigestAlgorithm::Sha1, &codec);
        assert!(matches!(result, Err(Error::UnsupportedFile { .. })));
    }
}
