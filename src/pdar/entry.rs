use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::pdar::consts::{
    HEADER_ENTRY_DEST_DIGEST, HEADER_ENTRY_ORIG_DIGEST, HEADER_ENTRY_TARGET,
    HEADER_ENTRY_TARGET_SOURCE, HEADER_ENTRY_TYPE, TYPE_COPY, TYPE_DELETE, TYPE_DIFF, TYPE_MOVE,
    TYPE_NEW,
};
use crate::pdar::delta::BinaryDeltaCodec;
use crate::pdar::digest::{HashEngine, HexDigest};
use crate::pdar::error::{MissingEntryHeaderSnafu, Result, UnknownEntryTypeSnafu};

/// The bytes (or absence of bytes) a patcher observes at some path before applying an entry.
#[derive(Debug, Clone, Copy)]
pub enum FileState<'a> {
    Absent,
    Present(&'a [u8]),
}

/// The bytes (or absence of bytes) an entry's `produce` step yields.
#[derive(Debug, Clone)]
pub enum ProducedBytes {
    Absent,
    Bytes(Vec<u8>),
}

/// The filesystem state a patcher gathers before verifying or producing an entry's effect.
/// `source_state` is only meaningful for `Copy`/`Move`, where it refers to `target_source` rather
/// than `target`.
#[derive(Debug, Clone, Copy)]
pub struct VerifyContext<'a> {
    pub target_state: FileState<'a>,
    pub source_state: FileState<'a>,
}

/// One atomic transformation of a single target path. Entries are immutable once constructed;
/// the planner builds them, the codec round-trips them, the patcher only ever reads them.
#[derive(Debug, Clone)]
pub enum Entry {
    Diff {
        target: PathBuf,
        orig_digest: HexDigest,
        dest_digest: HexDigest,
        mode: u32,
        payload: Vec<u8>,
    },
    New {
        target: PathBuf,
        dest_digest: HexDigest,
        mode: u32,
        payload: Vec<u8>,
    },
    Delete {
        target: PathBuf,
        orig_digest: HexDigest,
    },
    Copy {
        target: PathBuf,
        target_source: PathBuf,
        dest_digest: HexDigest,
        mode: u32,
    },
    Move {
        target: PathBuf,
        target_source: PathBuf,
        dest_digest: HexDigest,
        mode: u32,
    },
}

impl Entry {
    pub fn target(&self) -> &Path {
        match self {
            Entry::Diff { target, .. }
            | Entry::New { target, .. }
            | Entry::Delete { target, .. }
            | Entry::Copy { target, .. }
            | Entry::Move { target, .. } => target,
        }
    }

    pub fn target_source(&self) -> Option<&Path> {
        match self {
            Entry::Copy { target_source, .. } | Entry::Move { target_source, .. } => {
                Some(target_source)
            }
            _ => None,
        }
    }

    /// The path whose content the patcher must read in order to populate
    /// `VerifyContext::source_state`: `target` for `Diff`/`Delete`, `target_source` for
    /// `Copy`/`Move`, nothing for `New`.
    pub fn source_path(&self) -> Option<&Path> {
        match self {
            Entry::Diff { target, .. } | Entry::Delete { target, .. } => Some(target),
            Entry::Copy { target_source, .. } | Entry::Move { target_source, .. } => {
                Some(target_source)
            }
            Entry::New { .. } => None,
        }
    }

    pub fn mode(&self) -> Option<u32> {
        match self {
            Entry::Diff { mode, .. }
            | Entry::New { mode, .. }
            | Entry::Copy { mode, .. }
            | Entry::Move { mode, .. } => Some(*mode),
            Entry::Delete { .. } => None,
        }
    }

    pub fn orig_digest(&self, empty: &HexDigest) -> HexDigest {
        match self {
            Entry::Diff { orig_digest, .. } | Entry::Delete { orig_digest, .. } => {
                orig_digest.clone()
            }
            Entry::New { .. } => empty.clone(),
            Entry::Copy { .. } | Entry::Move { .. } => empty.clone(),
        }
    }

    /// For `Copy`/`Move` this is, by design, the digest of the *source* file's content rather
    /// than anything found at `target` before the apply. That's how the wire format always
    /// worked; it reads oddly but is load-bearing for existing archives.
    pub fn dest_digest(&self) -> Option<&HexDigest> {
        match self {
            Entry::Diff { dest_digest, .. }
            | Entry::New { dest_digest, .. }
            | Entry::Copy { dest_digest, .. }
            | Entry::Move { dest_digest, .. } => Some(dest_digest),
            Entry::Delete { .. } => None,
        }
    }

    pub fn type_code(&self) -> &'static str {
        match self {
            Entry::Diff { .. } => TYPE_DIFF,
            Entry::New { .. } => TYPE_NEW,
            Entry::Delete { .. } => TYPE_DELETE,
            Entry::Copy { .. } => TYPE_COPY,
            Entry::Move { .. } => TYPE_MOVE,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Entry::Diff { payload, .. } | Entry::New { payload, .. } => payload,
            Entry::Delete { .. } | Entry::Copy { .. } | Entry::Move { .. } => &[],
        }
    }

    /// True iff the filesystem state the patcher observed is a valid starting point for this
    /// entry: the precondition half of the apply protocol.
    pub fn verify_orig(&self, ctx: &VerifyContext, hash: &HashEngine) -> bool {
        match self {
            Entry::Diff { orig_digest, .. } | Entry::Delete { orig_digest, .. } => {
                matches!(ctx.target_state, FileState::Present(bytes) if hash.hash_bytes(bytes) == *orig_digest)
            }
            Entry::New { .. } => matches!(ctx.target_state, FileState::Absent),
            Entry::Copy { dest_digest, .. } | Entry::Move { dest_digest, .. } => {
                matches!(ctx.target_state, FileState::Absent)
                    && matches!(ctx.source_state, FileState::Present(bytes) if hash.hash_bytes(bytes) == *dest_digest)
            }
        }
    }

    /// True iff `produced` is the content this entry is supposed to leave behind.
    pub fn verify_dest(&self, produced: &ProducedBytes, hash: &HashEngine) -> bool {
        match self {
            Entry::Delete { .. } => matches!(produced, ProducedBytes::Absent),
            _ => {
                let Some(dest_digest) = self.dest_digest() else {
                    return false;
                };
                matches!(produced, ProducedBytes::Bytes(bytes) if hash.hash_bytes(bytes) == *dest_digest)
            }
        }
    }

    /// Computes the bytes this entry would leave at `target`, given the content found at
    /// `source_path()` (or ignored, for `New`/`Delete`).
    pub fn produce(
        &self,
        ctx: &VerifyContext,
        delta_codec: &dyn BinaryDeltaCodec,
    ) -> Result<ProducedBytes> {
        match self {
            Entry::Diff { target, payload, .. } => match ctx.source_state {
                FileState::Present(old) => {
                    Ok(ProducedBytes::Bytes(delta_codec.apply(old, payload)?))
                }
                FileState::Absent => Err(crate::pdar::error::Error::SourceFileMismatch {
                    target: target.clone(),
                }),
            },
            Entry::New { payload, .. } => Ok(ProducedBytes::Bytes(payload.clone())),
            Entry::Delete { .. } => Ok(ProducedBytes::Absent),
            Entry::Copy { target, .. } | Entry::Move { target, .. } => match ctx.source_state {
                FileState::Present(bytes) => Ok(ProducedBytes::Bytes(bytes.to_vec())),
                FileState::Absent => Err(crate::pdar::error::Error::SourceFileMismatch {
                    target: target.clone(),
                }),
            },
        }
    }

    /// Builds the entry's pax extended-header key/value records (sans the `New`/`Diff` payload,
    /// which is the tar member's body, not a header).
    pub fn to_pax_records(&self) -> BTreeMap<String, String> {
        let mut records = BTreeMap::new();
        records.insert(HEADER_ENTRY_TYPE.to_string(), self.type_code().to_string());
        records.insert(
            HEADER_ENTRY_TARGET.to_string(),
            self.target().to_string_lossy().into_owned(),
        );

        match self {
            Entry::Diff { orig_digest, dest_digest, .. } => {
                records.insert(HEADER_ENTRY_ORIG_DIGEST.to_string(), orig_digest.to_string());
                records.insert(HEADER_ENTRY_DEST_DIGEST.to_string(), dest_digest.to_string());
            }
            Entry::New { dest_digest, .. } => {
                records.insert(HEADER_ENTRY_DEST_DIGEST.to_string(), dest_digest.to_string());
            }
            Entry::Delete { orig_digest, .. } => {
                records.insert(HEADER_ENTRY_ORIG_DIGEST.to_string(), orig_digest.to_string());
            }
            Entry::Copy { target_source, dest_digest, .. }
            | Entry::Move { target_source, dest_digest, .. } => {
                records.insert(HEADER_ENTRY_DEST_DIGEST.to_string(), dest_digest.to_string());
                records.insert(
                    HEADER_ENTRY_TARGET_SOURCE.to_string(),
                    target_source.to_string_lossy().into_owned(),
                );
            }
        }

        records
    }

    /// Reconstructs an `Entry` from a tar member's pax records, its mode, and its body bytes.
    pub fn from_pax_records(
        records: &BTreeMap<String, String>,
        mode: u32,
        payload: Vec<u8>,
    ) -> Result<Entry> {
        let type_code = required(records, HEADER_ENTRY_TYPE)?;
        let target = PathBuf::from(required(records, HEADER_ENTRY_TARGET)?);

        Ok(match type_code.as_str() {
            TYPE_DIFF => Entry::Diff {
                orig_digest: required(records, HEADER_ENTRY_ORIG_DIGEST)?.as_str().into(),
                dest_digest: required(records, HEADER_ENTRY_DEST_DIGEST)?.as_str().into(),
                target,
                mode,
                payload,
            },
            TYPE_NEW => Entry::New {
                dest_digest: required(records, HEADER_ENTRY_DEST_DIGEST)?.as_str().into(),
                target,
                mode,
                payload,
            },
            TYPE_DELETE => Entry::Delete {
                orig_digest: required(records, HEADER_ENTRY_ORIG_DIGEST)?.as_str().into(),
                target,
            },
            TYPE_COPY => Entry::Copy {
                target_source: PathBuf::from(required(records, HEADER_ENTRY_TARGET_SOURCE)?),
                dest_digest: required(records, HEADER_ENTRY_DEST_DIGEST)?.as_str().into(),
                target,
                mode,
            },
            TYPE_MOVE => Entry::Move {
                target_source: PathBuf::from(required(records, HEADER_ENTRY_TARGET_SOURCE)?),
                dest_digest: required(records, HEADER_ENTRY_DEST_DIGEST)?.as_str().into(),
                target,
                mode,
            },
            other => {
                return Err(UnknownEntryTypeSnafu {
                    type_code: other.to_string(),
                }
                .build())
            }
        })
    }
}

fn required<'a>(records: &'a BTreeMap<String, String>, key: &str) -> Result<&'a String> {
    records.get(key).ok_or_else(|| {
        MissingEntryHeaderSnafu {
            target: PathBuf::from(records.get(HEADER_ENTRY_TARGET).cloned().unwrap_or_default()),
            header: key.to_string(),
        }
        .build()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdar::delta::BsdiffCodec;
    use crate::pdar::digest::DigestAlgorithm;

    fn hash() -> HashEngine {
        HashEngine::new(DigestAlgorithm::Sha1)
    }

    #[test]
    fn diff_round_trips_through_pax_records() {
        let hash = hash();
        let entry = Entry::Diff {
            target: PathBuf::from("a/b.txt"),
            orig_digest: hash.hash_bytes(b"old"),
            dest_digest: hash.hash_bytes(b"new"),
            mode: 0o644,
            payload: vec![1, 2, 3],
        };

        let records = entry.to_pax_records();
        let rebuilt = Entry::from_pax_records(&records, 0o644, vec![1, 2, 3]).unwrap();

        assert_eq!(entry.target(), rebuilt.target());
        assert_eq!(entry.type_code(), rebuilt.type_code());
        assert_eq!(entry.dest_digest(), rebuilt.dest_digest());
    }

    #[test]
    fn new_entry_requires_target_absent() {
        let hash = hash();
        let entry = Entry::New {
            target: PathBuf::from("a.txt"),
            dest_digest: hash.hash_bytes(b"hi"),
            mode: 0o644,
            payload: b"hi".to_vec(),
        };

        let ctx_absent = VerifyContext {
            target_state: FileState::Absent,
            source_state: FileState::Absent,
        };
        assert!(entry.verify_orig(&ctx_absent, &hash));

        let ctx_present = VerifyContext {
            target_state: FileState::Present(b"already there"),
            source_state: FileState::Absent,
        };
        assert!(!entry.verify_orig(&ctx_present, &hash));
    }

    #[test]
    fn copy_verifies_against_source_not_target() {
        let hash = hash();
        let dest_digest = hash.hash_bytes(b"shared");
        let entry = Entry::Copy {
            target: PathBuf::from("b.txt"),
            target_source: PathBuf::from("a.txt"),
            dest_digest,
            mode: 0o644,
        };

        let ctx = VerifyContext {
            target_state: FileState::Absent,
            source_state: FileState::Present(b"shared"),
        };
        assert!(entry.verify_orig(&ctx, &hash));

        let produced = entry
            .produce(&ctx, &BsdiffCodec)
            .expect("copy should read from source_state");
        assert!(entry.verify_dest(&produced, &hash));
    }

    #[test]
    fn delete_verify_dest_requires_absent() {
        let hash = hash();
        let entry = Entry::Delete {
            target: PathBuf::from("a.txt"),
            orig_digest: hash.hash_bytes(b"bye"),
        };

        assert!(entry.verify_dest(&ProducedBytes::Absent, &hash));
        assert!(!entry.verify_dest(&ProducedBytes::Bytes(b"still here".to_vec()), &hash));
    }
}
