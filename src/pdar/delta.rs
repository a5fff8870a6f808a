use std::io::Cursor;
use std::path::Path;

use qbsdiff::{Bsdiff, Bspatch};

use crate::pdar::error::{DeltaFailureSnafu, Result};

/// An opaque binary-delta capability: produce a patch between two byte buffers, and reproduce
/// the new buffer from the old one plus a patch. The archive format does not prescribe an
/// algorithm; this is the seam a different delta scheme would plug into.
pub trait BinaryDeltaCodec {
    fn diff(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>>;
    fn apply(&self, old: &[u8], delta: &[u8]) -> Result<Vec<u8>>;
}

/// The production `BinaryDeltaCodec`, backed by a bsdiff/bspatch implementation.
#[derive(Debug, Default, Copy, Clone)]
pub struct BsdiffCodec;

impl BinaryDeltaCodec for BsdiffCodec {
    fn diff(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        Bsdiff::new(old, new)
            .compare(&mut out)
            .map_err(|e| delta_err(e))?;
        Ok(out.into_inner())
    }

    fn apply(&self, old: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        Bspatch::new(delta)
            .map_err(delta_err)?
            .apply(old, Cursor::new(&mut out))
            .map_err(delta_err)?;
        Ok(out)
    }
}

/// `DeltaFailure` carries a `target` field for diagnostics at the call site in `entry.rs`; the
/// codec itself only sees byte buffers, so it reports failures without a path.
fn delta_err(err: impl std::fmt::Display) -> crate::pdar::error::Error {
    DeltaFailureSnafu {
        target: Path::new("<buffer>").to_path_buf(),
        details: err.to_string(),
    }
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_diff_and_apply() {
        let codec = BsdiffCodec;
        let old = b"the quick brown fox jumps over the lazy dog".to_vec();
        let new = b"the quick brown fox leaps over the lazy dogs".to_vec();

        let delta = codec.diff(&old, &new).unwrap();
        let produced = codec.apply(&old, &delta).unwrap();

        assert_eq!(new, produced);
    }

    #[test]
    fn handles_empty_input() {
        let codec = BsdiffCodec;
        let old = b"".to_vec();
        let new = b"hello".to_vec();

        let delta = codec.diff(&old, &new).unwrap();
        let produced = codec.apply(&old, &delta).unwrap();

        assert_eq!(new, produced);
    }
}
