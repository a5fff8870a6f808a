use crate::pdar::digest::DigestAlgorithm;

pub const PDAR_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PDAR_SRC_URL: &str = "https://github.com/pwinckles/pdar";

pub const PDAR_MAGIC: &str = "PDAR";
pub const PDAR_FORMAT_MAJOR: u32 = 1;

pub const DEFAULT_ALGORITHM: DigestAlgorithm = DigestAlgorithm::Sha1;

/// Default mode applied to created files before masking against the process umask: `0700`.
pub const DEFAULT_MODE: u32 = 0o700;

// PAX extended header keys. Archive-level headers live on the first member; the rest are per-entry.
pub const HEADER_VERSION: &str = "pdar_version";
pub const HEADER_CREATED_DATETIME: &str = "pdar_created_datetime";
pub const HEADER_HASH_TYPE: &str = "pdar_hash_type";

pub const HEADER_ENTRY_TYPE: &str = "pdar_entry_type";
pub const HEADER_ENTRY_TARGET: &str = "pdar_entry_target";
pub const HEADER_ENTRY_ORIG_DIGEST: &str = "pdar_entry_orig_digest";
pub const HEADER_ENTRY_DEST_DIGEST: &str = "pdar_entry_dest_digest";
pub const HEADER_ENTRY_TARGET_SOURCE: &str = "pdar_entry_target_source";

pub const TYPE_DIFF: &str = "diff";
pub const TYPE_NEW: &str = "new";
pub const TYPE_DELETE: &str = "delete";
pub const TYPE_COPY: &str = "copy";
pub const TYPE_MOVE: &str = "move";
