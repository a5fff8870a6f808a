use std::path::PathBuf;

use snafu::prelude::*;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Error creating file {}: {}", path.display(), source))]
    IoCreate {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error writing to file {}: {}", path.display(), source))]
    IoWrite {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error reading file {}: {}", path.display(), source))]
    IoRead {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error reading directory {}: {}", path.display(), source))]
    IoReadDir {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Failed to move {} to {}: {}", from.display(), to.display(), source))]
    IoMove {
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },
    #[snafu(display("Failed to copy {} to {}: {}", from.display(), to.display(), source))]
    IoCopy {
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },
    #[snafu(display("Failed to delete {}: {}", path.display(), source))]
    IoDelete {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Failed to stat {}: {}", path.display(), source))]
    IoStat {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Failed to set permissions on {}: {}", path.display(), source))]
    IoPermissions {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error reading or writing archive: {}", source))]
    IoArchive { source: std::io::Error },
    #[snafu(display("Error walking files: {}", source))]
    WalkFile { source: walkdir::Error },
    #[snafu(display("Encountered an unsupported file type at {}", path.display()))]
    UnsupportedFile { path: PathBuf },

    #[snafu(display("{} is not a PDAR archive", path.display()))]
    NotPdar { path: PathBuf },
    #[snafu(display("Unsupported PDAR format version {version}"))]
    UnsupportedVersion { version: u32 },
    #[snafu(display("Malformed tar member: {details}"))]
    MalformedTar { details: String },
    #[snafu(display("Archive is missing required header {header}"))]
    MissingArchiveHeader { header: String },
    #[snafu(display("Entry {} is missing required header {header}", target.display()))]
    MissingEntryHeader { target: PathBuf, header: String },
    #[snafu(display("Invalid PDAR timestamp: {value}"))]
    InvalidTimestamp { value: String },
    #[snafu(display("Unknown entry type {type_code}"))]
    UnknownEntryType { type_code: String },

    #[snafu(display("Unknown digest algorithm: {name}"))]
    UnknownHashAlgorithm { name: String },
    #[snafu(display("Glob pattern is invalid: {pattern}"))]
    InvalidPattern { pattern: String },
    #[snafu(display("Archive {} already exists", path.display()))]
    ArchiveExists { path: PathBuf },

    #[snafu(display(
        "File {} does not match the archive's expected original content",
        target.display()
    ))]
    SourceFileMismatch { target: PathBuf },
    #[snafu(display(
        "Applying the patch for {} did not produce the expected content",
        target.display()
    ))]
    PatchedFileMismatch { target: PathBuf },
    #[snafu(display("Failed to compute binary delta for {}: {}", target.display(), details))]
    DeltaFailure { target: PathBuf, details: String },

    #[snafu(display("Internal invariant violated: {detail}"))]
    InvariantViolation { detail: String },
}
