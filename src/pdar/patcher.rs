use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use snafu::ResultExt;
use tempfile::NamedTempFile;

use crate::pdar::archive::Archive;
use crate::pdar::delta::BinaryDeltaCodec;
use crate::pdar::digest::HashEngine;
use crate::pdar::entry::{Entry, FileState, ProducedBytes, VerifyContext};
use crate::pdar::error::{
    Error, IoCopySnafu, IoCreateSnafu, IoPermissionsSnafu, IoReadSnafu, IoWriteSnafu,
    PatchedFileMismatchSnafu, Result, SourceFileMismatchSnafu,
};
use crate::pdar::mode::file_mode;

/// What a patcher should do after one entry fails to apply.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EntryDisposition {
    /// Escalate to archive-level rollback.
    Propagate,
    /// Log the failure and continue with the remaining entries, as if this one had never been
    /// part of the plan.
    Skip,
}

/// Strategy object a `Patcher` delegates failure policy to. The mutable staging state
/// (`Patcher::backups`) always lives on the `Patcher` itself; the handler only decides whether a
/// given entry failure should bubble up into a full rollback.
pub trait ErrorHandler {
    fn handle_entry(&self, entry: &Entry, err: &Error) -> EntryDisposition;

    fn handle_archive(&self, err: &Error) {
        error!("Archive application failed, rolling back: {err}");
    }
}

/// Always escalates. This is the behaviour the format's patch-application contract assumes.
#[derive(Debug, Default, Copy, Clone)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle_entry(&self, _entry: &Entry, _err: &Error) -> EntryDisposition {
        EntryDisposition::Propagate
    }
}

/// Downgrades "target already missing" on a `Delete` to a warning instead of failing the whole
/// archive, since the net effect (target absent) is already achieved.
#[derive(Debug, Default, Copy, Clone)]
pub struct LenientErrorHandler;

impl ErrorHandler for LenientErrorHandler {
    fn handle_entry(&self, entry: &Entry, err: &Error) -> EntryDisposition {
        match (entry, err) {
            (Entry::Delete { .. }, Error::IoDelete { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                warn!(
                    "{} was already absent; treating delete as satisfied",
                    entry.target().display()
                );
                EntryDisposition::Skip
            }
            _ => EntryDisposition::Propagate,
        }
    }
}

#[derive(Debug)]
struct Backup {
    path: PathBuf,
    mode: u32,
}

/// What the patcher knows about a path it has touched, keyed by that path's own identity
/// (not by which entry touched it). The two meanings must stay distinct: seeing a path only as
/// someone else's `target_source` must never block a later entry that targets the same path
/// directly from taking its own real backup.
#[derive(Debug)]
enum BackupState {
    /// This path has been backed up (or recorded as "didn't exist") as the direct target of some
    /// entry. Rollback acts on it.
    Captured(Option<Backup>),
    /// This path has so far only been seen as a Copy/Move `target_source`; the entry that
    /// referenced it never writes to it directly, so there's nothing to back up unless some
    /// other entry in the same archive also targets it, in which case `stage` upgrades this to
    /// `Captured`. Rollback ignores it.
    SourceOnly,
}

/// Applies a decoded plan to a live directory tree, with preconditions/postconditions verified
/// per entry and best-effort rollback if anything goes wrong partway through.
pub struct Patcher<'a> {
    root: PathBuf,
    hash: HashEngine,
    delta_codec: &'a dyn BinaryDeltaCodec,
    error_handler: &'a dyn ErrorHandler,
    backups: HashMap<PathBuf, BackupState>,
    to_unlink: Vec<PathBuf>,
}

impl<'a> Patcher<'a> {
    pub fn new<P: AsRef<Path>>(
        root: P,
        hash: HashEngine,
        delta_codec: &'a dyn BinaryDeltaCodec,
        error_handler: &'a dyn ErrorHandler,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            hash,
            delta_codec,
            error_handler,
            backups: HashMap::new(),
            to_unlink: Vec::new(),
        }
    }

    /// Applies every entry in `archive`, then processes deferred removals. On any failure not
    /// downgraded by the error handler, restores every file touched so far and returns the error.
    pub fn apply_archive(&mut self, archive: &Archive) -> Result<()> {
        info!(
            "Applying archive with {} entries to {}",
            archive.entries.len(),
            self.root.display()
        );

        for entry in &archive.entries {
            if let Err(err) = self.apply_entry(entry) {
                match self.error_handler.handle_entry(entry, &err) {
                    EntryDisposition::Skip => continue,
                    EntryDisposition::Propagate => {
                        self.error_handler.handle_archive(&err);
                        self.rollback();
                        return Err(err);
                    }
                }
            }
        }

        if let Err(err) = self.process_deferred_unlinks() {
            self.error_handler.handle_archive(&err);
            self.rollback();
            return Err(err);
        }

        self.cleanup_backups();
        Ok(())
    }

    fn apply_entry(&mut self, entry: &Entry) -> Result<()> {
        let target_path = self.root.join(entry.target());
        let target_state = self.read_state(&target_path)?;

        let source_state = match entry.source_path() {
            None => FileState::Absent,
            Some(p) if p == entry.target() => target_state.clone_state(),
            Some(p) => self.read_state(&self.root.join(p))?,
        };

        let ctx = VerifyContext {
            target_state: target_state.as_state(),
            source_state: source_state.as_state(),
        };

        if !entry.verify_orig(&ctx, &self.hash) {
            let produced_now = match &target_state {
                OwnedFileState::Absent => ProducedBytes::Absent,
                OwnedFileState::Present(bytes) => ProducedBytes::Bytes(bytes.clone()),
            };
            if entry.verify_dest(&produced_now, &self.hash) {
                info!("{} already applied, skipping", entry.target().display());
                return Ok(());
            }
            return Err(SourceFileMismatchSnafu {
                target: entry.target().to_path_buf(),
            }
            .build());
        }

        let produced = entry.produce(&ctx, self.delta_codec)?;
        if !entry.verify_dest(&produced, &self.hash) {
            return Err(PatchedFileMismatchSnafu {
                target: entry.target().to_path_buf(),
            }
            .build());
        }

        self.stage(entry, &target_path, &target_state)?;

        if let Err(err) = self.commit(entry, &target_path, &produced) {
            self.restore_one(&target_path);
            return Err(err);
        }

        match entry {
            Entry::Delete { .. } => self.to_unlink.push(target_path),
            Entry::Move { target_source, .. } => {
                self.to_unlink.push(self.root.join(target_source))
            }
            _ => {}
        }

        Ok(())
    }

    fn stage(
        &mut self,
        entry: &Entry,
        target_path: &Path,
        target_state: &OwnedFileState,
    ) -> Result<()> {
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent).context(IoCreateSnafu { path: parent })?;
        }

        let already_captured =
            matches!(self.backups.get(target_path), Some(BackupState::Captured(_)));
        if !already_captured {
            let backup = match target_state {
                OwnedFileState::Present(_) => Some(self.backup_file(target_path)?),
                OwnedFileState::Absent => None,
            };
            self.backups
                .insert(target_path.to_path_buf(), BackupState::Captured(backup));
        }

        if let Some(target_source) = entry.target_source() {
            let source_path = self.root.join(target_source);
            self.backups.entry(source_path).or_insert(BackupState::SourceOnly);
        }

        Ok(())
    }

    fn backup_file(&self, path: &Path) -> Result<Backup> {
        let mode = file_mode(path);
        let mut temp = NamedTempFile::new().context(IoCreateSnafu { path })?;
        let mut original = fs::File::open(path).context(IoReadSnafu { path })?;
        std::io::copy(&mut original, &mut temp).context(IoCopySnafu {
            from: path.to_path_buf(),
            to: temp.path().to_path_buf(),
        })?;
        let (_, backup_path) = temp.keep().map_err(|e| {
            Error::IoCreate {
                source: e.error,
                path: path.to_path_buf(),
            }
        })?;
        Ok(Backup {
            path: backup_path,
            mode,
        })
    }

    fn commit(&self, entry: &Entry, target_path: &Path, produced: &ProducedBytes) -> Result<()> {
        // Delete/Move removals are deferred; nothing is written in place for them here beyond
        // what Move's Copy-like write already did.
        if matches!(entry, Entry::Delete { .. }) {
            return Ok(());
        }

        let bytes = match produced {
            ProducedBytes::Bytes(bytes) => bytes,
            ProducedBytes::Absent => {
                return Err(Error::InvariantViolation {
                    detail: format!(
                        "non-delete entry for {} produced no bytes",
                        target_path.display()
                    ),
                })
            }
        };

        if target_path.exists() {
            ensure_writable(target_path)?;
        }

        fs::write(target_path, bytes).context(IoWriteSnafu { path: target_path })?;

        if let Some(mode) = entry.mode() {
            set_mode(target_path, mode)?;
        }

        Ok(())
    }

    fn process_deferred_unlinks(&mut self) -> Result<()> {
        for path in std::mem::take(&mut self.to_unlink) {
            debug!("Removing {}", path.display());
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(Error::IoDelete { source: e, path });
                }
            }
        }
        Ok(())
    }

    /// Restores every file recorded in the backup map to its pre-apply state: copies the backup
    /// back over the target (restoring mode too), or deletes the target if it didn't exist
    /// before the patcher touched it.
    fn rollback(&mut self) {
        for (path, backup) in self.backups.drain() {
            match backup {
                BackupState::Captured(Some(backup)) => {
                    if let Err(e) = fs::copy(&backup.path, &path) {
                        error!("Failed to restore {} during rollback: {e}", path.display());
                        continue;
                    }
                    if let Err(e) = set_mode(&path, backup.mode) {
                        error!("Failed to restore mode on {} during rollback: {e}", path.display());
                    }
                    let _ = fs::remove_file(&backup.path);
                }
                BackupState::Captured(None) => {
                    if let Err(e) = fs::remove_file(&path) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            error!("Failed to remove {} during rollback: {e}", path.display());
                        }
                    }
                }
                // Never written to directly by the entry that touched it as a target_source;
                // nothing to restore.
                BackupState::SourceOnly => {}
            }
        }
        self.to_unlink.clear();
    }

    fn restore_one(&mut self, target_path: &Path) {
        match self.backups.get(target_path) {
            Some(BackupState::Captured(Some(backup))) => {
                let _ = fs::copy(&backup.path, target_path);
                let _ = set_mode(target_path, backup.mode);
            }
            Some(BackupState::Captured(None)) => {
                let _ = fs::remove_file(target_path);
            }
            Some(BackupState::SourceOnly) | None => {}
        }
    }

    fn cleanup_backups(&mut self) {
        for (_, backup) in self.backups.drain() {
            if let BackupState::Captured(Some(backup)) = backup {
                let _ = fs::remove_file(backup.path);
            }
        }
    }

    fn read_state(&self, path: &Path) -> Result<OwnedFileState> {
        match fs::read(path) {
            Ok(bytes) => Ok(OwnedFileState::Present(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(OwnedFileState::Absent),
            Err(e) => Err(Error::IoRead {
                source: e,
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Like `FileState`, but owning its bytes - needed because the patcher reads files into local
/// variables that must outlive the borrowed `VerifyContext` built from them.
enum OwnedFileState {
    Absent,
    Present(Vec<u8>),
}

impl OwnedFileState {
    fn as_state(&self) -> FileState<'_> {
        match self {
            OwnedFileState::Absent => FileState::Absent,
            OwnedFileState::Present(bytes) => FileState::Present(bytes),
        }
    }

    fn clone_state(&self) -> OwnedFileState {
        match self {
            OwnedFileState::Absent => OwnedFileState::Absent,
            OwnedFileState::Present(bytes) => OwnedFileState::Present(bytes.clone()),
        }
    }
}

#[cfg(unix)]
fn ensure_writable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path).context(IoPermissionsSnafu { path })?;
    let mut perms = metadata.permissions();
    perms.set_mode(perms.mode() | 0o200);
    fs::set_permissions(path, perms).context(IoPermissionsSnafu { path })
}

#[cfg(not(unix))]
fn ensure_writable(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path).context(IoPermissionsSnafu { path })?;
    let mut perms = metadata.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path, perms).context(IoPermissionsSnafu { path })
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).context(IoPermissionsSnafu { path })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
