use std::path::PathBuf;
use std::process::exit;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use pdar::pdar::archive::Archive;
use pdar::pdar::delta::BsdiffCodec;
use pdar::pdar::digest::{DigestAlgorithm, HashEngine};
use pdar::pdar::error::{ArchiveExistsSnafu, Error};
use pdar::pdar::patcher::{DefaultErrorHandler, Patcher};
use pdar::pdar::planner::plan;
use snafu::ResultExt;

/// A CLI for creating and applying portable delta archives
#[derive(Debug, Parser)]
#[clap(name = "pdar", author = "Peter Winckles <pwinckles@pm.me>", version)]
pub struct PdarArgs {
    /// Suppress non-error output
    #[clap(short, long)]
    pub quiet: bool,

    /// Enable debug logging
    #[clap(short, long)]
    pub debug: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new archive from the difference between two directory trees
    Create(CreateCmd),
    /// Apply an archive to a directory tree
    Apply(ApplyCmd),
    /// Print an archive's header and entry summary
    Info(InfoCmd),
}

#[derive(Args, Debug)]
pub struct CreateCmd {
    /// Overwrite the archive file if it already exists
    #[clap(short, long)]
    pub force: bool,

    /// Keep a `.bak` copy of an existing archive file before overwriting it
    #[clap(short, long)]
    pub backup: bool,

    /// Digest algorithm used for content verification
    #[clap(short = 'a', long, default_value = "sha1")]
    pub algorithm: String,

    /// Path the archive is written to
    pub archive: PathBuf,

    /// The tree the archive transforms from
    pub origin_path: PathBuf,

    /// The tree the archive transforms to
    pub dest_path: PathBuf,

    /// Glob patterns restricting which files are considered (default: all)
    pub patterns: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ApplyCmd {
    /// Apply the patched tree to a different directory instead of in place
    #[clap(short, long)]
    pub output_path: Option<PathBuf>,

    /// Path to the archive to apply
    pub archive: PathBuf,

    /// The tree to patch
    pub target_path: PathBuf,
}

#[derive(Args, Debug)]
pub struct InfoCmd {
    /// Path to the archive to inspect
    pub archive: PathBuf,
}

fn main() {
    let args = PdarArgs::parse();

    let log_level = if args.quiet {
        LevelFilter::Off
    } else if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    env_logger::builder()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    let result = match &args.command {
        Command::Create(cmd) => run_create(cmd),
        Command::Apply(cmd) => run_apply(cmd),
        Command::Info(cmd) => run_info(cmd),
    };

    match result {
        Ok(()) => exit(0),
        Err(err) => {
            eprintln!("pdar: {err}");
            exit(exit_code(&err));
        }
    }
}

fn exit_code(err: &Error) -> i32 {
    match err {
        Error::InvariantViolation { .. } => 4,
        _ => 1,
    }
}

fn run_create(cmd: &CreateCmd) -> pdar::pdar::error::Result<()> {
    if cmd.archive.exists() {
        if cmd.backup {
            let backup_path = cmd.archive.with_extension("bak");
            std::fs::copy(&cmd.archive, &backup_path)
                .context(pdar::pdar::error::IoCopySnafu {
                    from: cmd.archive.clone(),
                    to: backup_path,
                })?;
        } else if !cmd.force {
            return Err(ArchiveExistsSnafu {
                path: cmd.archive.clone(),
            }
            .build());
        }
    }

    let algorithm = DigestAlgorithm::parse(&cmd.algorithm)?;
    let codec = BsdiffCodec;
    let entries = plan(
        &cmd.origin_path,
        &cmd.dest_path,
        &cmd.patterns,
        algorithm,
        &codec,
    )?;

    log::info!("Planned {} entries", entries.len());
    let archive = Archive::new(algorithm, Utc::now(), entries);

    let file = std::fs::File::create(&cmd.archive).context(pdar::pdar::error::IoCreateSnafu {
        path: cmd.archive.clone(),
    })?;
    archive.write(file)
}

fn run_apply(cmd: &ApplyCmd) -> pdar::pdar::error::Result<()> {
    let file = std::fs::File::open(&cmd.archive).context(pdar::pdar::error::IoReadSnafu {
        path: cmd.archive.clone(),
    })?;
    let archive = Archive::read(file)?;

    let root = match &cmd.output_path {
        Some(output) => {
            copy_tree(&cmd.target_path, output)?;
            output.clone()
        }
        None => cmd.target_path.clone(),
    };

    let hash = HashEngine::new(archive.header.hash_algorithm);
    let codec = BsdiffCodec;
    let handler = DefaultErrorHandler;
    let mut patcher = Patcher::new(&root, hash, &codec, &handler);
    patcher.apply_archive(&archive)
}

fn run_info(cmd: &InfoCmd) -> pdar::pdar::error::Result<()> {
    let file = std::fs::File::open(&cmd.archive).context(pdar::pdar::error::IoReadSnafu {
        path: cmd.archive.clone(),
    })?;
    let archive = Archive::read(file)?;

    println!("Format version: {}", archive.header.format_version);
    println!("Created:        {}", archive.header.created);
    println!("Hash algorithm: {}", archive.header.hash_algorithm);
    println!("Entries:        {}", archive.entries.len());

    for entry in &archive.entries {
        println!("  {:<8} {}", entry.type_code(), entry.target().display());
    }

    Ok(())
}

fn copy_tree(from: &PathBuf, to: &PathBuf) -> pdar::pdar::error::Result<()> {
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry.map_err(|source| Error::WalkFile { source })?;
        let relative = entry.path().strip_prefix(from).expect("walked under `from`");
        let dest = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest).context(pdar::pdar::error::IoCreateSnafu {
                path: dest.clone(),
            })?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)
                    .context(pdar::pdar::error::IoCreateSnafu { path: parent.to_path_buf() })?;
            }
            std::fs::copy(entry.path(), &dest).context(pdar::pdar::error::IoCopySnafu {
                from: entry.path().to_path_buf(),
                to: dest,
            })?;
        }
    }
    Ok(())
}
