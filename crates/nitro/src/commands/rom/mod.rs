use std::path::{Path, PathBuf};

use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use nitro_fs::{FileSystem, FileSystemObject, FileSystemOptions};
use tracing::info;

pub mod extract;
pub mod import;
pub mod info;
pub mod list;

#[derive(clap::Subcommand)]
pub enum RomCommands {
    /// Show the header and file system summary of a ROM image
    Info(info::InfoArgs),
    /// List the files of a ROM image
    List(list::ListArgs),
    /// Extract the files of a ROM image into a directory
    Extract(extract::ExtractArgs),
    /// Write edited files from a directory back into a ROM image
    Import(import::ImportArgs),
}

impl RomCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            RomCommands::Info(info) => info.handle(),
            RomCommands::List(list) => list.handle(),
            RomCommands::Extract(extract) => extract.handle(),
            RomCommands::Import(import) => import.handle(),
        }
    }
}

/// Options shared by every command that loads a ROM image
#[derive(Args)]
pub struct LoadArgs {
    /// An input ROM image
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Threads expanding nested archives
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Don't list the files of nested archives
    #[arg(long, default_value_t = false)]
    no_expand: bool,

    /// Keep compressed files as stored
    #[arg(long, default_value_t = false)]
    raw: bool,
}

impl LoadArgs {
    pub fn load(&self) -> Result<FileSystem> {
        let rom = std::fs::read(&self.file)
            .into_diagnostic()
            .context(format!("path: {}", &self.file.display()))?;
        info!("loading {}", self.file.display());

        let options = FileSystemOptions::builder()
            .maybe_workers(self.workers)
            .expand_archives(!self.no_expand)
            .decompress(!self.raw)
            .build();
        Ok(FileSystem::with_options(rom, options)?)
    }
}

/// Location of a node below `directory`.
///
/// Files of a nested archive go into a directory named after the archive with a `.d` suffix,
/// next to the archive itself.
pub fn target_path(fs: &FileSystem, node: &FileSystemObject, directory: &Path) -> PathBuf {
    match node.parent.and_then(|parent| fs.get(parent).ok()) {
        Some(parent) if parent.is_file() => directory
            .join(format!("{}.d", parent.path))
            .join(&node.name),
        _ => directory.join(&node.path),
    }
}
