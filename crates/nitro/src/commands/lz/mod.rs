use std::{fs::File, io::Write, path::Path};

use clap::ValueEnum;
use miette::{Context, IntoDiagnostic, Result};
use nitro_fs::CompressionKind;

pub mod pack;
pub mod unpack;

#[derive(clap::Subcommand)]
pub enum LzCommands {
    /// Decompress a file
    Unpack(unpack::UnpackArgs),
    /// Compress a file
    Pack(pack::PackArgs),
}

impl LzCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            LzCommands::Unpack(unpack) => unpack.handle(),
            LzCommands::Pack(pack) => pack.handle(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    Lz77,
    Lz11,
    Rle,
    /// Backwards LZ of boot binaries and overlays
    Blz,
}

impl From<Kind> for CompressionKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Lz77 => CompressionKind::Lz77,
            Kind::Lz11 => CompressionKind::Lz11,
            Kind::Rle => CompressionKind::Rle,
            Kind::Blz => CompressionKind::Blz,
        }
    }
}

pub fn write_output(path: &Path, data: &[u8], overwrite: bool) -> Result<()> {
    let mut out = if !overwrite {
        File::create_new(path)
            .into_diagnostic()
            .context(format!("creating {}", path.display()))?
    } else {
        File::create(path)
            .into_diagnostic()
            .context(format!("creating {}", path.display()))?
    };
    out.write_all(data).into_diagnostic()
}
