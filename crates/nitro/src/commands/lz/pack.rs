use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use nitro_fs::compression;
use std::path::PathBuf;
use tracing::info;

use super::{write_output, Kind};

#[derive(Args)]
pub struct PackArgs {
    /// An input file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Format to encode with
    #[arg(short, long, value_enum, default_value_t = Kind::Lz77)]
    kind: Kind,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl PackArgs {
    pub fn handle(&self) -> Result<()> {
        let input = std::fs::read(&self.file)
            .into_diagnostic()
            .context(format!("path: {}", &self.file.display()))?;

        let data = compression::compress(self.kind.into(), &input)?;
        info!(
            "{:?}: {} bytes to {} bytes",
            self.kind,
            input.len(),
            data.len()
        );

        write_output(&self.output, &data, self.overwrite)
    }
}
