use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use nitro_fs::compression;
use std::path::PathBuf;
use tracing::info;

use super::{write_output, Kind};

#[derive(Args)]
pub struct UnpackArgs {
    /// A compressed input file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Decode as this format instead of detecting it from the header
    #[arg(short, long, value_enum)]
    kind: Option<Kind>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl UnpackArgs {
    pub fn handle(&self) -> Result<()> {
        let input = std::fs::read(&self.file)
            .into_diagnostic()
            .context(format!("path: {}", &self.file.display()))?;

        let kind = match self.kind {
            Some(kind) => kind.into(),
            None => compression::sniff(&input),
        };
        let data = compression::decompress_as(kind, &input)?;
        info!(
            "{kind:?}: {} bytes to {} bytes",
            input.len(),
            data.len()
        );

        write_output(&self.output, &data, self.overwrite)
    }
}
