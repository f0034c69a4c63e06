use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use std::{fs::File, io::Write, path::PathBuf};
use tracing::info;

use super::{target_path, LoadArgs};

#[derive(Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    load: LoadArgs,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Write files as stored instead of decoded
    #[arg(long, default_value_t = false)]
    stored: bool,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let fs = self.load.load()?;

        let mut written = 0;
        for node in fs.traverse(0, false, true)? {
            let p = target_path(&fs, node, &self.directory);
            info!("writing {}", p.display());

            let parent = p
                .parent()
                .ok_or_else(|| miette!("{} has no parent directory", p.display()))?;
            std::fs::create_dir_all(parent)
                .into_diagnostic()
                .context(format!("creating {}", parent.display()))?;

            let mut out = if !self.overwrite {
                File::create_new(&p)
                    .into_diagnostic()
                    .context(format!("creating {}", &p.display()))?
            } else {
                File::create(&p)
                    .into_diagnostic()
                    .context(format!("creating {}", &p.display()))?
            };

            let data = if self.stored {
                fs.stored(node.index)?
            } else {
                fs.data(node.index)?
            };
            out.write_all(data).into_diagnostic()?;
            written += 1;
        }

        info!("extracted {written} files");
        Ok(())
    }
}
