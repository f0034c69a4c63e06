use std::collections::{BTreeSet, HashMap};
use std::{fs::File, io::Write, path::PathBuf};

use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::{target_path, LoadArgs};

#[derive(Args)]
pub struct ImportArgs {
    #[command(flatten)]
    load: LoadArgs,

    /// A directory laid out like the output of `extract`
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target ROM image
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ImportArgs {
    pub fn handle(&self) -> Result<()> {
        let mut fs = self.load.load()?;

        let nodes: HashMap<PathBuf, usize> = fs
            .traverse(0, false, true)?
            .into_iter()
            .map(|node| (target_path(&fs, node, &self.directory), node.index))
            .collect();

        let files = WalkDir::new(&self.directory)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .collect::<Vec<_>>();

        if files.is_empty() {
            return Err(miette!("directory is empty"));
        }

        // nested files are committed before the archive holding them
        let mut changed = BTreeSet::new();
        for file in files {
            let Some(&index) = nodes.get(file.path()) else {
                warn!("{} is not part of the ROM", file.path().display());
                continue;
            };

            let edited = std::fs::read(file.path())
                .into_diagnostic()
                .context(format!("reading {}", file.path().display()))?;
            let data = fs.data_mut(index)?;
            if data == &edited[..] {
                continue;
            }
            if data.len() != edited.len() {
                warn!(
                    "{} has {} bytes instead of {}, skipping",
                    file.path().display(),
                    edited.len(),
                    data.len()
                );
                continue;
            }

            data.copy_from_slice(&edited);
            info!("importing {}", file.path().display());
            changed.insert(std::cmp::Reverse(index));

            let mut node = fs.get(index)?;
            while let Some(parent) = node.parent.map(|parent| fs.get(parent)).transpose()? {
                if !parent.is_file() {
                    break;
                }
                changed.insert(std::cmp::Reverse(parent.index));
                node = parent;
            }
        }

        for std::cmp::Reverse(index) in changed.iter().copied() {
            let size = fs.commit(index)?;
            info!("committed /{} ({size} bytes)", fs.get(index)?.path);
        }

        let mut out = if !self.overwrite {
            File::create_new(&self.output)
                .into_diagnostic()
                .context(format!("creating {}", &self.output.display()))?
        } else {
            File::create(&self.output)
                .into_diagnostic()
                .context(format!("creating {}", &self.output.display()))?
        };
        out.write_all(fs.rom()).into_diagnostic()?;

        info!("imported {} files", changed.len());
        Ok(())
    }
}
