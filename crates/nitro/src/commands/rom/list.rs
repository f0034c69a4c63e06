use clap::Args;
use miette::Result;
use nitro_fs::{CompressionKind, ResourceKind};
use owo_colors::OwoColorize;

use super::LoadArgs;

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    load: LoadArgs,

    /// Only list below this folder or archive
    #[arg(short, long, value_name = "PATH")]
    path: Option<String>,

    /// Also list folders
    #[arg(long, default_value_t = false)]
    folders: bool,
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let fs = self.load.load()?;
        let start = match &self.path {
            Some(path) => fs.find(path)?.index,
            None => 0,
        };

        for node in fs.traverse(start, self.folders, true)? {
            if !node.is_file() {
                println!("{}/", node.path.blue());
                continue;
            }

            let object = fs.object(node.index)?;
            let tag = object.info.tag();
            let tag = if object.info.kind() == ResourceKind::Buffer {
                tag.dimmed().to_string()
            } else {
                tag.green().to_string()
            };
            let compression = match object.compression {
                CompressionKind::None => String::new(),
                kind => format!(" {kind:?}").yellow().to_string(),
            };
            let children = if node.files > 0 {
                format!(" [{} files]", node.files)
            } else {
                String::new()
            };

            println!(
                "{:>8} {} {}{}{}",
                object.len,
                tag,
                node.path,
                compression,
                children
            );
        }
        Ok(())
    }
}
