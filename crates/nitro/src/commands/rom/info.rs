use clap::Args;
use itertools::Itertools;
use miette::Result;
use nitro_fs::{Processor, ResourceKind, RomHeader};
use owo_colors::OwoColorize;

use super::LoadArgs;

#[derive(Args)]
pub struct InfoArgs {
    #[command(flatten)]
    load: LoadArgs,
}

impl InfoArgs {
    pub fn handle(&self) -> Result<()> {
        let fs = self.load.load()?;
        let header = RomHeader::parse(fs.rom())?;

        println!("{}", header.title().bold());
        println!("game code:  {}", header.game_code());
        println!("maker code: {}", header.maker_code());
        let crc = if header.verify_crc(fs.rom()) {
            format!("{:#06x}", header.header_crc).green().to_string()
        } else {
            format!(
                "{:#06x} (expected {:#06x})",
                header.header_crc,
                RomHeader::compute_crc(fs.rom())
            )
            .red()
            .to_string()
        };
        println!("header crc: {crc}");
        println!();

        println!(
            "{} folders, {} files, {} recognised",
            fs.folder_count(),
            fs.file_count(),
            fs.supported_files()
        );
        let kinds = fs
            .archive()
            .objects()
            .iter()
            .map(|object| object.info.kind())
            .filter(|kind| *kind != ResourceKind::Buffer)
            .counts();
        for (kind, count) in kinds.into_iter().sorted_by_key(|(kind, _)| format!("{kind:?}")) {
            println!("  {kind:?}: {count}");
        }

        for processor in [Processor::Arm9, Processor::Arm7] {
            let overlays = fs.overlays(processor)?;
            if overlays.is_empty() {
                continue;
            }
            println!();
            println!("{processor:?} overlays:");
            for entry in overlays {
                println!(
                    "  {:>3} file {:>4} at {:#010x}, {:#x} bytes{}",
                    entry.id,
                    entry.file_id,
                    entry.ram_address,
                    entry.ram_size,
                    if entry.is_compressed() {
                        " (compressed)"
                    } else {
                        ""
                    }
                );
            }
        }
        Ok(())
    }
}
