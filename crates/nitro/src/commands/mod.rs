pub mod lz;
pub mod rom;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle ROM images
    Rom {
        #[command(subcommand)]
        command: rom::RomCommands,
    },
    /// Handle compressed streams
    Lz {
        #[command(subcommand)]
        command: lz::LzCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Rom { command } => command.handle(),
            Commands::Lz { command } => command.handle(),
        }
    }
}
