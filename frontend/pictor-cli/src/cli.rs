use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "pictor", about = "Pictor image service CLI")]
pub struct Cli {
    #[arg(long, default_value = "config/pictor.xml")]
    pub config: String,

    #[arg(long, default_value = "cache")]
    pub cache_dir: String,

    /// Fail on missing config sources instead of skipping them.
    #[arg(long)]
    pub strict_sources: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print a single configuration value.
    Get {
        key: String,

        /// Raw fallback, coerced the same way parsed values are.
        #[arg(long)]
        default: Option<String>,
    },
    /// Print the whole flattened configuration as JSON.
    Dump,
    /// Produce (or reuse) a resized derivative of an archive image.
    Resize { filename: String, size: String },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
