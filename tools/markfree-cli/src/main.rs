//! MarkFree CLI: blur fixed regions of a video and re-encode it.
//!
//! Usage:
//!   markfree process <INPUT>    Blur regions and write the re-encoded video
//!   markfree check              Report encoder and container support
//!   markfree presets [--save]   Print (and optionally write) the region presets

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use markfree_media_model::region::Region;

mod commands;

#[derive(Parser)]
#[command(
    name = "markfree",
    about = "Blur fixed screen regions of a video in real time",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a video, blur regions on every frame, and save the result
    Process {
        /// Input video file
        input: PathBuf,

        /// Output file (defaults to the suggested name next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON file holding an array of {x, y, width, height} regions
        #[arg(long, conflicts_with = "region")]
        regions: Option<PathBuf>,

        /// Region to blur as x,y,w,h (repeatable)
        #[arg(long, value_name = "X,Y,W,H", allow_hyphen_values = true)]
        region: Vec<Region>,

        /// Blur radius in pixels
        #[arg(long)]
        blur_radius: Option<u32>,

        /// Number of blur passes per region
        #[arg(long)]
        blur_passes: Option<u32>,
    },

    /// Check encoder and container support
    Check {
        /// Also run a short end-to-end job on synthetic media
        #[arg(long)]
        synthetic: bool,
    },

    /// Print the region presets in effect
    Presets {
        /// Write the effective configuration to the config file for editing
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = markfree_common::config::AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    markfree_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Process {
            input,
            output,
            regions,
            region,
            blur_radius,
            blur_passes,
        } => {
            commands::process::run(
                &config,
                input,
                output,
                regions,
                region,
                blur_radius,
                blur_passes,
            )
            .await
        }
        Commands::Check { synthetic } => commands::check::run(&config, synthetic).await,
        Commands::Presets { save } => commands::presets::run(&config, save),
    }
}
