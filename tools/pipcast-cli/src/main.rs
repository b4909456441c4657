//! PipCast CLI: record picture-in-picture presentations and convert recordings.
//!
//! Usage:
//!   pipcast record [OPTIONS]       Record display + camera until Ctrl+C
//!   pipcast transcode <INPUT>      Convert a WebM recording to MP4
//!   pipcast check [--write-config] Check encoder and capture availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pipcast_common::config::{config_file_path, AppConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "pipcast",
    about = "Screen recording with a live camera overlay",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of the standard location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the display with the camera composited on top
    Record {
        /// Output directory (defaults to the configured recordings directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Delivery format: native (webm) or alternate (mp4)
        #[arg(long)]
        delivery: Option<String>,

        /// Composite width
        #[arg(long)]
        width: Option<u32>,

        /// Composite height
        #[arg(long)]
        height: Option<u32>,

        /// Overlay rectangle as x,y,width,height
        #[arg(long)]
        overlay: Option<String>,

        /// Do not mirror the camera overlay
        #[arg(long)]
        no_mirror: bool,

        /// Disable microphone capture
        #[arg(long)]
        no_mic: bool,

        /// Use generated test patterns instead of real devices
        #[arg(long)]
        synthetic: bool,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Convert a WebM recording to MP4
    Transcode {
        /// WebM file to convert
        input: PathBuf,

        /// Output directory (defaults to the input's directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check encoder, capture and transcoder availability
    Check {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write_config: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    pipcast_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Record {
            output,
            delivery,
            width,
            height,
            overlay,
            no_mirror,
            no_mic,
            synthetic,
            duration,
        } => {
            commands::record::run(
                &config,
                commands::record::RecordOptions {
                    output,
                    delivery,
                    width,
                    height,
                    overlay,
                    mirror: !no_mirror,
                    microphone: !no_mic,
                    synthetic,
                    duration,
                },
            )
            .await
        }
        Commands::Transcode { input, output } => {
            commands::transcode::run(&config, input, output).await
        }
        Commands::Check { write_config } => {
            let target = write_config.then(|| cli.config.clone().unwrap_or_else(config_file_path));
            commands::check::run(&config, target).await
        }
    }
}
