//! Storyreel CLI: export narrated scene manifests to MP4.
//!
//! Usage:
//!   storyreel export <MANIFEST>     Render a manifest to an MP4 file
//!   storyreel validate <MANIFEST>   Check a manifest without fetching media
//!   storyreel inspect <FILE>        Summarize an MP4 container
//!   storyreel check                 Report runtime encoding capabilities
//!   storyreel init <NAME>           Write a sample manifest

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use storyreel_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "storyreel",
    about = "Turn narrated scenes into shareable MP4 videos",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/storyreel/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a scene manifest to MP4
    Export {
        /// Path to the manifest JSON
        manifest: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Aspect preset overriding the manifest: landscape|portrait|square
        #[arg(long)]
        format: Option<String>,

        /// Frame rate overriding the manifest and config
        #[arg(long)]
        fps: Option<u32>,

        /// Directory that receives a copy under the manifest's storage key
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Render with the synthetic encoders and write nothing
        #[arg(long)]
        dry_run: bool,

        /// Print the export report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a scene manifest
    Validate {
        /// Path to the manifest JSON
        manifest: PathBuf,
    },

    /// Summarize the tracks of an MP4 file
    Inspect {
        /// Path to the MP4 file
        file: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check runtime encoding capabilities
    Check,

    /// Create a sample manifest
    Init {
        /// Project title
        name: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Aspect preset: landscape|portrait|square
        #[arg(long, default_value = "landscape")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    storyreel_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Export {
            manifest,
            output,
            format,
            fps,
            store_dir,
            dry_run,
            json,
        } => {
            commands::export::run(
                &config,
                commands::export::ExportArgs {
                    manifest,
                    output,
                    format,
                    fps,
                    store_dir,
                    dry_run,
                    json,
                },
            )
            .await
        }
        Commands::Validate { manifest } => commands::validate::run(manifest),
        Commands::Inspect { file, json } => commands::inspect::run(file, json),
        Commands::Check => commands::check::run(&config),
        Commands::Init {
            name,
            output,
            format,
        } => commands::init::run(name, output, format),
    }
}
