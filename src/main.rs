// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-pipeline")]
#[command(about = "Adaptive camera capture pipeline")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture photos from a still image standing in for a camera
    Photo {
        /// Image served by the still-image backend
        #[arg(short, long)]
        input: PathBuf,

        /// Number of captures to request at once
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Output format (jpg or png)
        #[arg(short, long, default_value = "jpg")]
        format: String,

        /// Output directory (default: ~/Pictures/camera)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Orientation metadata reported with each capture, in degrees
        #[arg(long)]
        orientation: Option<i32>,

        /// Use the front lens (mirrors output)
        #[arg(long)]
        front: bool,
    },

    /// Show the current memory pressure reading
    Memory,

    /// Show or create the pipeline settings file
    Settings {
        /// Settings file (default: ~/.config/camera-pipeline/settings.json)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Write the effective settings back to the file
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_pipeline=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Photo {
            input,
            count,
            format,
            output,
            orientation,
            front,
        } => cli::take_photos(cli::PhotoArgs {
            input,
            count,
            format,
            output,
            orientation,
            front,
        }),
        Commands::Memory => cli::show_memory(),
        Commands::Settings { path, write } => cli::show_settings(path, write),
    }
}
