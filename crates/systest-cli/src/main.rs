//! systest command line.
//!
//! Drives the multi-version cluster harness outside of `cargo test`.
//!
//! # Quick Start
//!
//! ```bash
//! # Check that data written by v1.0.2 reads back with ./bin/dgraph
//! systest compat --from-version v1.0.2
//!
//! # Build a release into the user cache
//! systest provision v1.0.2
//!
//! # Run a local cluster until Ctrl+C
//! systest cluster up --data-dir ./scratch
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// systest - multi-version cluster harness and upgrade compatibility checks.
#[derive(Parser)]
#[command(name = "systest")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding systest.toml.
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Extra configuration file layered over the project files.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write data with an old release and read it back with the current binaries.
    Compat {
        /// Release tag to write the data with.
        #[arg(long)]
        from_version: Option<String>,

        /// Data directory shared by both clusters (temporary if omitted).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Build root for the old release (temporary if omitted).
        #[arg(long)]
        build_root: Option<PathBuf>,

        /// Keep temporary directories after the run.
        #[arg(long)]
        keep_dirs: bool,

        /// JSON fixture replacing the built-in one.
        #[arg(long)]
        fixture: Option<PathBuf>,
    },

    /// Fetch and build a release tag.
    Provision {
        /// Release tag to build.
        tag: String,

        /// Build root (defaults to the user cache).
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Local cluster commands.
    #[command(subcommand)]
    Cluster(ClusterCommands),

    /// Print the effective configuration.
    Config {
        /// Output format (toml, json).
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
}

#[derive(Subcommand)]
enum ClusterCommands {
    /// Start a coordinator and a server and keep them running until Ctrl+C.
    Up {
        /// Data directory for the cluster.
        #[arg(long)]
        data_dir: PathBuf,

        /// Run a provisioned release tag instead of the current binaries.
        #[arg(long)]
        release: Option<String>,

        /// Build root for --release (defaults to the user cache).
        #[arg(long, requires = "release")]
        root: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(&cli.project, cli.config.as_deref())?;

    match cli.command {
        Commands::Compat {
            from_version,
            data_dir,
            build_root,
            keep_dirs,
            fixture,
        } => commands::compat::run(
            config,
            commands::compat::Overrides {
                from_version,
                data_dir,
                build_root,
                keep_dirs,
                fixture,
            },
        ),
        Commands::Provision { tag, root } => commands::provision::run(&config, &tag, root),
        Commands::Cluster(cmd) => match cmd {
            ClusterCommands::Up {
                data_dir,
                release,
                root,
            } => commands::cluster::up(&config, data_dir, release, root),
        },
        Commands::Config { format } => commands::config::show(&config, &format),
    }
}
