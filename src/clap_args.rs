use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Drives object, pool and block IO against a Ceph cluster", long_about = None)]
pub struct Args {
    /// Verbose mode (-v, --verbose), forces debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the workloads enabled in a config file
    Run {
        /// Path to the config file (.toml, or .json for the legacy layout)
        #[arg(short, long, default_value = "instant-io.toml")]
        config: PathBuf,

        /// Overrides `output_dir` from the config
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Validate the config and print what would be done, without touching the cluster
        #[arg(long)]
        dry_run: bool,
    },

    /// Write an example config file
    Init {
        #[arg(default_value = "instant-io.toml")]
        path: PathBuf,
    },
}

pub fn parse() -> Args {
    Args::parse()
}
