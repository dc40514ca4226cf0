//! Command line arguments for the master binary
use clap::Parser;

/// The dlrover master control plane
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
    /// Path to the master's YAML config file
    #[clap(short, long, default_value = "master.yml")]
    pub config: String,
    /// Run with a dry-run scheduler binding instead of a real cluster
    #[clap(long)]
    pub dry_run: bool,
}
