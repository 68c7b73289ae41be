use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::host::PackageManager;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Configuration of the Holland installation. A default one is written if
    /// the file doesn't exist.
    #[arg(
        long,
        short = 'c',
        env = "HOLLAND_CONVERGE_CONFIG",
        default_value = "/etc/holland-converge.toml"
    )]
    pub config: PathBuf,

    /// Root of the system to converge, e.g. a chroot.
    #[arg(long, default_value = "/")]
    pub root: PathBuf,

    /// Package manager to use instead of the configured one.
    #[arg(long)]
    pub package_manager: Option<PackageManager>,

    /// Only report what would be changed.
    #[arg(long)]
    pub dry_run: bool,

    /// Keep converging resources that don't depend on a failed one.
    #[arg(long)]
    pub keep_going: bool,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Lock file serializing runs.
    #[arg(long, default_value = "/run/holland-converge.lock")]
    pub lock_file: PathBuf,

    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Subcommand, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Converge the system to the configuration. (Default)
    #[default]
    Apply,
    /// Print the resources in the order they would be converged.
    Plan,
}
