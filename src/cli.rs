use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Declarative host configuration - compile, plan, apply", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check that the manifest compiles with all dependencies satisfiable
    Check(InputArgs),

    /// Preview what apply would change, without touching the host
    Plan(PlanArgs),

    /// Converge the host to the declared state
    Apply(ApplyArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Inputs shared by every command: the manifest plus facts and parameters
#[derive(Args)]
pub struct InputArgs {
    /// Manifest file declaring desired resources
    #[arg(short, long, default_value = "converge.toml")]
    pub manifest: PathBuf,

    /// Facts file (TOML table of scalars) describing this host
    #[arg(long)]
    pub facts: Option<PathBuf>,

    /// Parameters as KEY=VALUE; shadow facts during interpolation
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Parallel jobs for independent resources
    #[arg(short, long, default_value_t = 4)]
    pub jobs: usize,

    /// Per-operation timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Parallel jobs for independent resources
    #[arg(short, long, default_value_t = 4)]
    pub jobs: usize,

    /// Per-operation timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Don't make changes, just show what would happen
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the run report as JSON instead of the human summary
    #[arg(long)]
    pub json: bool,

    /// Cache compiled catalogs in this directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}
