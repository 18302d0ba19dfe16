use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod run;
pub mod store;
pub use run::*;
pub use store::*;

#[derive(Parser)]
#[command(
    name = "parley",
    version,
    about = "Judge-driven conversation tests for AI agents"
)]
pub struct Cli {
    /// Debug logging (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a sample parley.yml
    Init(InitArgs),
    /// Run the tests in a plan
    Run(RunArgs),
    /// Query stored runs
    Store(StoreArgs),
    Version,
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = ".")]
    pub plan_dir: PathBuf,
}
