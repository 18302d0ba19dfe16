use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_DB: &str = ".parley/parley.db";

#[derive(Parser, Clone)]
pub struct RunArgs {
    /// Directory containing parley.yml
    #[arg(long, default_value = ".")]
    pub plan_dir: PathBuf,

    /// Comma-separated test names to run
    #[arg(long)]
    pub filter: Option<String>,

    /// Concurrent tests (default: one per test, at most 45)
    #[arg(long)]
    pub num_threads: Option<usize>,

    /// Where traces and the summary go (default: the plan dir)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Cancel the remaining tests after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Per-test wall-clock limit
    #[arg(long)]
    pub test_timeout_secs: Option<u64>,

    #[arg(long, env = "PARLEY_DB", default_value = DEFAULT_DB)]
    pub db: PathBuf,

    /// Don't record the run in the store
    #[arg(long)]
    pub no_store: bool,
}
