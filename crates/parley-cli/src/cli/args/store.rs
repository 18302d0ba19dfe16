use super::run::DEFAULT_DB;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Clone)]
pub struct StoreArgs {
    #[arg(long, env = "PARLEY_DB", default_value = DEFAULT_DB, global = true)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub cmd: StoreSub,
}

#[derive(Subcommand, Clone)]
pub enum StoreSub {
    /// Most recent runs first
    ListRuns {
        #[arg(long, default_value_t = 20)]
        max_items: usize,
    },
    ListTests {
        #[arg(long)]
        run_id: i64,
        #[arg(long, default_value_t = 100)]
        max_items: usize,
    },
    DescribeRun {
        #[arg(long)]
        run_id: i64,
    },
    DescribeTest {
        #[arg(long)]
        run_id: i64,
        #[arg(long)]
        test_name: String,
    },
}
