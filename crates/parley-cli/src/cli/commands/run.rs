use crate::cli::args::RunArgs;
use crate::exit_codes::{SUCCESS, TESTS_FAILED};
use anyhow::Context;
use parley_core::config::Plan;
use parley_core::providers::target::TargetRegistry;
use parley_core::report::console::{default_progress_sink, print_summary};
use parley_core::report::summary::write_summary;
use parley_core::storage::{RunStore, Store};
use parley_core::trace::JsonFileTraceSink;
use parley_core::{EvaluatorFactory, RunOptions, Runner};
use std::sync::Arc;
use std::time::Duration;

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let plan = Plan::load(&args.plan_dir)?;
    let suite = plan.test_suite(args.filter.as_deref())?;
    let judge = plan.judge()?;
    let targets = plan.target_factory(&TargetRegistry::with_builtins())?;
    tracing::info!(
        tests = suite.len(),
        judge = judge.provider_name(),
        plan = %plan.path.display(),
        "starting run"
    );

    let work_dir = args.work_dir.clone().unwrap_or_else(|| args.plan_dir.clone());
    let traces = Arc::new(JsonFileTraceSink::new(work_dir.join(JsonFileTraceSink::DEFAULT_DIR)));

    let options = RunOptions {
        concurrency: args.num_threads,
        fail_fast: args.fail_fast,
        test_timeout: args.test_timeout_secs.map(Duration::from_secs),
    };
    let runner = Runner::new(EvaluatorFactory::new(judge, traces), targets)
        .with_options(options)
        .with_progress(default_progress_sink(suite.len()));

    let outcome = runner.run(&suite).await?;
    let passed = outcome.passed();
    let run = outcome.into_run(&suite);

    print_summary(&run);
    let summary = write_summary(&run, &work_dir)?;
    eprintln!("Summary written to {}", summary.display());

    if !args.no_store {
        let store = Store::open(&args.db)?;
        store.init_schema()?;
        let id = store
            .save_run(&run)
            .with_context(|| format!("failed to save run to {}", args.db.display()))?;
        eprintln!("Saved as run #{}", id);
    }

    Ok(if passed { SUCCESS } else { TESTS_FAILED })
}
