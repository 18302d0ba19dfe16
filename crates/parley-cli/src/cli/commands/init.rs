use crate::cli::args::InitArgs;
use crate::exit_codes::{PLAN_EXISTS, SUCCESS};
use parley_core::config::Plan;
use parley_core::ConfigError;

pub fn run(args: InitArgs) -> anyhow::Result<i32> {
    match Plan::init(&args.plan_dir) {
        Ok(path) => {
            eprintln!("Created {}", path.display());
            Ok(SUCCESS)
        }
        Err(ConfigError::PlanExists(path)) => {
            eprintln!("Plan already exists at {}; not overwriting.", path);
            Ok(PLAN_EXISTS)
        }
        Err(e) => Err(e.into()),
    }
}
