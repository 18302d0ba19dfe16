use crate::cli::args::{StoreArgs, StoreSub};
use crate::exit_codes::{NO_RECORD_FOUND, SUCCESS};
use parley_core::errors::NoRecordFound;
use parley_core::storage::Store;
use serde_json::Value;

pub fn run(args: StoreArgs) -> anyhow::Result<i32> {
    let store = Store::open(&args.db)?;
    store.init_schema()?;

    let found = match args.cmd {
        StoreSub::ListRuns { max_items } => store.list_runs(max_items).and_then(to_json),
        StoreSub::ListTests { run_id, max_items } => {
            store.list_tests(run_id, max_items).and_then(to_json)
        }
        StoreSub::DescribeRun { run_id } => store.describe_run(run_id).and_then(to_json),
        StoreSub::DescribeTest { run_id, test_name } => {
            store.describe_test(run_id, &test_name).and_then(to_json)
        }
    };

    match found {
        Ok(json) => {
            println!("{}", serde_json::to_string_pretty(&json)?);
            Ok(SUCCESS)
        }
        Err(e) if e.is::<NoRecordFound>() => {
            eprintln!("{}", e);
            Ok(NO_RECORD_FOUND)
        }
        Err(e) => Err(e),
    }
}

fn to_json<T: serde::Serialize>(value: T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}
