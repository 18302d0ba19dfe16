use chrono::{Duration, Utc};
use parley_core::errors::NoRecordFound;
use parley_core::model::{Run, Test, TestResult, TokenUsage};
use parley_core::storage::{RunStore, Store};
use parley_core::Conversation;
use std::collections::BTreeMap;

fn sample_run(offset_secs: i64) -> Run {
    let start = Utc::now() + Duration::seconds(offset_secs);
    let tests = vec![
        Test::new("balance", vec!["Ask for the balance.".into()], vec!["A balance.".into()])
            .with_initial_prompt("What's my balance?")
            .with_hook("transcript"),
        Test::new("refund", vec!["Ask for a refund.".into()], vec!["Refund issued.".into()])
            .with_max_turns(3),
    ];
    let mut conversation = Conversation::new();
    conversation.add_turn("What's my balance?", "$10");
    let mut results = BTreeMap::new();
    results.insert(
        "balance".to_string(),
        TestResult {
            test_name: "balance".into(),
            passed: true,
            result: "All of the expected results can be observed in the conversation.".into(),
            reasoning: "balance shown".into(),
            conversation,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 10,
            },
            error: None,
            start_time: start,
            end_time: start + Duration::seconds(1),
        },
    );
    results.insert(
        "refund".to_string(),
        TestResult::errored(
            "refund",
            "timed out after 30s",
            Conversation::new(),
            TokenUsage {
                input_tokens: 5,
                output_tokens: 1,
            },
            start,
        ),
    );
    Run {
        start_time: start,
        end_time: start + Duration::seconds(2),
        tests,
        results,
    }
}

fn store() -> Store {
    let store = Store::memory().unwrap();
    store.init_schema().unwrap();
    store
}

#[test]
fn saved_run_can_be_described() {
    let store = store();
    let id = store.save_run(&sample_run(0)).unwrap();

    let desc = store.describe_run(id).unwrap();
    assert_eq!(desc.num_tests, 2);
    assert_eq!(desc.pass_count, 1);
    assert_eq!(desc.pass_rate, 50.0);
    assert_eq!(desc.usage.input_tokens, 105);
    assert_eq!(desc.usage.output_tokens, 11);

    let tests = store.list_tests(id, 10).unwrap();
    let names: Vec<_> = tests.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["balance", "refund"]);
    assert!(tests[0].passed);
}

#[test]
fn test_details_survive_the_round_trip() {
    let store = store();
    let run = sample_run(0);
    let id = store.save_run(&run).unwrap();

    let balance = store.describe_test(id, "balance").unwrap();
    assert_eq!(balance.test, run.tests[0]);
    assert_eq!(balance.result.conversation, run.results["balance"].conversation);
    assert_eq!(balance.result.reasoning, "balance shown");

    let refund = store.describe_test(id, "refund").unwrap();
    assert_eq!(refund.test.max_turns, 3);
    assert_eq!(refund.result.error.as_deref(), Some("timed out after 30s"));
    assert!(!refund.result.passed);
}

#[test]
fn runs_are_listed_newest_first_and_limited() {
    let store = store();
    let older = store.save_run(&sample_run(-60)).unwrap();
    let newer = store.save_run(&sample_run(0)).unwrap();

    let runs = store.list_runs(10).unwrap();
    let ids: Vec<_> = runs.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![newer, older]);
    assert_eq!(store.list_runs(1).unwrap().len(), 1);
}

#[test]
fn missing_records_are_reported() {
    let store = store();
    let id = store.save_run(&sample_run(0)).unwrap();
    assert!(store.describe_test(id, "nope").unwrap_err().is::<NoRecordFound>());
    assert!(store.list_tests(id + 1, 10).unwrap_err().is::<NoRecordFound>());
    assert!(store.describe_run(id + 1).unwrap_err().is::<NoRecordFound>());
}
