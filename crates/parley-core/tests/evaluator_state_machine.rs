//! Conversation loop behavior against scripted judge and target.

use async_trait::async_trait;
use parley_core::evaluator::category::{ALL_OBSERVED, MAX_TURNS_REACHED, NOT_ALL_OBSERVED};
use parley_core::evaluator::{EvaluatorFactory, Hook, HookRegistry, RunLimits};
use parley_core::model::{Test, TestResult};
use parley_core::providers::llm::scripted::{reply, ScriptedJudge};
use parley_core::providers::target::{ScriptedTarget, Target};
use parley_core::templates::Template;
use parley_core::trace::{MemoryTraceSink, TraceRecorder};
use parley_core::errors::ProviderError;
use parley_core::providers::target::TargetResponse;
use parley_core::Role;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn test(name: &str) -> Test {
    Test::new(
        name,
        vec!["Ask for the balance of account 42.".into()],
        vec!["The agent returns a balance.".into()],
    )
}

fn status(letter: &str) -> String {
    reply("category", letter, "checked the steps")
}

struct Harness {
    judge: Arc<ScriptedJudge>,
    sink: Arc<MemoryTraceSink>,
    factory: EvaluatorFactory,
}

fn harness(judge: ScriptedJudge) -> Harness {
    harness_with_hooks(judge, HookRegistry::with_builtins())
}

fn harness_with_hooks(judge: ScriptedJudge, hooks: HookRegistry) -> Harness {
    let judge = Arc::new(judge);
    let sink = Arc::new(MemoryTraceSink::default());
    let factory = EvaluatorFactory::new(judge.clone(), sink.clone()).with_hooks(hooks);
    Harness {
        judge,
        sink,
        factory,
    }
}

fn target(replies: &[&str]) -> Box<dyn Target> {
    Box::new(ScriptedTarget::with_replies(replies.iter().copied()))
}

#[tokio::test]
async fn terminates_when_all_steps_attempted() {
    let h = harness(
        ScriptedJudge::passing()
            .on_template(Template::GenerateEvaluation, [reply("category", "A", "balance shown")]),
    );
    let t = test("balance");
    let result = h
        .factory
        .create(&t, target(&["Your balance is $10."]))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(result.passed);
    assert_eq!(result.result, ALL_OBSERVED);
    assert_eq!(result.reasoning, "balance shown");
    assert_eq!(result.turns(), 1);
    assert!(result.error.is_none());
    assert_eq!(h.judge.calls_for(Template::GenerateUserResponse), 0);
    assert_eq!(h.judge.calls_for(Template::GenerateEvaluation), 1);
}

#[tokio::test]
async fn continues_until_status_turns_terminal() {
    let h = harness(
        ScriptedJudge::passing().on_template(Template::GenerateTestStatus, [status("B"), status("A")]),
    );
    let t = test("two-turns").with_max_turns(3);
    let result = h
        .factory
        .create(&t, target(&["Which account?", "Account 42 holds $10."]))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(result.passed);
    assert_eq!(result.turns(), 2);
    assert_eq!(h.judge.calls_for(Template::GenerateUserResponse), 1);
    let messages = result.conversation.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].role, Role::User);
    assert_eq!(messages[2].content, "Please continue.");
}

#[tokio::test]
async fn exhausting_turns_fails_without_grading() {
    let h = harness(ScriptedJudge::passing().on_template(Template::GenerateTestStatus, [status("B")]));
    let t = test("stuck");
    let result = h
        .factory
        .create(&t, target(&["Sorry?"]))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(!result.passed);
    assert_eq!(result.result, MAX_TURNS_REACHED);
    assert_eq!(result.reasoning, "");
    assert_eq!(result.turns(), 2);
    assert_eq!(h.judge.calls_for(Template::GenerateEvaluation), 0);
    // no follow-up is generated once the last turn is spent
    assert_eq!(h.judge.calls_for(Template::GenerateUserResponse), 1);
}

#[tokio::test]
async fn not_all_observed_fails() {
    let h = harness(
        ScriptedJudge::passing()
            .on_template(Template::GenerateEvaluation, [reply("category", "B", "no balance")]),
    );
    let result = h
        .factory
        .create(&test("missing"), target(&["I can't help."]))
        .unwrap()
        .run()
        .await
        .unwrap();
    assert!(!result.passed);
    assert_eq!(result.result, NOT_ALL_OBSERVED);
    assert_eq!(result.reasoning, "no balance");
}

#[tokio::test]
async fn initial_prompt_skips_the_judge() {
    let h = harness(ScriptedJudge::passing());
    let t = test("scripted-open").with_initial_prompt("What's my balance?");
    let result = h
        .factory
        .create(&t, target(&["$10"]))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(h.judge.calls_for(Template::GenerateInitialPrompt), 0);
    assert_eq!(result.conversation.messages()[0].content, "What's my balance?");
}

#[tokio::test]
async fn generated_initial_prompt_is_sent_to_target() {
    let h = harness(ScriptedJudge::passing().on_template(
        Template::GenerateInitialPrompt,
        [reply("initial_prompt", "Hi, what's the balance on 42?", "open")],
    ));
    let result = h
        .factory
        .create(&test("generated-open"), target(&["$10"]))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(h.judge.calls_for(Template::GenerateInitialPrompt), 1);
    assert_eq!(
        result.conversation.messages()[0].content,
        "Hi, what's the balance on 42?"
    );
}

#[tokio::test]
async fn unrecognized_status_keeps_talking_and_is_traced() {
    let h = harness(
        ScriptedJudge::passing()
            .on_template(Template::GenerateTestStatus, ["no tags here".to_string(), status("A")]),
    );
    let result = h
        .factory
        .create(&test("vague"), target(&["hm", "$10"]))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(result.passed);
    assert_eq!(result.turns(), 2);
    let traces = h.sink.find("vague");
    let first_status = traces[0]
        .steps
        .iter()
        .find(|s| s.step_name == "generate_test_status")
        .unwrap();
    assert_eq!(first_status.data["unrecognized"], json!(true));
}

#[tokio::test]
async fn judge_usage_is_summed() {
    let h = harness(ScriptedJudge::passing());
    let result = h
        .factory
        .create(&test("usage"), target(&["$10"]))
        .unwrap()
        .run()
        .await
        .unwrap();
    let expected: u64 = h
        .judge
        .calls()
        .iter()
        .map(|c| (c.system.split_whitespace().count() + c.prompt.split_whitespace().count()) as u64)
        .sum();
    assert_eq!(result.usage.input_tokens, expected);
    assert!(result.usage.output_tokens > 0);
}

#[tokio::test]
async fn trace_records_every_decision_in_order() {
    let h = harness(ScriptedJudge::passing());
    h.factory
        .create(&test("ordered"), target(&["$10"]))
        .unwrap()
        .run()
        .await
        .unwrap();

    let traces = h.sink.find("ordered");
    assert_eq!(traces.len(), 1);
    let names: Vec<_> = traces[0].steps.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "generate_initial_prompt",
            "invoke_target",
            "generate_test_status",
            "generate_evaluation"
        ]
    );
    let eval = &traces[0].steps[3].data;
    assert_eq!(eval["answer"], "A");
    assert!(eval["prompt"].as_str().unwrap().contains("The agent returns a balance."));
}

#[tokio::test]
async fn target_failure_errors_and_still_flushes_trace_once() {
    let h = harness(ScriptedJudge::passing());
    let err = h
        .factory
        .create(&test("broken"), Box::new(ScriptedTarget::failing("connection refused")))
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(err.to_string().contains("connection refused"));
    assert!(err.conversation.is_empty());
    assert!(err.usage.input_tokens > 0);
    let traces = h.sink.find("broken");
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].steps[0].step_name, "generate_initial_prompt");
}

#[tokio::test]
async fn missing_user_response_is_an_error() {
    let h = harness(
        ScriptedJudge::passing()
            .on_template(Template::GenerateTestStatus, [status("B")])
            .on_template(Template::GenerateUserResponse, ["<thinking>hmm</thinking>"]),
    );
    let err = h
        .factory
        .create(&test("mute"), target(&["?"]))
        .unwrap()
        .run()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("user_response"));
    assert_eq!(err.conversation.turns(), 1);
}

struct Override;

#[async_trait]
impl Hook for Override {
    async fn post_evaluate(
        &self,
        _test: &Test,
        result: &TestResult,
        trace: &mut TraceRecorder,
    ) -> anyhow::Result<Option<TestResult>> {
        trace.add_step("override", json!({ "was": result.passed }));
        Ok(Some(TestResult {
            passed: false,
            result: "overridden by hook".into(),
            ..result.clone()
        }))
    }
}

struct Refuse;

#[async_trait]
impl Hook for Refuse {
    async fn pre_evaluate(&self, _test: &Test, _trace: &mut TraceRecorder) -> anyhow::Result<()> {
        anyhow::bail!("fixture missing")
    }
}

#[tokio::test]
async fn post_hook_can_replace_the_result() {
    let mut hooks = HookRegistry::new();
    hooks.register("override", Arc::new(Override));
    let h = harness_with_hooks(ScriptedJudge::passing(), hooks);
    let result = h
        .factory
        .create(&test("hooked").with_hook("override"), target(&["$10"]))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(!result.passed);
    assert_eq!(result.result, "overridden by hook");
    let steps = &h.sink.find("hooked")[0].steps;
    assert_eq!(steps.last().unwrap().step_name, "override");
}

#[tokio::test]
async fn post_hook_returning_none_keeps_the_result() {
    let h = harness(ScriptedJudge::passing());
    let result = h
        .factory
        .create(&test("kept").with_hook("transcript"), target(&["$10"]))
        .unwrap()
        .run()
        .await
        .unwrap();
    assert!(result.passed);
    assert_eq!(result.result, ALL_OBSERVED);
    let steps = &h.sink.find("kept")[0].steps;
    assert_eq!(steps.last().unwrap().step_name, "transcript");
}

#[tokio::test]
async fn pre_hook_error_fails_the_test() {
    let mut hooks = HookRegistry::new();
    hooks.register("refuse", Arc::new(Refuse));
    let h = harness_with_hooks(ScriptedJudge::passing(), hooks);
    let err = h
        .factory
        .create(&test("refused").with_hook("refuse"), target(&["$10"]))
        .unwrap()
        .run()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("fixture missing"));
    assert!(h.judge.calls().is_empty());
}

#[test]
fn unknown_hook_is_rejected_when_creating() {
    let h = harness(ScriptedJudge::passing());
    assert!(h
        .factory
        .create(&test("x").with_hook("nope"), target(&["$10"]))
        .is_err());
}

/// Answers the first message, then never answers again.
struct StallsAfterFirstTurn {
    answered: bool,
}

#[async_trait]
impl Target for StallsAfterFirstTurn {
    async fn invoke(&mut self, _message: &str) -> Result<TargetResponse, ProviderError> {
        if self.answered {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.answered = true;
        Ok(TargetResponse::text("Which account?"))
    }
}

fn still_talking() -> ScriptedJudge {
    ScriptedJudge::passing().on_template(Template::GenerateTestStatus, [status("B")])
}

#[tokio::test]
async fn timeout_keeps_partial_conversation_and_usage() {
    let h = harness(still_talking());
    let t = test("stalls").with_max_turns(5);
    let err = h
        .factory
        .create(&t, Box::new(StallsAfterFirstTurn { answered: false }))
        .unwrap()
        .run_with(RunLimits {
            timeout: Some(Duration::from_millis(300)),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("timed out after"));
    assert_eq!(err.conversation.turns(), 1);
    assert!(err.usage.input_tokens > 0);
    assert!(err.usage.output_tokens > 0);
    // generate_initial_prompt, test status, user response
    assert_eq!(h.judge.calls().len(), 3);

    let docs = h.sink.find("stalls");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].steps.last().unwrap().step_name, "interrupted");
}

#[tokio::test]
async fn cancel_signal_stops_the_conversation_with_its_reason() {
    let h = harness(still_talking());
    let t = test("cancelled").with_max_turns(5);
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send_replace(true);
    });

    let err = h
        .factory
        .create(&t, Box::new(StallsAfterFirstTurn { answered: false }))
        .unwrap()
        .run_with(RunLimits {
            cancel: Some(rx),
            cancel_reason: Some("stop requested".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "stop requested");
    assert_eq!(err.conversation.turns(), 1);
    assert!(err.usage.input_tokens > 0);
    assert_eq!(h.sink.find("cancelled").len(), 1);
}

#[tokio::test]
async fn limits_that_never_trip_leave_the_result_alone() {
    let h = harness(ScriptedJudge::passing());
    let (_tx, rx) = watch::channel(false);
    let result = h
        .factory
        .create(&test("untouched"), target(&["Your balance is $10."]))
        .unwrap()
        .run_with(RunLimits {
            timeout: Some(Duration::from_secs(10)),
            cancel: Some(rx),
            cancel_reason: None,
        })
        .await
        .unwrap();
    assert!(result.passed);
    assert_eq!(h.sink.find("untouched").len(), 1);
}
