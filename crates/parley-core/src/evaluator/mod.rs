//! Judge-driven conversation loop for a single test.
//!
//! Each turn the judge plays the user, the target answers, and the judge
//! decides whether every step has been attempted. Once it has, the judge grades
//! the conversation against the expected results. A test that never gets there
//! within `max_turns` fails.

pub mod category;
pub mod hook;

pub use category::{EvaluationCategory, Outcome, StatusCategory};
pub use hook::{Hook, HookRegistry};

use crate::conversation::Conversation;
use crate::errors::ConfigError;
use crate::extract::extract_answer;
use crate::model::{Test, TestResult, TestSuite, TokenUsage};
use crate::providers::{JudgeClient, Target};
use crate::templates::{CanonicalTemplates, RenderedPrompt, Template, TemplateRenderer};
use crate::trace::{TraceGuard, TraceRecorder, TraceSink};
use anyhow::{anyhow, Context};
use chrono::Utc;
use serde_json::{json, Value};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// A test that could not be judged. Carries whatever conversation and token
/// usage accumulated before the failure.
#[derive(Debug, Error)]
#[error("{error:#}")]
pub struct EvaluationError {
    pub error: anyhow::Error,
    pub conversation: Conversation,
    pub usage: TokenUsage,
}

/// Ways a running evaluation is cut short. An interrupted evaluation still
/// returns the conversation and usage it accumulated.
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    /// Wall-clock limit for the whole evaluation.
    pub timeout: Option<Duration>,
    /// Cancels the evaluation once the channel holds `true`.
    pub cancel: Option<watch::Receiver<bool>>,
    /// Error message for a cancelled evaluation.
    pub cancel_reason: Option<String>,
}

impl RunLimits {
    async fn interrupted(mut self) -> anyhow::Error {
        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    anyhow!("timed out after {:?}", limit)
                }
                None => pending().await,
            }
        };
        let reason = self.cancel_reason.take();
        let cancelled = async move {
            if let Some(rx) = self.cancel.as_mut() {
                let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
                if fired {
                    return anyhow!(reason.unwrap_or_else(|| "cancelled".to_string()));
                }
            }
            pending().await
        };
        tokio::select! {
            e = deadline => e,
            e = cancelled => e,
        }
    }
}

/// Builds one [`Evaluator`] per test from shared judge, templates and sinks.
#[derive(Clone)]
pub struct EvaluatorFactory {
    judge: Arc<dyn JudgeClient>,
    templates: Arc<dyn TemplateRenderer>,
    trace_sink: Arc<dyn TraceSink>,
    hooks: HookRegistry,
}

impl EvaluatorFactory {
    pub fn new(judge: Arc<dyn JudgeClient>, trace_sink: Arc<dyn TraceSink>) -> Self {
        Self {
            judge,
            templates: Arc::new(CanonicalTemplates),
            trace_sink,
            hooks: HookRegistry::with_builtins(),
        }
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateRenderer>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Every hook the suite references must be registered.
    pub fn validate(&self, suite: &TestSuite) -> Result<(), ConfigError> {
        self.hooks.validate(suite)
    }

    pub fn create(&self, test: &Test, target: Box<dyn Target>) -> Result<Evaluator, ConfigError> {
        Ok(Evaluator {
            hook: self.hooks.resolve(test)?,
            test: test.clone(),
            target,
            judge: self.judge.clone(),
            templates: self.templates.clone(),
            trace_sink: self.trace_sink.clone(),
        })
    }
}

pub struct Evaluator {
    test: Test,
    target: Box<dyn Target>,
    judge: Arc<dyn JudgeClient>,
    templates: Arc<dyn TemplateRenderer>,
    trace_sink: Arc<dyn TraceSink>,
    hook: Option<Arc<dyn Hook>>,
}

#[derive(Default)]
struct Session {
    conversation: Conversation,
    usage: TokenUsage,
}

struct JudgeExchange {
    prompt: RenderedPrompt,
    completion: String,
    answer: Option<String>,
    reasoning: Option<String>,
}

impl JudgeExchange {
    fn trace_data(&self) -> Value {
        json!({
            "system_prompt": self.prompt.system,
            "prompt": self.prompt.user,
            "completion": self.completion,
            "answer": self.answer,
            "reasoning": self.reasoning,
        })
    }
}

impl Evaluator {
    pub fn test(&self) -> &Test {
        &self.test
    }

    /// Drive the conversation to a verdict. The trace is flushed exactly once,
    /// whether this returns, errors or is cancelled.
    pub async fn run(self) -> Result<TestResult, EvaluationError> {
        self.run_with(RunLimits::default()).await
    }

    /// Like [`Evaluator::run`], but gives up when `limits` trip. The partial
    /// conversation and usage land in the returned [`EvaluationError`].
    pub async fn run_with(mut self, limits: RunLimits) -> Result<TestResult, EvaluationError> {
        let start_time = Utc::now();
        let mut trace = TraceGuard::open(self.test.name.clone(), self.trace_sink.clone());
        let mut session = Session::default();
        let test_name = self.test.name.clone();

        let finished = tokio::select! {
            outcome = self.evaluate(&mut trace, &mut session, start_time) => Ok(outcome),
            error = limits.interrupted() => Err(error),
        };
        let outcome = match finished {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(test = %test_name, error = %error, "evaluation interrupted");
                trace.add_step(
                    "interrupted",
                    json!({ "error": error.to_string(), "turns": session.conversation.turns() }),
                );
                Err(error)
            }
        };
        trace.finish();

        outcome.map_err(|error| EvaluationError {
            error,
            conversation: session.conversation,
            usage: session.usage,
        })
    }

    async fn evaluate(
        &mut self,
        trace: &mut TraceRecorder,
        session: &mut Session,
        start_time: chrono::DateTime<Utc>,
    ) -> anyhow::Result<TestResult> {
        let hook = self.hook.clone();
        if let Some(hook) = &hook {
            hook.pre_evaluate(&self.test, trace)
                .await
                .context("pre-evaluate hook failed")?;
        }

        let outcome = self.converse(trace, session).await?;
        let mut result = TestResult {
            test_name: self.test.name.clone(),
            passed: outcome.passed,
            result: outcome.result,
            reasoning: outcome.reasoning,
            conversation: session.conversation.clone(),
            usage: session.usage,
            error: None,
            start_time,
            end_time: Utc::now(),
        };

        if let Some(hook) = &hook {
            if let Some(replaced) = hook
                .post_evaluate(&self.test, &result, trace)
                .await
                .context("post-evaluate hook failed")?
            {
                tracing::debug!(test = %self.test.name, "post-evaluate hook replaced the result");
                result = replaced;
            }
        }
        Ok(result)
    }

    async fn converse(
        &mut self,
        trace: &mut TraceRecorder,
        session: &mut Session,
    ) -> anyhow::Result<Outcome> {
        let mut user_message = match self.test.initial_prompt.clone() {
            Some(prompt) => prompt,
            None => {
                let step = self.test.steps.first().context("test has no steps")?;
                let ctx = json!({ "step": step });
                let ex = self
                    .ask_judge(Template::GenerateInitialPrompt, &ctx, session)
                    .await?;
                trace.add_step(Template::GenerateInitialPrompt.name(), ex.trace_data());
                ex.answer
                    .context("judge reply has no <initial_prompt> to send to the target")?
            }
        };

        while session.conversation.turns() < self.test.max_turns {
            let reply = self
                .target
                .invoke(&user_message)
                .await
                .context("target invocation failed")?;
            session
                .conversation
                .add_turn(user_message.as_str(), reply.response.as_str());
            trace.add_step(
                "invoke_target",
                json!({
                    "turn": session.conversation.turns(),
                    "user_message": user_message,
                    "response": reply.response,
                    "data": reply.data,
                }),
            );

            let ctx = self.context(&session.conversation);
            let ex = self
                .ask_judge(Template::GenerateTestStatus, &ctx, session)
                .await?;
            let status = StatusCategory::parse(ex.answer.as_deref());
            let mut data = ex.trace_data();
            if let StatusCategory::Unrecognized(raw) = &status {
                tracing::warn!(
                    test = %self.test.name,
                    answer = ?raw,
                    "unrecognized test status category, continuing the conversation"
                );
                data["unrecognized"] = json!(true);
            }
            trace.add_step(Template::GenerateTestStatus.name(), data);

            if status.is_terminal() {
                let ex = self
                    .ask_judge(Template::GenerateEvaluation, &ctx, session)
                    .await?;
                let category = EvaluationCategory::parse(ex.answer.as_deref());
                let mut data = ex.trace_data();
                if let EvaluationCategory::Unrecognized(raw) = &category {
                    tracing::warn!(
                        test = %self.test.name,
                        answer = ?raw,
                        "unrecognized evaluation category, failing the test"
                    );
                    data["unrecognized"] = json!(true);
                }
                trace.add_step(Template::GenerateEvaluation.name(), data);
                return Ok(Outcome::judged(&category, ex.reasoning));
            }

            if session.conversation.turns() < self.test.max_turns {
                let ex = self
                    .ask_judge(Template::GenerateUserResponse, &ctx, session)
                    .await?;
                trace.add_step(Template::GenerateUserResponse.name(), ex.trace_data());
                user_message = ex
                    .answer
                    .context("judge reply has no <user_response> to send to the target")?;
            }
        }

        tracing::info!(test = %self.test.name, max_turns = self.test.max_turns, "maximum turns reached");
        Ok(Outcome::max_turns_reached())
    }

    fn context(&self, conversation: &Conversation) -> Value {
        json!({
            "steps": self.test.steps,
            "expected_results": self.test.expected_results,
            "conversation": conversation.messages(),
        })
    }

    async fn ask_judge(
        &self,
        template: Template,
        context: &Value,
        session: &mut Session,
    ) -> anyhow::Result<JudgeExchange> {
        let prompt = self
            .templates
            .render(template, context)
            .with_context(|| format!("failed to render {}", template.name()))?;
        let completion = self
            .judge
            .complete(&prompt.system, &prompt.user)
            .await
            .with_context(|| format!("judge call {} failed", template.name()))?;
        session.usage += completion.usage;
        let (answer, reasoning) = extract_answer(&completion.text, template.answer_tag());
        tracing::debug!(test = %self.test.name, template = template.name(), answer = ?answer, "judge answered");
        Ok(JudgeExchange {
            prompt,
            completion: completion.text,
            answer,
            reasoning,
        })
    }
}
