//! Prompt templates for the four judge calls.
//!
//! The engine only needs a [`TemplateRenderer`]; [`CanonicalTemplates`] is the
//! built-in set. Every canonical prompt asks the judge to wrap its answer in a
//! named tag and its rationale in `<thinking>`, which is what
//! [`crate::extract`] decodes. The system prompt opens with a `<task>` tag
//! naming the template.

use anyhow::Context;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Template {
    GenerateInitialPrompt,
    GenerateUserResponse,
    GenerateTestStatus,
    GenerateEvaluation,
}

impl Template {
    pub const ALL: [Template; 4] = [
        Template::GenerateInitialPrompt,
        Template::GenerateUserResponse,
        Template::GenerateTestStatus,
        Template::GenerateEvaluation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Template::GenerateInitialPrompt => "generate_initial_prompt",
            Template::GenerateUserResponse => "generate_user_response",
            Template::GenerateTestStatus => "generate_test_status",
            Template::GenerateEvaluation => "generate_evaluation",
        }
    }

    /// Tag the judge must wrap its answer in.
    pub fn answer_tag(&self) -> &'static str {
        match self {
            Template::GenerateInitialPrompt => "initial_prompt",
            Template::GenerateUserResponse => "user_response",
            Template::GenerateTestStatus | Template::GenerateEvaluation => "category",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Marker that opens the canonical system prompt for this template.
    pub fn task_marker(&self) -> String {
        format!("<task>{}</task>", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

pub trait TemplateRenderer: Send + Sync {
    /// Context keys: `step` (string), `steps`, `expected_results` (string
    /// arrays), `conversation` (array of `{role, content}`).
    fn render(&self, template: Template, context: &Value) -> anyhow::Result<RenderedPrompt>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalTemplates;

const USER_ROLE_PREAMBLE: &str = "You are a quality assurance engineer testing a conversational agent. \
You play the role of the USER talking to the AGENT.";

const INITIAL_PROMPT_SYSTEM: &str = "Given a step from a test script, write the first message the USER \
sends to the AGENT to carry out that step. Write only what the user would type.\n\
Think it through inside <thinking></thinking> tags, then put the message inside \
<initial_prompt></initial_prompt> tags.";

const USER_RESPONSE_SYSTEM: &str = "Given the test steps and the conversation so far, write the USER's \
next message so that the remaining steps get attempted. Reply to what the AGENT just said.\n\
Think it through inside <thinking></thinking> tags, then put the message inside \
<user_response></user_response> tags.";

const TEST_STATUS_SYSTEM: &str = "Given the test steps and the conversation so far, decide whether the \
USER has attempted every step. Choose one category:\n\
A. All steps have been attempted in the conversation.\n\
B. Not all steps have been attempted in the conversation.\n\
Think it through inside <thinking></thinking> tags, then put only the letter inside \
<category></category> tags.";

const EVALUATION_SYSTEM: &str = "Given the expected results and a finished conversation, decide whether \
every expected result can be observed in what the AGENT said. Choose one category:\n\
A. All of the expected results can be observed in the conversation.\n\
B. Not all of the expected results can be observed in the conversation.\n\
Think it through inside <thinking></thinking> tags, then put only the letter inside \
<category></category> tags.";

impl CanonicalTemplates {
    fn system(template: Template) -> String {
        let body = match template {
            Template::GenerateInitialPrompt => INITIAL_PROMPT_SYSTEM,
            Template::GenerateUserResponse => USER_RESPONSE_SYSTEM,
            Template::GenerateTestStatus => TEST_STATUS_SYSTEM,
            Template::GenerateEvaluation => EVALUATION_SYSTEM,
        };
        format!("{}\n{}\n\n{}", template.task_marker(), USER_ROLE_PREAMBLE, body)
    }
}

impl TemplateRenderer for CanonicalTemplates {
    fn render(&self, template: Template, context: &Value) -> anyhow::Result<RenderedPrompt> {
        let user = match template {
            Template::GenerateInitialPrompt => {
                let step = context
                    .get("step")
                    .and_then(Value::as_str)
                    .context("template context is missing 'step'")?;
                format!("Here is the step:\n<step>\n{}\n</step>", step)
            }
            Template::GenerateUserResponse | Template::GenerateTestStatus => format!(
                "Here are the steps:\n<steps>\n{}\n</steps>\n\n\
                 Here is the conversation:\n<conversation>\n{}\n</conversation>",
                numbered(&string_list(context, "steps")?),
                transcript(context)?
            ),
            Template::GenerateEvaluation => format!(
                "Here are the expected results:\n<expected_results>\n{}\n</expected_results>\n\n\
                 Here is the conversation:\n<conversation>\n{}\n</conversation>",
                numbered(&string_list(context, "expected_results")?),
                transcript(context)?
            ),
        };
        Ok(RenderedPrompt {
            system: Self::system(template),
            user,
        })
    }
}

fn string_list(context: &Value, key: &str) -> anyhow::Result<Vec<String>> {
    let items = context
        .get(key)
        .and_then(Value::as_array)
        .with_context(|| format!("template context is missing '{}'", key))?;
    Ok(items
        .iter()
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
        .collect())
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n")
}

fn transcript(context: &Value) -> anyhow::Result<String> {
    let messages = context
        .get("conversation")
        .and_then(Value::as_array)
        .context("template context is missing 'conversation'")?;
    Ok(messages
        .iter()
        .map(|m| {
            format!(
                "{}: {}",
                m.get("role").and_then(Value::as_str).unwrap_or("UNKNOWN"),
                m.get("content").and_then(Value::as_str).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}
