use super::{Completion, JudgeClient};
use crate::errors::{ConfigError, ProviderError};
use crate::model::TokenUsage;
use crate::providers::word_count;
use crate::templates::Template;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const PROVIDER: &str = "scripted";

/// Format a judge reply the way the canonical templates ask for it.
pub fn reply(answer_tag: &str, answer: &str, thinking: &str) -> String {
    format!(
        "<thinking>{}</thinking>\n<{tag}>{}</{tag}>",
        thinking,
        answer,
        tag = answer_tag
    )
}

struct Rule {
    needle: String,
    replies: Vec<String>,
    next: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeCall {
    pub system: String,
    pub prompt: String,
}

/// Offline judge that answers from a fixed script.
///
/// A rule fires when its needle occurs in the system prompt. Replies are
/// handed out in order and the last one repeats.
#[derive(Default)]
pub struct ScriptedJudge {
    rules: Vec<Rule>,
    calls: Mutex<Vec<JudgeCall>>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Judge that opens with a greeting, reports every step attempted and passes.
    pub fn passing() -> Self {
        Self::new()
            .on_template(
                Template::GenerateInitialPrompt,
                [reply("initial_prompt", "Hello", "open the conversation")],
            )
            .on_template(
                Template::GenerateUserResponse,
                [reply("user_response", "Please continue.", "keep going")],
            )
            .on_template(
                Template::GenerateTestStatus,
                [reply("category", "A", "every step was attempted")],
            )
            .on_template(
                Template::GenerateEvaluation,
                [reply("category", "A", "every result was observed")],
            )
    }

    /// Plan form: template name to raw replies, layered over [`Self::passing`].
    pub fn from_script(script: &BTreeMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut judge = Self::passing();
        for (name, replies) in script {
            let template = Template::from_name(name).ok_or_else(|| {
                ConfigError::InvalidEvaluator(format!("unknown template '{}' in script", name))
            })?;
            if replies.is_empty() {
                return Err(ConfigError::InvalidEvaluator(format!(
                    "script for '{}' has no replies",
                    name
                )));
            }
            judge = judge.on_template(template, replies.clone());
        }
        Ok(judge)
    }

    pub fn on<I, S>(mut self, needle: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let needle = needle.into();
        self.rules.retain(|r| r.needle != needle);
        self.rules.push(Rule {
            needle,
            replies: replies.into_iter().map(Into::into).collect(),
            next: AtomicUsize::new(0),
        });
        self
    }

    pub fn on_template<I, S>(self, template: Template, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on(template.task_marker(), replies)
    }

    pub fn calls(&self) -> Vec<JudgeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, template: Template) -> usize {
        let marker = template.task_marker();
        self.calls()
            .iter()
            .filter(|c| c.system.contains(&marker))
            .count()
    }
}

#[async_trait]
impl JudgeClient for ScriptedJudge {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(JudgeCall {
                system: system.to_string(),
                prompt: prompt.to_string(),
            });
        }
        let rule = self
            .rules
            .iter()
            .find(|r| system.contains(&r.needle))
            .ok_or_else(|| ProviderError::fatal(PROVIDER, "no scripted reply for prompt"))?;
        let idx = rule.next.fetch_add(1, Ordering::SeqCst);
        let text = rule
            .replies
            .get(idx.min(rule.replies.len().saturating_sub(1)))
            .cloned()
            .unwrap_or_default();
        Ok(Completion {
            usage: TokenUsage {
                input_tokens: word_count(system) + word_count(prompt),
                output_tokens: word_count(&text),
            },
            text,
        })
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_advance_and_last_repeats() {
        let judge = ScriptedJudge::new().on("status", ["B", "A"]);
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(judge.complete("status check", "p").await.unwrap().text);
        }
        assert_eq!(seen, vec!["B", "A", "A"]);
    }

    #[tokio::test]
    async fn unmatched_prompt_is_fatal() {
        let err = ScriptedJudge::new().complete("x", "y").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn usage_counts_words() {
        let judge = ScriptedJudge::new().on("a", ["one two"]);
        let c = judge.complete("a b", "c").await.unwrap();
        assert_eq!(c.usage.input_tokens, 3);
        assert_eq!(c.usage.output_tokens, 2);
    }

    #[test]
    fn script_rejects_unknown_template() {
        let mut script = BTreeMap::new();
        script.insert("grade".to_string(), vec!["A".to_string()]);
        assert!(ScriptedJudge::from_script(&script).is_err());
    }

    #[tokio::test]
    async fn script_overrides_one_template() {
        let mut script = BTreeMap::new();
        script.insert(
            "generate_evaluation".to_string(),
            vec![reply("category", "B", "missing")],
        );
        let judge = ScriptedJudge::from_script(&script).unwrap();
        let system = Template::GenerateEvaluation.task_marker();
        let c = judge.complete(&system, "").await.unwrap();
        assert!(c.text.contains("<category>B</category>"));
        assert_eq!(judge.calls_for(Template::GenerateEvaluation), 1);
    }
}
