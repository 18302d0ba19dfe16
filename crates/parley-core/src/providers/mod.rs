//! Remote collaborators: the judge model and the agent under test.

pub mod llm;
pub mod target;

pub use llm::{Completion, JudgeClient, RetryingJudge};
pub use target::{RetryingTarget, Target, TargetRegistry, TargetResponse};

/// Rough token count for providers that don't report usage.
pub(crate) fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
