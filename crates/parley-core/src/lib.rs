pub mod config;
pub mod conversation;
pub mod engine;
pub mod errors;
pub mod evaluator;
pub mod extract;
pub mod model;
pub mod providers;
pub mod report;
pub mod retry;
pub mod storage;
pub mod templates;
pub mod trace;

pub use conversation::{Conversation, Message, Role};
pub use engine::runner::{RunOptions, RunOutcome, Runner};
pub use errors::{ConfigError, ProviderError};
pub use evaluator::{Evaluator, EvaluatorFactory, RunLimits};
pub use model::{Run, Test, TestResult, TestSuite, TokenUsage};
