//! Decoding of judge output.
//!
//! Judge prompts ask for every field inside a uniquely named tag
//! (`<category>A</category>`). This module is the only place that knows about
//! that convention. Extraction is total: a missing or malformed tag is `None`.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

/// Tag carrying the judge's rationale in every canonical prompt.
pub const THINKING_TAG: &str = "thinking";

/// For each name, the trimmed text of the first `<name>...</name>` pair.
pub fn extract_tags(completion: &str, names: &[&str]) -> Vec<Option<String>> {
    names.iter().map(|name| extract_tag(completion, name)).collect()
}

/// Compiled tag patterns, keyed by tag name.
static TAG_PATTERNS: LazyLock<Mutex<HashMap<String, Regex>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

pub fn extract_tag(completion: &str, name: &str) -> Option<String> {
    let re = match tag_pattern(name) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(tag = name, error = %e, "cannot build tag pattern");
            return None;
        }
    };
    re.captures(completion)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn tag_pattern(name: &str) -> anyhow::Result<Regex> {
    let mut cache = TAG_PATTERNS
        .lock()
        .map_err(|_| anyhow::anyhow!("tag pattern cache lock poisoned"))?;
    if let Some(re) = cache.get(name) {
        return Ok(re.clone());
    }
    let re = Regex::new(&format!(r"(?s)<{0}>(.*?)</{0}>", regex::escape(name)))?;
    cache.insert(name.to_string(), re.clone());
    Ok(re)
}

/// `(answer, reasoning)` for a judge call whose answer lives in `answer_tag`.
pub fn extract_answer(completion: &str, answer_tag: &str) -> (Option<String>, Option<String>) {
    (
        extract_tag(completion, answer_tag),
        extract_tag(completion, THINKING_TAG),
    )
}
