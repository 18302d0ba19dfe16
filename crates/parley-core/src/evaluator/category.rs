//! Judge classifications and the fixed result strings they map to.

pub const ALL_OBSERVED: &str = "All of the expected results can be observed in the conversation.";
pub const NOT_ALL_OBSERVED: &str =
    "Not all of the expected results can be observed in the conversation.";
pub const MAX_TURNS_REACHED: &str = "Maximum turns reached.";

/// Answer to "has the user attempted every step yet?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCategory {
    AllStepsAttempted,
    NotAllStepsAttempted,
    /// Missing tag or an answer other than `A`/`B`; treated as not done.
    Unrecognized(Option<String>),
}

impl StatusCategory {
    pub fn parse(answer: Option<&str>) -> Self {
        match answer.map(normalize) {
            Some("A") => Self::AllStepsAttempted,
            Some("B") => Self::NotAllStepsAttempted,
            _ => Self::Unrecognized(answer.map(str::to_string)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AllStepsAttempted)
    }
}

/// Answer to "are all expected results observed?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationCategory {
    AllObserved,
    NotAllObserved,
    Unrecognized(Option<String>),
}

impl EvaluationCategory {
    pub fn parse(answer: Option<&str>) -> Self {
        match answer.map(normalize) {
            Some("A") => Self::AllObserved,
            Some("B") => Self::NotAllObserved,
            _ => Self::Unrecognized(answer.map(str::to_string)),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, Self::AllObserved)
    }

    pub fn description(&self) -> &'static str {
        if self.passed() {
            ALL_OBSERVED
        } else {
            NOT_ALL_OBSERVED
        }
    }
}

/// Accepts `A`, `a`, `A.` and `A. All steps ...`.
fn normalize(answer: &str) -> &str {
    let answer = answer.trim();
    let head = answer
        .split(|c: char| c == '.' || c == ')' || c.is_whitespace())
        .next()
        .unwrap_or(answer);
    match head {
        "a" => "A",
        "b" => "B",
        other => other,
    }
}

/// How a conversation ended, before hooks run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub passed: bool,
    pub result: String,
    pub reasoning: String,
}

impl Outcome {
    pub fn judged(category: &EvaluationCategory, reasoning: Option<String>) -> Self {
        Self {
            passed: category.passed(),
            result: category.description().to_string(),
            reasoning: reasoning.unwrap_or_default(),
        }
    }

    pub fn max_turns_reached() -> Self {
        Self {
            passed: false,
            result: MAX_TURNS_REACHED.to_string(),
            reasoning: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_letters() {
        assert_eq!(StatusCategory::parse(Some("A")), StatusCategory::AllStepsAttempted);
        assert_eq!(StatusCategory::parse(Some(" b ")), StatusCategory::NotAllStepsAttempted);
        assert_eq!(
            StatusCategory::parse(Some("A. All steps have been attempted")),
            StatusCategory::AllStepsAttempted
        );
        assert_eq!(StatusCategory::parse(None), StatusCategory::Unrecognized(None));
        assert!(!StatusCategory::parse(Some("C")).is_terminal());
    }

    #[test]
    fn only_a_passes() {
        assert!(EvaluationCategory::parse(Some("A")).passed());
        assert!(!EvaluationCategory::parse(Some("B")).passed());
        let odd = EvaluationCategory::parse(Some("maybe"));
        assert_eq!(odd, EvaluationCategory::Unrecognized(Some("maybe".into())));
        assert_eq!(odd.description(), NOT_ALL_OBSERVED);
    }

    #[test]
    fn outcomes_use_fixed_strings() {
        let o = Outcome::judged(&EvaluationCategory::AllObserved, Some("seen".into()));
        assert!(o.passed);
        assert_eq!(o.result, ALL_OBSERVED);
        assert_eq!(o.reasoning, "seen");
        let o = Outcome::max_turns_reached();
        assert!(!o.passed);
        assert_eq!(o.result, "Maximum turns reached.");
        assert!(o.reasoning.is_empty());
    }
}
