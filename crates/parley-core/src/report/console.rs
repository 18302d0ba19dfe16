use crate::model::Run;
use crate::report::progress::{ProgressEvent, ProgressSink};
use std::sync::Arc;

#[must_use]
pub fn format_progress_line(ev: &ProgressEvent) -> String {
    format!(
        "[{}/{}] {} {}",
        ev.done,
        ev.total,
        if ev.passed { "PASS" } else { "FAIL" },
        ev.test_name
    )
}

/// Prints one line per finished test to stderr. `None` for single-test runs.
pub fn default_progress_sink(total: usize) -> Option<ProgressSink> {
    if total <= 1 {
        return None;
    }
    Some(Arc::new(|ev: ProgressEvent| {
        eprintln!("{}", format_progress_line(&ev));
    }))
}

#[must_use]
pub fn format_result_line(name: &str, passed: bool, turns: u32, error: Option<&str>) -> String {
    let icon = if passed { "✅" } else { "❌" };
    let mut line = format!("{} {:<24} turns={}", icon, name, turns);
    if let Some(e) = error {
        line.push_str(&format!("  error: {}", e));
    }
    line
}

pub fn print_summary(run: &Run) {
    eprintln!();
    for (name, r) in &run.results {
        eprintln!(
            "{}",
            format_result_line(name, r.passed, r.turns(), r.error.as_deref())
        );
        if !r.passed && r.error.is_none() {
            eprintln!("    {}", r.result);
        }
    }
    eprintln!();
    eprintln!(
        "Summary: {} passed, {} failed, {} total ({:.2}%)",
        run.pass_count(),
        run.fail_count(),
        run.num_tests(),
        run.pass_rate()
    );
    let usage = run.usage();
    eprintln!(
        "Judge tokens: {} input, {} output",
        usage.input_tokens, usage.output_tokens
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_line_shows_position_and_verdict() {
        let line = format_progress_line(&ProgressEvent {
            done: 2,
            total: 5,
            test_name: "refund".into(),
            passed: false,
        });
        assert_eq!(line, "[2/5] FAIL refund");
    }

    #[test]
    fn result_line_appends_error() {
        let line = format_result_line("refund", false, 0, Some("timed out after 1s"));
        assert!(line.starts_with("❌ refund"));
        assert!(line.ends_with("error: timed out after 1s"));
    }

    #[test]
    fn single_test_runs_skip_progress() {
        assert!(default_progress_sink(1).is_none());
        assert!(default_progress_sink(2).is_some());
    }
}
