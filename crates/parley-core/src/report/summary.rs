//! Markdown summary of a finished run, written next to the traces.

use crate::model::Run;
use anyhow::Context;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE_NAME: &str = "parley_summary.md";

pub fn render_markdown(run: &Run) -> String {
    let mut out = String::new();
    let usage = run.usage();
    let _ = writeln!(out, "# Test Summary\n");
    let _ = writeln!(
        out,
        "Run started {} and finished {}.\n",
        run.start_time.to_rfc3339(),
        run.end_time.to_rfc3339()
    );
    let _ = writeln!(out, "| Metric | Value |\n|---|---|");
    let _ = writeln!(out, "| Tests | {} |", run.num_tests());
    let _ = writeln!(out, "| Passed | {} |", run.pass_count());
    let _ = writeln!(out, "| Failed | {} |", run.fail_count());
    let _ = writeln!(out, "| Pass rate | {:.2}% |", run.pass_rate());
    let _ = writeln!(
        out,
        "| Judge tokens | {} in / {} out |\n",
        usage.input_tokens, usage.output_tokens
    );

    let _ = writeln!(out, "## Results\n");
    let _ = writeln!(out, "| Test | Status | Turns | Result |\n|---|---|---|---|");
    for (name, r) in &run.results {
        let status = if r.passed {
            "✅ pass"
        } else if r.is_error() {
            "⚠️ error"
        } else {
            "❌ fail"
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            name,
            status,
            r.turns(),
            r.result.replace('|', "\\|")
        );
    }

    for test in &run.tests {
        let Some(r) = run.results.get(&test.name) else {
            continue;
        };
        let _ = writeln!(out, "\n## {}\n", test.name);
        let _ = writeln!(out, "**Steps**\n");
        for (i, step) in test.steps.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, step);
        }
        let _ = writeln!(out, "\n**Expected results**\n");
        for (i, expected) in test.expected_results.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, expected);
        }
        let _ = writeln!(out, "\n**Result:** {}\n", r.result);
        if !r.reasoning.is_empty() {
            let _ = writeln!(out, "**Reasoning:** {}\n", r.reasoning);
        }
        if !r.conversation.is_empty() {
            let _ = writeln!(out, "**Conversation**\n\n```\n{}\n```", r.conversation.transcript());
        }
    }
    out
}

/// Write the summary into `dir` and return its path.
pub fn write_summary(run: &Run, dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create summary dir {}", dir.display()))?;
    let path = dir.join(SUMMARY_FILE_NAME);
    std::fs::write(&path, render_markdown(run))
        .with_context(|| format!("failed to write summary {}", path.display()))?;
    tracing::info!(path = %path.display(), "summary written");
    Ok(path)
}
