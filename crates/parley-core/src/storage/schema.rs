//! Run store DDL and additive migrations.

use anyhow::Context;
use rusqlite::Connection;
use std::collections::HashSet;

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  start_time TEXT NOT NULL,
  end_time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tests (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  name TEXT NOT NULL,
  steps_json TEXT NOT NULL,
  expected_results_json TEXT NOT NULL,
  initial_prompt TEXT,
  max_turns INTEGER NOT NULL,
  hook TEXT,
  passed INTEGER NOT NULL,
  result TEXT NOT NULL,
  reasoning TEXT NOT NULL,
  conversation_json TEXT NOT NULL,
  input_tokens INTEGER NOT NULL DEFAULT 0,
  output_tokens INTEGER NOT NULL DEFAULT 0,
  start_time TEXT NOT NULL,
  end_time TEXT NOT NULL,
  UNIQUE (run_id, name)
);

CREATE INDEX IF NOT EXISTS idx_tests_run ON tests(run_id);
"#;

/// Columns added after the first schema shipped.
pub(crate) fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let cols = columns(conn, "tests")?;
    add_column_if_missing(conn, &cols, "tests", "error", "TEXT")?;
    Ok(())
}

pub(crate) fn columns(conn: &Connection, table: &str) -> anyhow::Result<HashSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .context("prepare pragma table_info")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = HashSet::new();
    for r in rows {
        out.insert(r?);
    }
    Ok(out)
}

fn add_column_if_missing(
    conn: &Connection,
    cols: &HashSet<String>,
    table: &str,
    col: &str,
    ty: &str,
) -> anyhow::Result<()> {
    if !cols.contains(col) {
        conn.execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, col, ty), [])
            .with_context(|| format!("failed to add column {}.{}", table, col))?;
    }
    Ok(())
}
