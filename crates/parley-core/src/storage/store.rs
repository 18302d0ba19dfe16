use crate::conversation::Conversation;
use crate::errors::NoRecordFound;
use crate::model::{pass_rate, Run, Test, TestResult, TokenUsage};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Persists finished runs.
pub trait RunStore {
    /// Returns the new run id.
    fn save_run(&self, run: &Run) -> anyhow::Result<i64>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSummary {
    pub name: String,
    pub passed: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunDescription {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub num_tests: usize,
    pub pass_count: usize,
    pub pass_rate: f64,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestDescription {
    pub test: Test,
    pub result: TestResult,
}

/// SQLite-backed run store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite db {}", path.display()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)
            .context("failed to create run store schema")?;
        crate::storage::schema::migrate(&conn)?;
        Ok(())
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("run store lock poisoned"))
    }

    /// Most recent runs first.
    pub fn list_runs(&self, max_items: usize) -> anyhow::Result<Vec<RunSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, start_time, end_time FROM runs ORDER BY end_time DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![max_items as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        let mut runs = Vec::new();
        for r in rows {
            let (id, start, end) = r?;
            runs.push(RunSummary {
                id,
                start_time: parse_time(&start)?,
                end_time: parse_time(&end)?,
            });
        }
        if runs.is_empty() {
            return Err(NoRecordFound("no runs stored".into()).into());
        }
        Ok(runs)
    }

    /// Tests of a run, by name.
    pub fn list_tests(&self, run_id: i64, max_items: usize) -> anyhow::Result<Vec<TestSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name, passed, start_time, end_time FROM tests
             WHERE run_id = ?1 ORDER BY name ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![run_id, max_items as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut tests = Vec::new();
        for r in rows {
            let (name, passed, start, end) = r?;
            tests.push(TestSummary {
                name,
                passed,
                start_time: parse_time(&start)?,
                end_time: parse_time(&end)?,
            });
        }
        if tests.is_empty() {
            return Err(NoRecordFound(format!("no tests for run {}", run_id)).into());
        }
        Ok(tests)
    }

    pub fn describe_run(&self, run_id: i64) -> anyhow::Result<RunDescription> {
        let conn = self.lock()?;
        let run: Option<(String, String)> = conn
            .query_row(
                "SELECT start_time, end_time FROM runs WHERE id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((start, end)) = run else {
            return Err(NoRecordFound(format!("run {}", run_id)).into());
        };
        let (num_tests, pass_count, input, output): (i64, i64, i64, i64) = conn.query_row(
            "SELECT COUNT(1), COALESCE(SUM(passed), 0),
                    COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0)
             FROM tests WHERE run_id = ?1",
            params![run_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        Ok(RunDescription {
            id: run_id,
            start_time: parse_time(&start)?,
            end_time: parse_time(&end)?,
            num_tests: num_tests as usize,
            pass_count: pass_count as usize,
            pass_rate: pass_rate(pass_count as usize, num_tests as usize),
            usage: TokenUsage {
                input_tokens: input as u64,
                output_tokens: output as u64,
            },
        })
    }

    pub fn describe_test(&self, run_id: i64, test_name: &str) -> anyhow::Result<TestDescription> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT name, steps_json, expected_results_json, initial_prompt, max_turns, hook,
                        passed, result, reasoning, conversation_json, input_tokens, output_tokens,
                        start_time, end_time, error
                 FROM tests WHERE run_id = ?1 AND name = ?2",
                params![run_id, test_name],
                StoredTest::from_row,
            )
            .optional()?;
        match row {
            Some(stored) => stored.into_description(),
            None => Err(NoRecordFound(format!("test '{}' in run {}", test_name, run_id)).into()),
        }
    }
}

impl RunStore for Store {
    fn save_run(&self, run: &Run) -> anyhow::Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (start_time, end_time) VALUES (?1, ?2)",
            params![run.start_time.to_rfc3339(), run.end_time.to_rfc3339()],
        )?;
        let run_id = tx.last_insert_rowid();

        for (name, result) in &run.results {
            let test = run.tests.iter().find(|t| &t.name == name);
            let steps = test.map(|t| t.steps.clone()).unwrap_or_default();
            let expected = test.map(|t| t.expected_results.clone()).unwrap_or_default();
            tx.execute(
                "INSERT INTO tests (run_id, name, steps_json, expected_results_json, initial_prompt,
                                    max_turns, hook, passed, result, reasoning, conversation_json,
                                    input_tokens, output_tokens, start_time, end_time, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    run_id,
                    name,
                    serde_json::to_string(&steps)?,
                    serde_json::to_string(&expected)?,
                    test.and_then(|t| t.initial_prompt.clone()),
                    test.map(|t| t.max_turns).unwrap_or(0),
                    test.and_then(|t| t.hook.clone()),
                    result.passed,
                    result.result,
                    result.reasoning,
                    serde_json::to_string(&result.conversation)?,
                    result.usage.input_tokens as i64,
                    result.usage.output_tokens as i64,
                    result.start_time.to_rfc3339(),
                    result.end_time.to_rfc3339(),
                    result.error,
                ],
            )?;
        }
        tx.commit()?;
        tracing::info!(run_id, tests = run.results.len(), "run saved");
        Ok(run_id)
    }
}

struct StoredTest {
    name: String,
    steps_json: String,
    expected_json: String,
    initial_prompt: Option<String>,
    max_turns: u32,
    hook: Option<String>,
    passed: bool,
    result: String,
    reasoning: String,
    conversation_json: String,
    input_tokens: i64,
    output_tokens: i64,
    start_time: String,
    end_time: String,
    error: Option<String>,
}

impl StoredTest {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            steps_json: row.get(1)?,
            expected_json: row.get(2)?,
            initial_prompt: row.get(3)?,
            max_turns: row.get(4)?,
            hook: row.get(5)?,
            passed: row.get(6)?,
            result: row.get(7)?,
            reasoning: row.get(8)?,
            conversation_json: row.get(9)?,
            input_tokens: row.get(10)?,
            output_tokens: row.get(11)?,
            start_time: row.get(12)?,
            end_time: row.get(13)?,
            error: row.get(14)?,
        })
    }

    fn into_description(self) -> anyhow::Result<TestDescription> {
        let conversation: Conversation = serde_json::from_str(&self.conversation_json)
            .context("stored conversation is not valid JSON")?;
        Ok(TestDescription {
            test: Test {
                name: self.name.clone(),
                steps: serde_json::from_str(&self.steps_json)?,
                expected_results: serde_json::from_str(&self.expected_json)?,
                initial_prompt: self.initial_prompt,
                max_turns: self.max_turns,
                hook: self.hook,
            },
            result: TestResult {
                test_name: self.name,
                passed: self.passed,
                result: self.result,
                reasoning: self.reasoning,
                conversation,
                usage: TokenUsage {
                    input_tokens: self.input_tokens as u64,
                    output_tokens: self.output_tokens as u64,
                },
                error: self.error,
                start_time: parse_time(&self.start_time)?,
                end_time: parse_time(&self.end_time)?,
            },
        })
    }
}

fn parse_time(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid stored timestamp '{}'", s))?
        .with_timezone(&Utc))
}
