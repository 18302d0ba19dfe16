use super::TraceDocument;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Destination for finished traces. Called exactly once per test.
pub trait TraceSink: Send + Sync {
    fn flush(&self, trace: &TraceDocument) -> anyhow::Result<()>;
}

/// Writes `<dir>/<test_name>.json`. Bytes outside `[A-Za-z0-9._-]` are
/// percent-encoded, so distinct test names never share a file.
#[derive(Debug, Clone)]
pub struct JsonFileTraceSink {
    dir: PathBuf,
}

impl JsonFileTraceSink {
    pub const DEFAULT_DIR: &'static str = "parley_traces";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, test_name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(test_name)))
    }
}

impl TraceSink for JsonFileTraceSink {
    fn flush(&self, trace: &TraceDocument) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create trace dir {}", self.dir.display()))?;
        let path = self.path_for(&trace.test_name);
        let json = serde_json::to_string_pretty(trace)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write trace {}", path.display()))?;
        Ok(())
    }
}

fn file_stem(test_name: &str) -> String {
    let mut stem = String::with_capacity(test_name.len());
    for b in test_name.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.') {
            stem.push(char::from(b));
        } else {
            stem.push_str(&format!("%{:02X}", b));
        }
    }
    stem
}

/// Keeps flushed traces in memory.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    documents: Mutex<Vec<TraceDocument>>,
}

impl MemoryTraceSink {
    pub fn documents(&self) -> Vec<TraceDocument> {
        self.documents.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn find(&self, test_name: &str) -> Vec<TraceDocument> {
        self.documents()
            .into_iter()
            .filter(|d| d.test_name == test_name)
            .collect()
    }
}

impl TraceSink for MemoryTraceSink {
    fn flush(&self, trace: &TraceDocument) -> anyhow::Result<()> {
        self.documents
            .lock()
            .map_err(|_| anyhow::anyhow!("trace sink lock poisoned"))?
            .push(trace.clone());
        Ok(())
    }
}
