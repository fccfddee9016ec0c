//! Append-only run history.
//!
//! One tab-separated line per run:
//!
//! ```text
//! <unix-seconds>\t<task_name>\t<ok|fail>\t<duration_ms>\t<task_count>\t<retry_count>
//! ```
//!
//! The trailing `retry_count` column is optional on read for records
//! written by older versions. Lines are self-contained, so interleaving
//! from concurrent processes is acceptable.

use crate::{Error, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One persisted run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    /// Unix seconds at the end of the run.
    pub timestamp: i64,
    /// Primary requested task of the run.
    pub task_name: String,
    pub success: bool,
    pub duration_ms: u64,
    /// Number of tasks in the run, including skipped ones.
    pub task_count: usize,
    /// Total extra attempts across all tasks.
    pub retry_count: u64,
}

impl HistoryRecord {
    fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            self.timestamp,
            self.task_name,
            if self.success { "ok" } else { "fail" },
            self.duration_ms,
            self.task_count,
            self.retry_count,
        )
    }

    /// Parse one line; `None` for malformed lines, which are skipped on
    /// load rather than failing the query.
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim_end().split('\t');
        let timestamp = fields.next()?.parse().ok()?;
        let task_name = fields.next()?.to_string();
        let success = match fields.next()? {
            "ok" => true,
            "fail" => false,
            _ => return None,
        };
        let duration_ms = fields.next()?.parse().ok()?;
        let task_count = fields.next()?.parse().ok()?;
        let retry_count = match fields.next() {
            Some(value) => value.parse().ok()?,
            None => 0,
        };
        Some(Self {
            timestamp,
            task_name,
            success,
            duration_ms,
            task_count,
            retry_count,
        })
    }
}

/// File-backed history log.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    /// Default location: `$HOME/.zr/history`, or `./.zr_history` when no
    /// home directory is available.
    #[must_use]
    pub fn open_default() -> Self {
        let path = dirs::home_dir()
            .map_or_else(|| PathBuf::from(".zr_history"), |home| home.join(".zr/history"));
        Self { path }
    }

    /// Open a log at an explicit path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. The single write is below typical filesystem
    /// block size and treated as atomic for this log's purposes.
    pub fn append(&self, record: &HistoryRecord) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| Error::history(format!("create {}: {e}", parent.display())))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::history(format!("open {}: {e}", self.path.display())))?;
        file.write_all(record.to_line().as_bytes())
            .map_err(|e| Error::history(format!("append {}: {e}", self.path.display())))?;
        Ok(())
    }

    /// Load up to `limit` most recent records, oldest first. A missing
    /// file is an empty history, not an error.
    pub fn load_last(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::history(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let records: Vec<HistoryRecord> = content.lines().filter_map(HistoryRecord::parse).collect();
        let skip = records.len().saturating_sub(limit);
        Ok(records.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(task: &str, success: bool) -> HistoryRecord {
        HistoryRecord {
            timestamp: 1_700_000_000,
            task_name: task.to_string(),
            success,
            duration_ms: 1234,
            task_count: 3,
            retry_count: 1,
        }
    }

    #[test]
    fn append_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let log = HistoryLog::at(tmp.path().join("history"));

        let rec = record("build", true);
        log.append(&rec).unwrap();

        let loaded = log.load_last(usize::MAX).unwrap();
        assert_eq!(loaded, vec![rec]);
    }

    #[test]
    fn missing_file_is_empty_history() {
        let tmp = TempDir::new().unwrap();
        let log = HistoryLog::at(tmp.path().join("nope"));
        assert!(log.load_last(10).unwrap().is_empty());
    }

    #[test]
    fn load_last_returns_tail() {
        let tmp = TempDir::new().unwrap();
        let log = HistoryLog::at(tmp.path().join("history"));

        for i in 0..5 {
            log.append(&record(&format!("task{i}"), true)).unwrap();
        }

        let loaded = log.load_last(2).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].task_name, "task3");
        assert_eq!(loaded[1].task_name, "task4");
    }

    #[test]
    fn legacy_lines_without_retry_count_parse() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history");
        std::fs::write(&path, "1700000000\tdeploy\tok\t500\t2\n").unwrap();

        let log = HistoryLog::at(&path);
        let loaded = log.load_last(usize::MAX).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].retry_count, 0);
        assert_eq!(loaded[0].task_name, "deploy");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history");
        std::fs::write(
            &path,
            "garbage\n1700000000\tbuild\tok\t10\t1\t0\nnot\ta\trecord\n",
        )
        .unwrap();

        let log = HistoryLog::at(&path);
        let loaded = log.load_last(usize::MAX).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].task_name, "build");
    }

    #[test]
    fn failure_is_recorded_as_fail() {
        let tmp = TempDir::new().unwrap();
        let log = HistoryLog::at(tmp.path().join("history"));
        log.append(&record("ship", false)).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("\tfail\t"));
        assert!(!log.load_last(1).unwrap()[0].success);
    }

    #[test]
    fn appends_interleave_as_whole_lines() {
        let tmp = TempDir::new().unwrap();
        let log = HistoryLog::at(tmp.path().join("history"));
        log.append(&record("a", true)).unwrap();
        log.append(&record("b", false)).unwrap();

        let loaded = log.load_last(usize::MAX).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].task_name, "a");
        assert_eq!(loaded[1].task_name, "b");
    }
}
