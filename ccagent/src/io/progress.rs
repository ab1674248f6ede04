//! Append-only progress log (`progress.txt`).
//!
//! This is the product audit trail of init and build runs. Lines are only
//! ever appended; reading back is limited to a bounded tail.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};

use crate::io::files::write_text;

pub const PROGRESS_HEADER: &str = "# ccagent build progress\n";

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log with its header if it does not exist yet.
    ///
    /// Returns `true` when the file was created.
    pub fn ensure_exists(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        write_text(&self.path, PROGRESS_HEADER)?;
        Ok(true)
    }

    pub fn append(&self, line: &str) -> Result<()> {
        self.append_all(std::slice::from_ref(&line))
    }

    /// Append lines in order, one per line.
    pub fn append_all<S: AsRef<str>>(&self, lines: &[S]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open progress log {}", self.path.display()))?;
        let mut buf = String::new();
        for line in lines {
            buf.push_str(line.as_ref());
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .with_context(|| format!("append progress log {}", self.path.display()))
    }

    /// Last `max_lines` non-empty lines joined by `\n`; empty when missing.
    pub fn tail(&self, max_lines: usize) -> Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("read progress log {}", self.path.display()))?;
        let lines: Vec<&str> = text.split('\n').filter(|line| !line.is_empty()).collect();
        let start = lines.len().saturating_sub(max_lines);
        Ok(lines[start..].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_header_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = ProgressLog::new(temp.path().join("progress.txt"));
        assert!(log.ensure_exists().expect("create"));
        assert!(!log.ensure_exists().expect("exists"));
        assert_eq!(fs::read_to_string(log.path()).expect("read"), PROGRESS_HEADER);
    }

    #[test]
    fn appends_in_order_and_tails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = ProgressLog::new(temp.path().join("progress.txt"));
        log.ensure_exists().expect("create");
        log.append("one").expect("append");
        log.append_all(&["two".to_string(), "three".to_string()])
            .expect("append");

        assert_eq!(log.tail(2).expect("tail"), "two\nthree");
        assert_eq!(
            log.tail(80).expect("tail"),
            "# ccagent build progress\none\ntwo\nthree"
        );
    }

    #[test]
    fn tail_of_missing_log_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = ProgressLog::new(temp.path().join("absent.txt"));
        assert_eq!(log.tail(10).expect("tail"), "");
    }

    #[test]
    fn timestamps_are_utc_millis() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'), "{ts}");
        assert_eq!(ts.len(), "2025-01-01T00:00:00.000Z".len());
    }
}
