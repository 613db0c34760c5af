//! Read JSON-lines logs written by the filesystem backend back into records.
//!
//! Lines that are not JSON objects (tracebacks, progress bars, ...) are
//! skipped, so a log file may be shared with ordinary console output.

pub mod config;
pub mod experiment;
pub mod metric;
pub mod utils;

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::Result;
use crate::models::{LogRecord, LOGBOOK_TYPE};

/// Turns one line into a record, or `None` when the line is not a log.
pub type ParseLineFn = Box<dyn Fn(&str) -> Option<LogRecord> + Send + Sync>;

/// Parse a line as a JSON object.
pub fn parse_json(line: &str) -> Option<LogRecord> {
    match serde_json::from_str::<Value>(line.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Parse a line as JSON and keep it only if it is stamped with `log_type`.
pub fn parse_json_of_type(line: &str, log_type: &str) -> Option<LogRecord> {
    parse_json(line).filter(|log| log.get(LOGBOOK_TYPE).and_then(Value::as_str) == Some(log_type))
}

/// Visit every UTF-8 line of every file under `path`, in order. Lines that
/// are not valid UTF-8 (binary files sharing the directory) are skipped.
/// Stops early when `visit` returns `false`.
pub(crate) fn for_each_line<F>(path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&str) -> bool,
{
    let mut buf = Vec::new();
    for file_path in resolve_paths(path)? {
        let mut reader = BufReader::new(fs::File::open(&file_path)?);
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let Ok(line) = std::str::from_utf8(&buf) else {
                continue;
            };
            if !visit(line) {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// A file yields itself; a directory yields its files, sorted by name.
pub fn resolve_paths(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = vec![];
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

pub struct LogParser {
    parse_line: ParseLineFn,
    /// Type given to parsed records that carry no `logbook_type`.
    default_type: String,
}

impl Default for LogParser {
    fn default() -> Self {
        Self::new(Box::new(parse_json), "log")
    }
}

impl LogParser {
    pub fn new(parse_line: ParseLineFn, default_type: impl Into<String>) -> Self {
        Self {
            parse_line,
            default_type: default_type.into(),
        }
    }

    pub fn parse_line(&self, line: &str) -> Option<LogRecord> {
        let mut log = (self.parse_line)(line)?;
        log.entry(LOGBOOK_TYPE.to_string())
            .or_insert_with(|| Value::String(self.default_type.clone()));
        Some(log)
    }

    /// Visit every log under `path` in order. Stops early when `visit`
    /// returns `false`.
    fn for_each_log<F>(&self, path: &Path, mut visit: F) -> Result<()>
    where
        F: FnMut(LogRecord) -> bool,
    {
        for_each_line(path, |line| match self.parse_line(line) {
            Some(log) => visit(log),
            None => true,
        })
    }

    pub fn parse(&self, path: &Path) -> Result<Vec<LogRecord>> {
        let mut logs = vec![];
        self.for_each_log(path, |log| {
            logs.push(log);
            true
        })?;
        Ok(logs)
    }

    /// First log under `path`; reading stops as soon as it is found.
    pub fn parse_first_log(&self, path: &Path) -> Result<Option<LogRecord>> {
        let mut first = None;
        self.for_each_log(path, |log| {
            first = Some(log);
            false
        })?;
        Ok(first)
    }

    /// Last log under `path`, without holding the others in memory.
    pub fn parse_last_log(&self, path: &Path) -> Result<Option<LogRecord>> {
        let mut last = None;
        self.for_each_log(path, |log| {
            last = Some(log);
            true
        })?;
        Ok(last)
    }
}
