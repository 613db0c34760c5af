//! Filesystem backend: one JSON object per line.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::config::FilesystemConfig;
use crate::error::{LogBookError, Result};
use crate::logger::{KeyFilter, Logger};
use crate::models::{LogRecord, LogType};

/// Appends every record as a JSON line. Bookkeeping keys are kept so the
/// file can be read back with the parsers in [`crate::parser`].
pub struct FilesystemLogger {
    name: String,
    path: PathBuf,
    echo: bool,
    filter: KeyFilter,
    appender: RollingFileAppender,
}

impl FilesystemLogger {
    pub fn new(config: &FilesystemConfig) -> Result<Self> {
        let path = config.logger_file_path.clone();
        let (dir, file_name) = split_path(&path)?;
        fs::create_dir_all(&dir)?;

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(&dir)
            .map_err(|e| LogBookError::Backend {
                backend: "filesystem",
                message: format!("cannot open {}: {e}", path.display()),
            })?;

        info!(logger = %config.logger_name, path = %path.display(), "filesystem logger ready");

        Ok(Self {
            name: config.logger_name.clone(),
            path,
            echo: config.echo,
            filter: KeyFilter::new(&config.keys),
            appender,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn split_path(path: &Path) -> Result<(PathBuf, String)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            LogBookError::Config(format!("logger_file_path has no file name: {}", path.display()))
        })?
        .to_string();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}

impl Logger for FilesystemLogger {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn write_log(&mut self, log: &LogRecord) -> Result<()> {
        let prepared = match LogType::of(log) {
            Some(LogType::Metric) => {
                self.filter.apply_prefix(self.filter.prepare_metric_log(log))
            }
            _ => self.filter.prepare_log(log),
        };
        let line = serde_json::to_string(&prepared)?;
        if self.echo {
            info!(logger = %self.name, "{}", line);
        }
        self.appender.write_all(line.as_bytes())?;
        self.appender.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.appender.flush()?;
        Ok(())
    }
}
