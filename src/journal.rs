//! Per-server event log
//!
//! Append-only file with one `YYYY-MM-DD HH:MM:SS - <message>` line per
//! event. Rotation is handled by logrotate (see `render::logrotate`).

use crate::error::Result;
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Timestamp format used for every journal line
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a single journal line (without trailing newline)
pub fn format_line(at: DateTime<Local>, message: &str) -> String {
    format!("{} - {}", at.format(TIMESTAMP_FORMAT), message)
}

/// Appending writer for one server's log file
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Open (creating if needed) the log file in append mode
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append one timestamped line
    pub fn record(&mut self, message: &str) -> Result<()> {
        tracing::info!(log = %self.path.display(), "{}", message);
        let line = format_line(Local::now(), message);
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Last non-empty line of a log file, if any
pub fn last_line(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    let reader = BufReader::new(File::open(path)?);
    let mut last = None;
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    Ok(last)
}
