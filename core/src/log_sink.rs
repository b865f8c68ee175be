//! Append-only worker log file.
//!
//! Every captured worker line and every explicit application entry goes
//! through [`LogSink::append`], which serializes writers behind one lock so
//! lines are never interleaved. The file is never truncated here; readers
//! take a suffix with [`LogSink::tail`], always fresh from disk.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::warn;

use crate::{Result, VoiceLabError};

const TAIL_CHUNK_BYTES: u64 = 8 * 1024;

/// One timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message
        )
    }
}

#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LogSink {
    /// Create a sink for `path`, creating the parent directory if needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a message. Multi-line messages become one entry per line, all
    /// sharing the same timestamp.
    pub fn append(&self, message: &str) -> Result<()> {
        let mut buf = String::new();
        format_entries(&mut buf, Utc::now(), message);
        self.write_raw(&buf)
    }

    /// Blocking write of already formatted entries.
    fn write_raw(&self, buf: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| VoiceLabError::InvalidState("log writer lock poisoned".into()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf.as_bytes())?;
        Ok(())
    }

    /// Last `max_lines` lines of the log file, oldest first. A missing file
    /// yields an empty tail.
    pub fn tail(&self, max_lines: usize) -> Result<Vec<String>> {
        if max_lines == 0 {
            return Ok(Vec::new());
        }
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        let mut start = len;
        let mut buf: Vec<u8> = Vec::new();
        // Read backwards until the buffer holds more newlines than requested lines.
        while start > 0 {
            let read_len = TAIL_CHUNK_BYTES.min(start);
            start -= read_len;
            file.seek(SeekFrom::Start(start))?;
            let mut chunk = vec![0u8; read_len as usize];
            file.read_exact(&mut chunk)?;
            chunk.extend_from_slice(&buf);
            buf = chunk;
            if buf.iter().filter(|b| **b == b'\n').count() > max_lines {
                break;
            }
        }

        let text = String::from_utf8_lossy(&buf);
        let lines: Vec<&str> = text.lines().collect();
        let skip = lines.len().saturating_sub(max_lines);
        Ok(lines[skip..].iter().map(|s| s.to_string()).collect())
    }

    /// Spawn the routine that drains captured output lines into the file.
    ///
    /// The returned sender may be cloned for each output stream; lines are
    /// written in the order the channel receives them. Each line is stamped
    /// when it is received; whatever is queued is then written in one
    /// blocking call off the runtime threads. The task ends once every
    /// sender is dropped.
    pub fn spawn_pump(self: &Arc<Self>) -> (mpsc::UnboundedSender<String>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let sink = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let mut buf = String::new();
                format_entries(&mut buf, Utc::now(), &line);
                while let Ok(line) = rx.try_recv() {
                    format_entries(&mut buf, Utc::now(), &line);
                }

                let writer = Arc::clone(&sink);
                let written = task::spawn_blocking(move || writer.write_raw(&buf))
                    .await
                    .unwrap_or_else(|e| {
                        Err(VoiceLabError::InvalidState(format!("log writer task failed: {e}")))
                    });
                if let Err(e) = written {
                    warn!(
                        target: "log_sink",
                        path = %sink.path.display(),
                        error = %e,
                        "Failed to append worker output"
                    );
                }
            }
        });
        (tx, handle)
    }
}

/// One entry per line of `message`, all sharing `timestamp`. An empty
/// message still yields one (empty) entry.
fn format_entries(buf: &mut String, timestamp: DateTime<Utc>, message: &str) {
    let before = buf.len();
    for line in message.lines() {
        let entry = LogEntry {
            timestamp,
            message: line.trim_end_matches('\r').to_string(),
        };
        buf.push_str(&entry.to_string());
        buf.push('\n');
    }
    if buf.len() == before {
        let entry = LogEntry {
            timestamp,
            message: String::new(),
        };
        buf.push_str(&entry.to_string());
        buf.push('\n');
    }
}
