//! Append-only action history (`~/.ai/action.log`) with a bounded tail read.
//!
//! Every write and every tail read goes through one mutex, so entries are
//! never interleaved and a reader never sees a half-written entry.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use tracing::{debug, instrument, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What happened, as recorded in the history log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A command about to be executed.
    Command(String),
    /// One line of command output (stdout or stderr).
    Output(String),
    Info(String),
    Error(String),
}

/// A history entry stamped with the time it was created.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub at: DateTime<Local>,
    pub kind: EntryKind,
}

impl HistoryEntry {
    pub fn new(kind: EntryKind) -> Self {
        Self {
            at: Local::now(),
            kind,
        }
    }

    pub fn command(text: impl Into<String>) -> Self {
        Self::new(EntryKind::Command(text.into()))
    }

    pub fn output(line: impl Into<String>) -> Self {
        Self::new(EntryKind::Output(line.into()))
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EntryKind::Info(message.into()))
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Self::new(EntryKind::Error(message.to_string()))
    }

    /// On-disk form of the entry, always newline-terminated.
    ///
    /// Output lines are written bare so command output reads as it did on the
    /// terminal.
    pub fn render(&self) -> String {
        let ts = self.at.format(TIMESTAMP_FORMAT);
        match &self.kind {
            EntryKind::Command(text) => format!("\n[{ts}] Command: {text}\n"),
            EntryKind::Output(line) => format!("{line}\n"),
            EntryKind::Info(text) => format!("[{ts}] Info: {text}\n"),
            EntryKind::Error(text) => format!("[{ts}] Error: {text}\n"),
        }
    }
}

/// Bounds for a tail read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailWindow {
    pub max_bytes: usize,
    pub max_lines: usize,
}

/// Durable, append-only history log.
///
/// Lifecycle: [`HistoryLog::open`], any number of [`append`](Self::append) and
/// [`tail`](Self::tail) calls (from any thread), then [`close`](Self::close).
#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl HistoryLog {
    /// Open (creating if needed) the log at `path` for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open log file {}", path.display()))?;
        debug!(path = %path.display(), "history log opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Returns only after the bytes reached the file.
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let rendered = entry.render();
        let mut file = self.lock()?;
        file.write_all(rendered.as_bytes())
            .with_context(|| format!("append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("flush {}", self.path.display()))?;
        Ok(())
    }

    /// Append, reporting a failure instead of returning it.
    ///
    /// For call sites where a lost history entry must not end the session.
    pub fn record(&self, entry: HistoryEntry) {
        if let Err(err) = self.append(&entry) {
            warn!(err = %format!("{err:#}"), "failed to append history entry");
        }
    }

    /// Return the most recent part of the log.
    ///
    /// Reads the last `max_bytes` bytes through a separate read handle. If that
    /// window starts inside the file, everything up to and including the first
    /// newline is dropped so no partial line leads the result; then only the
    /// last `max_lines` lines are kept. Returned text ends with a newline unless
    /// it is empty.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn tail(&self, window: TailWindow) -> Result<String> {
        let _guard = self.lock()?;

        let mut file = File::open(&self.path)
            .with_context(|| format!("open log file for reading {}", self.path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("stat log file {}", self.path.display()))?
            .len();

        let read_len = size.min(window.max_bytes as u64);
        let start = size - read_len;
        file.seek(SeekFrom::Start(start))
            .with_context(|| format!("seek log file {}", self.path.display()))?;
        let mut buf = Vec::with_capacity(read_len as usize);
        file.take(read_len)
            .read_to_end(&mut buf)
            .with_context(|| format!("read log file {}", self.path.display()))?;

        let text = tail_window(&buf, start > 0, window.max_lines);
        debug!(bytes = text.len(), "history tail read");
        Ok(text)
    }

    /// Close the log, surfacing any error from the final sync.
    pub fn close(self) -> Result<()> {
        let file = self
            .file
            .into_inner()
            .map_err(|_| anyhow!("history log lock poisoned"))?;
        file.sync_all()
            .with_context(|| format!("sync {}", self.path.display()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|_| anyhow!("history log lock poisoned"))
    }
}

/// Trim a raw byte window down to whole lines, keeping at most `max_lines`.
fn tail_window(buf: &[u8], starts_mid_file: bool, max_lines: usize) -> String {
    let body = if starts_mid_file {
        match buf.iter().position(|&b| b == b'\n') {
            Some(idx) => &buf[idx + 1..],
            // The whole window is one partial line.
            None => &[][..],
        }
    } else {
        buf
    };

    let text = String::from_utf8_lossy(body);
    let lines: Vec<&str> = text.lines().collect();
    let keep = &lines[lines.len().saturating_sub(max_lines)..];
    if keep.is_empty() {
        return String::new();
    }
    let mut out = keep.join("\n");
    out.push('\n');
    out
}
