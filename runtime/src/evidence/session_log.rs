//! Per-run tracing sink.
//!
//! The subscriber is installed once per process, before the run directory
//! exists. The JSON file layer writes through a [`SessionLogSink`] that the
//! session opens on `logs/session-<stamp>.log` and closes at teardown;
//! records emitted while no file is open are dropped.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// Shared handle to the current session log file.
#[derive(Clone, Default)]
pub struct SessionLogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl SessionLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start writing to `path`, replacing any previously open file.
    pub fn open(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open session log {}", path.display()))?;
        *self.lock() = Some(file);
        Ok(())
    }

    /// Flush and stop writing.
    pub fn close(&self) {
        if let Some(mut file) = self.lock().take() {
            let _ = file.flush();
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<File>> {
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SessionLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLogSink")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Writer handed out per tracing event.
pub struct SinkWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SessionLogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter {
            file: Arc::clone(&self.file),
        }
    }
}
