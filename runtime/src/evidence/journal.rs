//! Append-only JSONL journal.
//!
//! Backs the structured event log, the stage trace and the network log of a
//! run. Each line is one serialized record; the file is created on open and
//! never truncated.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only JSONL writer.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    entries: u64,
}

impl Journal {
    /// Open or create the journal file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open journal: {}", path.display()))?;

        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            entries: 0,
        })
    }

    /// Append one record as a JSON line.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)?;
        writeln!(self.writer, "{json}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        self.entries += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines appended through this handle.
    pub fn entries(&self) -> u64 {
        self.entries
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
