//! On-disk layout of one run.
//!
//! ```text
//! <output>/run-YYYYMMDD-HHMMSS-mmm/
//!   videos/                      screencast frames
//!   screenshots/                 NNN-<label>.png
//!   logs/                        NNN-<label>.html, events.jsonl, network.jsonl,
//!                                trace.jsonl, session-<stamp>.log
//!   evidence_summary.json
//!   clickable_elements.json
//!   evidence.json
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "evidence_summary.json";
pub const INVENTORY_FILE: &str = "clickable_elements.json";
pub const MANIFEST_FILE: &str = "evidence.json";

/// Directories and well-known files of a run, namespaced by start time.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    run_dir: PathBuf,
    stamp: String,
}

impl ArtifactLayout {
    /// Compute the layout without touching the filesystem.
    pub fn new(output_root: &Path, started_at: DateTime<Utc>) -> Self {
        let stamp = started_at.format("%Y%m%d-%H%M%S-%3f").to_string();
        Self {
            run_dir: output_root.join(format!("run-{stamp}")),
            stamp,
        }
    }

    /// Create every directory of the layout.
    pub fn prepare(output_root: &Path, started_at: DateTime<Utc>) -> Result<Self> {
        let layout = Self::new(output_root, started_at);
        for dir in [layout.videos(), layout.screenshots(), layout.logs()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("cannot create artifact directory {}", dir.display()))?;
        }
        Ok(layout)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    pub fn videos(&self) -> PathBuf {
        self.run_dir.join("videos")
    }

    pub fn screenshots(&self) -> PathBuf {
        self.run_dir.join("screenshots")
    }

    pub fn logs(&self) -> PathBuf {
        self.run_dir.join("logs")
    }

    pub fn trace_path(&self) -> PathBuf {
        self.logs().join("trace.jsonl")
    }

    pub fn events_path(&self) -> PathBuf {
        self.logs().join("events.jsonl")
    }

    pub fn network_path(&self) -> PathBuf {
        self.logs().join("network.jsonl")
    }

    pub fn session_log_path(&self) -> PathBuf {
        self.logs().join(format!("session-{}.log", self.stamp))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.run_dir.join(SUMMARY_FILE)
    }

    pub fn inventory_path(&self) -> PathBuf {
        self.run_dir.join(INVENTORY_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join(MANIFEST_FILE)
    }

    /// Every file under the run directory, relative to it, sorted.
    pub fn list_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_files(&self.run_dir, &self.run_dir, &mut files);
        files.sort();
        files
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
}

/// Turn a free-form label into a file-name fragment.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    let mut last_dash = true;
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("artifact");
    }
    slug.truncate(80);
    slug
}
