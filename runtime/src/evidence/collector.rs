//! Best-effort evidence capture.
//!
//! No method here returns an error. A failed capture is logged at `warn` and
//! reported as an artifact with `captured == false`, so evidence problems can
//! never change a stage's outcome.

use crate::evidence::artifact::{ArtifactKind, EvidenceArtifact};
use crate::evidence::events::{LogLine, SessionEvent, TraceSpan};
use crate::evidence::journal::Journal;
use crate::evidence::layout::{slugify, ArtifactLayout};
use crate::renderer::RenderContext;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Writes screenshots, HTML dumps and structured logs for one run.
pub struct EvidenceCollector {
    layout: ArtifactLayout,
    writable: bool,
    seq: AtomicU32,
    events: Mutex<Option<Journal>>,
    trace: Mutex<Option<Journal>>,
}

impl EvidenceCollector {
    /// Create the run's directories and open its journals.
    ///
    /// Fails only when the directories cannot be created; journals that
    /// cannot be opened degrade to tracing-only logging.
    pub fn prepare(output_root: &Path, started_at: DateTime<Utc>) -> Result<Self> {
        let layout = ArtifactLayout::prepare(output_root, started_at)?;
        let events = open_journal(&layout.events_path());
        let trace = open_journal(&layout.trace_path());
        Ok(Self {
            layout,
            writable: true,
            seq: AtomicU32::new(0),
            events: Mutex::new(events),
            trace: Mutex::new(trace),
        })
    }

    /// A collector whose directories could not be created. Every capture is
    /// a logged no-op.
    pub fn detached(output_root: &Path, started_at: DateTime<Utc>) -> Self {
        Self {
            layout: ArtifactLayout::new(output_root, started_at),
            writable: false,
            seq: AtomicU32::new(0),
            events: Mutex::new(None),
            trace: Mutex::new(None),
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Capture a full-page screenshot of `page`.
    pub async fn screenshot(&self, page: &dyn RenderContext, label: &str) -> EvidenceArtifact {
        let path = self.layout.screenshots().join(self.file_name(label, "png"));
        match page.screenshot(true).await {
            Ok(png) => self.write_file(ArtifactKind::Screenshot, label, &path, &png),
            Err(e) => {
                warn!(label, "screenshot capture failed: {e:#}");
                self.missing(ArtifactKind::Screenshot, label, &path)
            }
        }
    }

    /// Dump the serialized HTML of `page`.
    pub async fn dump_html(&self, page: &dyn RenderContext, label: &str) -> EvidenceArtifact {
        let path = self.layout.logs().join(self.file_name(label, "html"));
        match page.html().await {
            Ok(html) => self.write_file(ArtifactKind::HtmlDump, label, &path, html.as_bytes()),
            Err(e) => {
                warn!(label, "HTML capture failed: {e:#}");
                self.missing(ArtifactKind::HtmlDump, label, &path)
            }
        }
    }

    /// Save markup that was already captured (e.g. a frame document).
    pub fn save_html(&self, label: &str, html: &str) -> EvidenceArtifact {
        let path = self.layout.logs().join(self.file_name(label, "html"));
        self.write_file(ArtifactKind::HtmlDump, label, &path, html.as_bytes())
    }

    /// Write `value` as pretty JSON to `path` (one of the layout's
    /// well-known files).
    pub fn write_json<T: Serialize>(&self, label: &str, path: &Path, value: &T) -> EvidenceArtifact {
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => self.write_file(ArtifactKind::StructuredLog, label, path, &bytes),
            Err(e) => {
                warn!(label, "JSON serialization failed: {e}");
                self.missing(ArtifactKind::StructuredLog, label, path)
            }
        }
    }

    /// Append a structured event to `events.jsonl`. Returns whether it was
    /// written.
    pub fn write_log(&self, event: SessionEvent) -> bool {
        append(&self.events, &LogLine::now(event))
    }

    /// Append a stage span to `trace.jsonl`.
    pub fn trace(&self, span: &TraceSpan) -> bool {
        append(&self.trace, span)
    }

    /// Flush and close the journals and report the log-type artifacts of the
    /// run (structured log, trace, network log, session log, screencast).
    pub fn flush(&self) -> Vec<EvidenceArtifact> {
        close_journal(&self.events);
        close_journal(&self.trace);
        if !self.writable {
            return Vec::new();
        }

        let mut artifacts = Vec::new();
        for (kind, label, path) in [
            (ArtifactKind::StructuredLog, "events", self.layout.events_path()),
            (ArtifactKind::Trace, "trace", self.layout.trace_path()),
            (ArtifactKind::StructuredLog, "network", self.layout.network_path()),
            (ArtifactKind::StructuredLog, "session-log", self.layout.session_log_path()),
        ] {
            if let Ok(meta) = std::fs::metadata(&path) {
                artifacts.push(EvidenceArtifact::written(kind, label, &path, meta.len()));
            }
        }

        let frames = std::fs::read_dir(self.layout.videos())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .filter(|m| m.is_file())
                    .map(|m| m.len())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if !frames.is_empty() {
            artifacts.push(EvidenceArtifact::written(
                ArtifactKind::Video,
                &format!("screencast ({} frames)", frames.len()),
                &self.layout.videos(),
                frames.iter().sum(),
            ));
        }
        artifacts
    }

    fn file_name(&self, label: &str, ext: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{seq:03}-{}.{ext}", slugify(label))
    }

    fn write_file(
        &self,
        kind: ArtifactKind,
        label: &str,
        path: &Path,
        bytes: &[u8],
    ) -> EvidenceArtifact {
        if !self.writable {
            warn!(label, "artifact directory unavailable, {kind} not written");
            return self.missing(kind, label, path);
        }
        let artifact = match std::fs::write(path, bytes) {
            Ok(()) => {
                debug!(label, path = %path.display(), bytes = bytes.len(), "{kind} captured");
                EvidenceArtifact::written(kind, label, path, bytes.len() as u64)
            }
            Err(e) => {
                warn!(label, path = %path.display(), "failed to write {kind}: {e}");
                EvidenceArtifact::missing(kind, label, path)
            }
        };
        self.note_artifact(&artifact);
        artifact
    }

    fn missing(&self, kind: ArtifactKind, label: &str, path: &Path) -> EvidenceArtifact {
        let artifact = EvidenceArtifact::missing(kind, label, path);
        self.note_artifact(&artifact);
        artifact
    }

    fn note_artifact(&self, artifact: &EvidenceArtifact) {
        self.write_log(SessionEvent::ArtifactCaptured {
            kind: artifact.kind,
            label: artifact.label.clone(),
            path: artifact.path.display().to_string(),
            captured: artifact.captured,
        });
    }
}

fn open_journal(path: &Path) -> Option<Journal> {
    match Journal::open(path) {
        Ok(j) => Some(j),
        Err(e) => {
            warn!("journal unavailable: {e:#}");
            None
        }
    }
}

fn append<T: Serialize>(journal: &Mutex<Option<Journal>>, record: &T) -> bool {
    let mut guard = journal.lock().unwrap_or_else(|e| e.into_inner());
    let Some(journal) = guard.as_mut() else {
        return false;
    };
    match journal.append(record) {
        Ok(()) => true,
        Err(e) => {
            warn!("journal write failed: {e:#}");
            false
        }
    }
}

fn close_journal(journal: &Mutex<Option<Journal>>) {
    let mut guard = journal.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(mut j) = guard.take() {
        if let Err(e) = j.flush() {
            warn!("journal flush failed: {e:#}");
        }
    }
}
