//! Structured session events: the records behind `events.jsonl` and
//! `trace.jsonl`.

use crate::error::ErrorKind;
use crate::evidence::artifact::ArtifactKind;
use crate::session::stage::{SessionOutcome, Stage, StageOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the pipeline reports while it runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    // ── Session ───────────────────────────
    /// The pipeline started.
    SessionStarted {
        session_id: String,
        login_url: String,
    },
    /// The pipeline reached a terminal outcome after teardown.
    SessionFinished {
        session_id: String,
        outcome: SessionOutcome,
        elapsed_ms: u64,
    },

    // ── Stages ────────────────────────────
    /// A stage was entered.
    StageStarted { stage: Stage },
    /// One attempt of a stage failed.
    AttemptFailed {
        stage: Stage,
        attempt: u32,
        kind: ErrorKind,
        message: String,
    },
    /// A stage finished with its final outcome.
    StageFinished {
        stage: Stage,
        outcome: StageOutcome,
        attempts: u32,
        elapsed_ms: u64,
    },

    // ── Evidence ──────────────────────────
    /// An artifact was written (or its capture failed).
    ArtifactCaptured {
        kind: ArtifactKind,
        label: String,
        path: String,
        captured: bool,
    },
    /// A nested frame could not be read during exploration.
    FrameUnreadable {
        path: String,
        src: Option<String>,
        error: String,
    },
    /// Free-form diagnostic note attached to a stage.
    Note { stage: Stage, message: String },
}

/// A journal line: the event plus when it happened.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

impl LogLine {
    pub fn now(event: SessionEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// One stage's span in `trace.jsonl`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSpan {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: StageOutcome,
    pub attempts: u32,
}
