//! Pipeline stages and their outcomes.

use crate::error::{ErrorKind, StepError};
use serde::{Deserialize, Serialize};

/// A named phase of the session pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    NavigateLogin,
    OpenPopup,
    SubmitCredentials,
    AwaitDashboard,
    ExploreStructure,
    DocumentEvidence,
    Teardown,
}

impl Stage {
    /// Every stage, in order.
    pub const ALL: [Stage; 8] = [
        Stage::Init,
        Stage::NavigateLogin,
        Stage::OpenPopup,
        Stage::SubmitCredentials,
        Stage::AwaitDashboard,
        Stage::ExploreStructure,
        Stage::DocumentEvidence,
        Stage::Teardown,
    ];

    /// The stage that follows on success, `None` after teardown.
    pub fn next(self) -> Option<Stage> {
        let i = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(i + 1).copied()
    }

    /// Kebab-case name used in artifact labels.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::NavigateLogin => "navigate-login",
            Self::OpenPopup => "open-popup",
            Self::SubmitCredentials => "submit-credentials",
            Self::AwaitDashboard => "await-dashboard",
            Self::ExploreStructure => "explore-structure",
            Self::DocumentEvidence => "document-evidence",
            Self::Teardown => "teardown",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// How a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Success,
    Failure,
    /// Retries were exhausted but the stage is not critical; the pipeline
    /// continues.
    Degraded,
}

/// Serializable form of the error that ended a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&StepError> for ErrorInfo {
    fn from(e: &StepError) -> Self {
        Self {
            kind: e.kind,
            message: e.message.clone(),
        }
    }
}

/// Final record of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Terminal outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    /// Every critical stage succeeded (non-critical ones may be degraded).
    Completed,
    /// A critical stage failed; the pipeline went straight to teardown.
    Failed,
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
