//! End-of-run reports: `evidence_summary.json` for humans and `evidence.json`
//! as the machine-readable manifest of everything written.

use crate::discovery::DiscoveryReport;
use crate::evidence::artifact::EvidenceArtifact;
use crate::network::NetworkStats;
use crate::session::stage::{SessionOutcome, StageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What the run established, plus follow-up suggestions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSummary {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub outcome: SessionOutcome,
    pub login_success: bool,
    pub dashboard_loaded: bool,
    pub frames_found: bool,
    pub discovery_report: Option<DiscoveryReport>,
    pub network: NetworkStats,
    pub stages: Vec<StageResult>,
    pub recommendations: Vec<String>,
}

/// Facts gathered by the session, before recommendations are derived.
#[derive(Debug, Clone, Default)]
pub struct SummaryFacts {
    pub session_id: String,
    pub login_success: bool,
    pub dashboard_loaded: bool,
    pub discovery: Option<DiscoveryReport>,
    pub network: NetworkStats,
    pub stages: Vec<StageResult>,
}

impl EvidenceSummary {
    pub fn build(outcome: SessionOutcome, facts: SummaryFacts) -> Self {
        let recommendations = recommendations(&facts);
        Self {
            timestamp: Utc::now(),
            session_id: facts.session_id,
            outcome,
            login_success: facts.login_success,
            dashboard_loaded: facts.dashboard_loaded,
            frames_found: facts
                .discovery
                .as_ref()
                .is_some_and(DiscoveryReport::frames_found),
            discovery_report: facts.discovery,
            network: facts.network,
            stages: facts.stages,
            recommendations,
        }
    }
}

/// Follow-up suggestions derived from what the run observed.
pub fn recommendations(facts: &SummaryFacts) -> Vec<String> {
    let mut out = Vec::new();

    if !facts.login_success {
        out.push(
            "Login was not confirmed: review the popup screenshots and the session log, \
             then verify the credentials and the login markers."
                .to_string(),
        );
    } else if !facts.dashboard_loaded {
        out.push(
            "Login succeeded but the dashboard never looked ready: increase the dashboard \
             wait or inspect the dashboard screenshot for a slow or blank page."
                .to_string(),
        );
    }

    if let Some(report) = &facts.discovery {
        if report.frames_found() {
            out.push(format!(
                "The dashboard uses {} frame(s): navigation likely happens inside frames, \
                 check the per-frame HTML dumps.",
                report.frames.len()
            ));
        }
        let unreadable = report.unreadable_frames().count();
        if unreadable > 0 {
            out.push(format!(
                "{unreadable} frame(s) could not be read (cross-origin or not yet loaded): \
                 open their src URLs directly to inspect them."
            ));
        }
        if report.matches.is_empty() {
            out.push(
                "No element matched the workflow keywords: extend the keyword set or walk \
                 the clickable inventory manually."
                    .to_string(),
            );
        } else {
            out.push(format!(
                "{} element(s) matched the workflow keywords: start with those in the \
                 discovery report.",
                report.matches.len()
            ));
        }
    }

    if facts.network.api_calls > 0 {
        out.push(format!(
            "{} API call(s) were observed: the network log may reveal endpoints behind \
             the target workflow.",
            facts.network.api_calls
        ));
    }
    if facts.network.error_responses > 0 {
        out.push(format!(
            "{} response(s) had an error status: check network.jsonl for failing endpoints.",
            facts.network.error_responses
        ));
    }
    out.push("Review the network log and the screencast for the full interaction.".to_string());
    out
}

/// Manifest of a run: every artifact record and every file on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceManifest {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: SessionOutcome,
    pub run_dir: PathBuf,
    pub artifacts: Vec<EvidenceArtifact>,
    /// Paths relative to `run_dir`.
    pub files: Vec<PathBuf>,
}
