//! Session scenarios against a scripted portal.
//!
//! Drives the full pipeline (retry, evidence capture, network observation,
//! teardown) through the browser seam without launching Chromium:
//! - happy path with popup login, frames and keyword discovery
//! - popup never opening
//! - dashboard never becoming ready
//! - login rejected by an error redirect, or never redirected
//! - pointer jitter before the popup click
//! - launch failure, unwritable output, panicking stage

mod common;

use common::{Counters, PopupBehavior, Script, ScriptedLauncher};
use customs_probe::error::{ConfigError, ErrorKind, SessionError};
use customs_probe::retry::RetryConfig;
use customs_probe::evidence::ArtifactKind;
use customs_probe::session::{
    Orchestrator, SessionOutcome, Stage, StageOutcome, StagePolicies, StageResult,
};
use std::sync::Arc;
use tempfile::TempDir;

fn orchestrator(dir: &TempDir, launcher: &Arc<ScriptedLauncher>) -> Orchestrator {
    Orchestrator::new(common::config(dir.path()), launcher.clone())
        .with_policies(common::fast_policies())
        .unwrap()
}

fn stage<'a>(stages: &'a [StageResult], stage: Stage) -> &'a StageResult {
    stages
        .iter()
        .find(|r| r.stage == stage)
        .unwrap_or_else(|| panic!("no result for {stage}"))
}

// ── Happy path ──

#[tokio::test(start_paused = true)]
async fn test_happy_path_runs_every_stage() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
    let report = orchestrator(&dir, &launcher).run().await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    let order: Vec<Stage> = report.stages.iter().map(|r| r.stage).collect();
    assert_eq!(order, Stage::ALL.to_vec());
    assert!(report
        .stages
        .iter()
        .all(|r| r.outcome == StageOutcome::Success && r.attempts == 1));

    assert!(report.summary.login_success);
    assert!(report.summary.dashboard_loaded);
    assert!(report.summary.frames_found);

    let counters = launcher.counters();
    assert_eq!(Counters::get(&counters.launches), 1);
    assert_eq!(Counters::get(&counters.submits), 1);
    assert_eq!(Counters::get(&counters.shutdowns), 1);
    // main page and popup
    assert_eq!(Counters::get(&counters.closes), 2);
}

#[tokio::test(start_paused = true)]
async fn test_submission_keeps_hidden_fields() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
    orchestrator(&dir, &launcher).run().await.unwrap();

    let fields = launcher.submitted().expect("form was submitted");
    assert_eq!(fields["__VIEWSTATE"], "dDwtMTA4");
    assert_eq!(fields["usuario"], "agente01");
    assert_eq!(fields["clave"], "s3cret");
    assert_eq!(fields.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_reaches_into_frames() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
    let report = orchestrator(&dir, &launcher).run().await.unwrap();

    let discovery = report.summary.discovery_report.as_ref().unwrap();
    assert_eq!(discovery.frames.len(), 2);
    assert_eq!(discovery.unreadable_frames().count(), 1);
    assert!(discovery
        .matches
        .iter()
        .any(|m| m.document == "main" && m.keywords.contains(&"factura".to_string())));
    assert!(discovery
        .matches
        .iter()
        .any(|m| m.document == "frame:0" && m.keywords.contains(&"declaración".to_string())));

    let inventory = common::read_json(&report.run_dir.join("clickable_elements.json"));
    assert!(inventory["total"].as_u64().unwrap() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_run_directory_layout() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
    let report = orchestrator(&dir, &launcher).run().await.unwrap();

    let run = common::run_dir(dir.path());
    assert_eq!(run, report.run_dir);
    for sub in ["videos", "screenshots", "logs"] {
        assert!(run.join(sub).is_dir(), "{sub} missing");
    }
    for file in [
        "evidence_summary.json",
        "clickable_elements.json",
        "evidence.json",
        "logs/events.jsonl",
        "logs/trace.jsonl",
        "logs/network.jsonl",
    ] {
        assert!(run.join(file).is_file(), "{file} missing");
    }

    let trace = std::fs::read_to_string(run.join("logs/trace.jsonl")).unwrap();
    let spans: Vec<serde_json::Value> = trace
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(spans.len(), Stage::ALL.len());
    assert_eq!(spans.last().unwrap()["stage"], "teardown");

    let summary = common::read_json(&run.join("evidence_summary.json"));
    assert_eq!(summary["outcome"], "completed");
    assert_eq!(summary["loginSuccess"], true);
    assert_eq!(summary["stages"].as_array().unwrap().len(), Stage::ALL.len());

    let manifest = common::read_json(&run.join("evidence.json"));
    let files: Vec<&str> = manifest["files"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f.as_str())
        .collect();
    assert!(files.contains(&"evidence_summary.json"));
    assert!(files.iter().any(|f| f.starts_with("screenshots/")));
}

#[tokio::test(start_paused = true)]
async fn test_network_traffic_is_classified() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
    let report = orchestrator(&dir, &launcher).run().await.unwrap();

    assert_eq!(report.network.requests, 2);
    assert_eq!(report.network.navigations, 1);
    assert_eq!(report.network.api_calls, 1);
    assert_eq!(report.network.responses, 2);
    assert_eq!(report.network.error_responses, 1);

    let journal = std::fs::read_to_string(report.run_dir.join("logs/network.jsonl")).unwrap();
    let error_lines = journal
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
        .filter(|v| v["tag"] == "error")
        .count();
    assert_eq!(error_lines, 1);
}

#[tokio::test(start_paused = true)]
async fn test_screencast_frames_are_reported_as_video() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
    let mut config = common::config(dir.path());
    config.record_video = true;
    let report = Orchestrator::new(config, launcher.clone())
        .with_policies(common::fast_policies())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(report
        .artifacts
        .iter()
        .any(|a| a.kind == ArtifactKind::Video && a.captured));
}

#[tokio::test(start_paused = true)]
async fn test_missing_screencast_is_journaled() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script {
        screencast_fails: true,
        ..Script::default()
    }));
    let mut config = common::config(dir.path());
    config.record_video = true;
    let report = Orchestrator::new(config, launcher.clone())
        .with_policies(common::fast_policies())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(stage(&report.stages, Stage::Init).outcome, StageOutcome::Success);
    let events = std::fs::read_to_string(report.run_dir.join("logs/events.jsonl")).unwrap();
    let notes: Vec<serde_json::Value> = events
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
        .filter(|v| v["type"] == "Note")
        .collect();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["stage"], "init");
    assert!(notes[0]["message"]
        .as_str()
        .unwrap()
        .contains("screen recording unavailable"));
}

// ── Retries ──

#[tokio::test(start_paused = true)]
async fn test_flaky_navigation_is_retried() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script {
        navigate_failures: 2,
        ..Script::default()
    }));
    let report = orchestrator(&dir, &launcher).run().await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    let nav = stage(&report.stages, Stage::NavigateLogin);
    assert_eq!(nav.outcome, StageOutcome::Success);
    assert_eq!(nav.attempts, 3);
    assert_eq!(Counters::get(&launcher.counters().navigations), 3);

    // evidence after each failed attempt
    for attempt in 1..=2 {
        let label = format!("navigate-login-attempt-{attempt}");
        assert!(
            report
                .artifacts
                .iter()
                .any(|a| a.label == label && a.kind == ArtifactKind::Screenshot && a.captured),
            "{label} screenshot missing"
        );
    }
}

// ── Failure scenarios ──

#[tokio::test(start_paused = true)]
async fn test_popup_never_opens_fails_session() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script {
        popup: PopupBehavior::Never,
        ..Script::default()
    }));
    let report = orchestrator(&dir, &launcher).run().await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::Failed);
    let popup = stage(&report.stages, Stage::OpenPopup);
    assert_eq!(popup.outcome, StageOutcome::Failure);
    assert_eq!(popup.attempts, 3);
    assert_eq!(Counters::get(&launcher.counters().popup_clicks), 3);

    // no dashboard wait after a failed login stage
    assert!(report
        .stages
        .iter()
        .all(|r| r.stage != Stage::AwaitDashboard && r.stage != Stage::SubmitCredentials));
    assert_eq!(report.stages.last().unwrap().stage, Stage::Teardown);
    assert_eq!(Counters::get(&launcher.counters().shutdowns), 1);

    let manifest = common::read_json(&report.run_dir.join("evidence.json"));
    let labels: Vec<&str> = manifest["artifacts"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|a| a["kind"] == "screenshot")
        .filter_map(|a| a["label"].as_str())
        .collect();
    assert!(labels.iter().any(|l| l.contains("popup")), "{labels:?}");
    assert!(labels.contains(&"open-popup-failed"));
}

#[tokio::test(start_paused = true)]
async fn test_dashboard_never_ready_degrades() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script {
        dashboard_ready: false,
        ..Script::default()
    }));
    let report = orchestrator(&dir, &launcher).run().await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    let dash = stage(&report.stages, Stage::AwaitDashboard);
    assert_eq!(dash.outcome, StageOutcome::Degraded);
    assert_eq!(dash.attempts, 3);
    assert_eq!(dash.error.as_ref().unwrap().kind, ErrorKind::Transient);

    // exploration still runs on whatever rendered
    assert_eq!(
        stage(&report.stages, Stage::ExploreStructure).outcome,
        StageOutcome::Success
    );
    assert!(report.summary.login_success);
    assert!(!report.summary.dashboard_loaded);

    let summary = common::read_json(&report.run_dir.join("evidence_summary.json"));
    assert_eq!(summary["dashboardLoaded"], false);
}

#[tokio::test(start_paused = true)]
async fn test_login_rejection_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script {
        redirect_url: "https://portal.example/error?code=AUTH".into(),
        ..Script::default()
    }));
    let report = orchestrator(&dir, &launcher).run().await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::Failed);
    let submit = stage(&report.stages, Stage::SubmitCredentials);
    assert_eq!(submit.outcome, StageOutcome::Failure);
    assert_eq!(submit.attempts, 1);
    assert_eq!(submit.error.as_ref().unwrap().kind, ErrorKind::Definite);
    assert_eq!(Counters::get(&launcher.counters().submits), 1);
    assert!(!report.summary.login_success);
    assert!(report
        .artifacts
        .iter()
        .any(|a| a.label == "submit-credentials-attempt-1"));
}

#[tokio::test(start_paused = true)]
async fn test_redirect_without_marker_times_out_and_retries() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script {
        redirect_url: "https://portal.example/acceso/procesando".into(),
        ..Script::default()
    }));
    let report = orchestrator(&dir, &launcher).run().await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::Failed);
    let submit = stage(&report.stages, Stage::SubmitCredentials);
    assert_eq!(submit.outcome, StageOutcome::Failure);
    assert_eq!(submit.attempts, 3);
    let error = submit.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Transient);
    assert!(error.message.contains("timed out"), "{}", error.message);
    assert_eq!(Counters::get(&launcher.counters().submits), 3);
    assert!(!report.summary.login_success);
    assert!(report.stages.iter().all(|r| r.stage != Stage::AwaitDashboard));
}

// ── Pointer jitter ──

#[tokio::test(start_paused = true)]
async fn test_jitter_moves_pointer_before_clicking() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
    let mut config = common::config(dir.path());
    config.human_jitter = true;
    let report = Orchestrator::new(config, launcher.clone())
        .with_policies(common::fast_policies())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    let counters = launcher.counters();
    assert_eq!(Counters::get(&counters.popup_clicks), 1);
    let moves = Counters::get(&counters.moves_before_click);
    assert!((8..=16).contains(&moves), "{moves} pointer moves before the click");
    assert_eq!(Counters::get(&counters.pointer_moves), moves);
}

#[tokio::test(start_paused = true)]
async fn test_jitter_without_trigger_is_transient() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script {
        trigger_center: None,
        ..Script::default()
    }));
    let mut config = common::config(dir.path());
    config.human_jitter = true;
    let report = Orchestrator::new(config, launcher.clone())
        .with_policies(common::fast_policies())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Failed);
    let popup = stage(&report.stages, Stage::OpenPopup);
    assert_eq!(popup.attempts, 3);
    assert_eq!(popup.error.as_ref().unwrap().kind, ErrorKind::Transient);
    let counters = launcher.counters();
    assert_eq!(Counters::get(&counters.popup_clicks), 0);
    assert_eq!(Counters::get(&counters.pointer_moves), 0);
}

#[tokio::test(start_paused = true)]
async fn test_capture_failures_do_not_change_outcome() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script {
        screenshots_fail: true,
        ..Script::default()
    }));
    let report = orchestrator(&dir, &launcher).run().await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    let shots: Vec<_> = report
        .artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::Screenshot)
        .collect();
    assert!(!shots.is_empty());
    assert!(shots.iter().all(|a| !a.captured && a.bytes == 0));
}

// ── Fatal paths ──

#[test]
fn test_invalid_policies_are_rejected() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
    let zero_timeout = StagePolicies::uniform(
        RetryConfig::new(2, 100, 1.5, 1000),
        std::time::Duration::ZERO,
    );
    assert!(Orchestrator::new(common::config(dir.path()), launcher.clone())
        .with_policies(zero_timeout)
        .is_err());

    let shrinking = StagePolicies::uniform(
        RetryConfig::new(2, 100, 0.5, 1000),
        std::time::Duration::from_secs(1),
    );
    assert!(matches!(
        Orchestrator::new(common::config(dir.path()), launcher).with_policies(shrinking),
        Err(ConfigError::InvalidRetry(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_launch_failure_is_fatal_but_summarized() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script {
        launch_fails: true,
        ..Script::default()
    }));
    let err = orchestrator(&dir, &launcher).run().await.unwrap_err();

    match err {
        SessionError::Fatal {
            stage,
            source,
            run_dir,
        } => {
            assert_eq!(stage, Stage::Init);
            assert!(source.message.contains("Chromium not found"), "{}", source.message);
            assert_eq!(run_dir, common::run_dir(dir.path()));
        }
        other => panic!("expected fatal error, got {other:?}"),
    }
    let counters = launcher.counters();
    assert_eq!(Counters::get(&counters.launches), 1);
    assert_eq!(Counters::get(&counters.navigations), 0);
    assert_eq!(Counters::get(&counters.shutdowns), 0);

    let run = common::run_dir(dir.path());
    let summary = common::read_json(&run.join("evidence_summary.json"));
    assert_eq!(summary["outcome"], "failed");
    assert_eq!(summary["stages"][0]["stage"], "init");
    assert_eq!(summary["stages"][0]["error"]["kind"], "fatal");
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_output_is_fatal() {
    let dir = TempDir::new().unwrap();
    let blocked = dir.path().join("evidence");
    std::fs::write(&blocked, b"not a directory").unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
    let err = Orchestrator::new(common::config(&blocked), launcher.clone())
        .with_policies(common::fast_policies())
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Fatal {
            stage: Stage::Init,
            ..
        }
    ));
    assert_eq!(Counters::get(&launcher.counters().launches), 0);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_stage_still_tears_down() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(ScriptedLauncher::new(Script {
        panic_on_readiness: true,
        ..Script::default()
    }));
    let err = orchestrator(&dir, &launcher).run().await.unwrap_err();

    match err {
        SessionError::Aborted { stage, message, .. } => {
            assert_eq!(stage, Stage::AwaitDashboard);
            assert!(message.contains("renderer crashed"));
        }
        other => panic!("expected aborted session, got {other:?}"),
    }
    let counters = launcher.counters();
    assert_eq!(Counters::get(&counters.shutdowns), 1);
    assert_eq!(Counters::get(&counters.closes), 2);

    let run = common::run_dir(dir.path());
    let summary = common::read_json(&run.join("evidence_summary.json"));
    assert_eq!(summary["outcome"], "failed");
    let stages = summary["stages"].as_array().unwrap();
    assert_eq!(stages.last().unwrap()["stage"], "teardown");
    assert!(stages
        .iter()
        .any(|s| s["stage"] == "await_dashboard" && s["outcome"] == "failure"));
}
