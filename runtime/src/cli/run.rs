//! Default command: run one portal session.

use crate::cli::RunArgs;
use crate::error::SessionError;
use crate::evidence::SessionLogSink;
use crate::renderer::chromium::ChromiumLauncher;
use crate::session::{Orchestrator, SessionOutcome, SessionReport};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

/// Run a session and print its report.
///
/// Every session ends in a successful exit, including fatal session errors:
/// teardown has already written `evidence_summary.json` with the real
/// outcome by then. Only configuration problems are returned as errors.
pub async fn run(args: &RunArgs, sink: SessionLogSink, json: bool) -> Result<()> {
    let config = args.to_config().context("invalid configuration")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        output = %config.output_dir.display(),
        "customs-probe starting"
    );

    let launcher = Arc::new(ChromiumLauncher::new(
        config.chromium_path.clone(),
        config.headless,
    ));
    run_session(Orchestrator::new(config, launcher).with_log_sink(sink), json).await
}

/// Drive `orchestrator` to the end and print what it produced.
pub async fn run_session(orchestrator: Orchestrator, json: bool) -> Result<()> {
    let result = orchestrator.run().await;
    if let Err(e) = &result {
        error!(stage = %e.stage(), run_dir = %e.run_dir().display(), "session ended early: {e}");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result_json(&result))?);
    } else {
        match &result {
            Ok(report) => print_report(report),
            Err(e) => print_session_error(e),
        }
    }
    Ok(())
}

fn result_json(result: &Result<SessionReport, SessionError>) -> serde_json::Value {
    match result {
        Ok(report) => report_json(report),
        Err(e) => serde_json::json!({
            "outcome": SessionOutcome::Failed,
            "stage": e.stage(),
            "error": e.to_string(),
            "runDir": e.run_dir(),
        }),
    }
}

fn report_json(report: &SessionReport) -> serde_json::Value {
    serde_json::json!({
        "sessionId": report.session_id,
        "outcome": report.outcome,
        "runDir": report.run_dir,
        "stages": report.stages,
        "artifacts": report.artifacts.len(),
        "artifactsFailed": report.artifacts.iter().filter(|a| !a.captured).count(),
        "network": report.network,
        "recommendations": report.summary.recommendations,
    })
}

fn print_session_error(e: &SessionError) {
    println!();
    println!("  Outcome:  {}", SessionOutcome::Failed);
    println!("  Stopped:  {e}");
    println!("  Evidence: {}", e.run_dir().display());
}

fn print_report(report: &SessionReport) {
    println!();
    println!("  Session {}", report.session_id);
    println!("  Outcome:  {}", report.outcome);
    println!("  Evidence: {}", report.run_dir.display());
    println!();
    for stage in &report.stages {
        let plural = if stage.attempts == 1 { "" } else { "s" };
        print!(
            "    {:<20} {:<9} {} attempt{plural}",
            stage.stage.to_string(),
            format!("{:?}", stage.outcome).to_lowercase(),
            stage.attempts
        );
        match &stage.error {
            Some(err) => println!("  ({})", err.message),
            None => println!(),
        }
    }
    let failed = report.artifacts.iter().filter(|a| !a.captured).count();
    println!();
    println!(
        "  Artifacts: {} written, {failed} failed",
        report.artifacts.len() - failed
    );
    println!(
        "  Network:   {} requests, {} API calls, {} error responses",
        report.network.requests, report.network.api_calls, report.network.error_responses
    );
    if !report.summary.recommendations.is_empty() {
        println!();
        println!("  Next steps:");
        for rec in &report.summary.recommendations {
            println!("    - {rec}");
        }
    }
}
