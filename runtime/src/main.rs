// Copyright 2026 Customs Probe Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use customs_probe::cli::{self, RunArgs};
use customs_probe::evidence::SessionLogSink;

#[derive(Parser)]
#[command(
    name = "customs-probe",
    about = "customs-probe: evidence-gathering session against the customs declaration portal",
    version,
    after_help = "Run 'customs-probe' with no command to log in and collect evidence.\nEvery flag can also be set through its CUSTOMS_PROBE_* environment variable."
)]
struct Cli {
    /// Output results and logs as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let sink = SessionLogSink::new();
    cli::logging::init(cli.verbose, cli.json, &sink);

    let result = match cli.command {
        // No subcommand → run a session
        None => cli::run::run(&cli.run, sink, cli.json).await,
        Some(Commands::Doctor) => cli::doctor::run(&cli.run).await,
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "customs-probe", &mut std::io::stdout());
            Ok(())
        }
    };

    // Exit codes: 0 once a session has run, whatever its outcome; 1 for
    // configuration errors raised before it starts
    if let Err(e) = &result {
        if cli.json {
            println!(
                "{}",
                serde_json::json!({
                    "error": true,
                    "message": format!("{e:#}"),
                })
            );
        } else {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
