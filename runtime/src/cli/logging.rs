//! Tracing setup for the binary.
//!
//! Console output goes to stderr (plain or JSON). A second JSON layer writes
//! through the [`SessionLogSink`], which each run points at its own
//! `logs/session-<stamp>.log`.

use crate::evidence::SessionLogSink;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default directive when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "customs_probe=debug"
    } else {
        "customs_probe=info"
    }
}

/// Install the global subscriber. Does nothing if one is already set.
pub fn init(verbose: bool, json: bool, sink: &SessionLogSink) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let console_json = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let console_plain = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let session_file = fmt::layer()
        .json()
        .with_ansi(false)
        .with_current_span(false)
        .with_writer(sink.clone());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_plain)
        .with(session_file)
        .try_init();
}
