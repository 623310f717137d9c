//! Evidence capture and reporting for a run.

pub mod artifact;
pub mod collector;
pub mod events;
pub mod journal;
pub mod layout;
pub mod session_log;
pub mod summary;

pub use artifact::{ArtifactKind, EvidenceArtifact};
pub use collector::EvidenceCollector;
pub use events::{LogLine, SessionEvent, TraceSpan};
pub use layout::ArtifactLayout;
pub use session_log::SessionLogSink;
pub use summary::{EvidenceManifest, EvidenceSummary, SummaryFacts};
