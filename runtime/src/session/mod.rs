//! The portal session: stages, policies and the orchestrator that drives
//! them.

pub mod context;
pub mod login;
pub mod orchestrator;
pub mod policy;
pub mod stage;

pub use orchestrator::{Orchestrator, SessionReport};
pub use policy::{Exhaustion, StagePolicies, StagePolicy};
pub use stage::{SessionOutcome, Stage, StageOutcome, StageResult};
