//! Mutable state of one session, owned by the orchestrator.
//!
//! Stage transitions go through [`SessionContext::advance`] and
//! [`SessionContext::begin_teardown`] only, so the current stage always
//! follows the fixed order or jumps straight to teardown. Teardown itself
//! consumes the context.

use crate::config::Credentials;
use crate::discovery::{ClickableInventory, DiscoveryReport};
use crate::evidence::{EvidenceArtifact, EvidenceCollector};
use crate::network::NetworkObserver;
use crate::renderer::{RenderContext, Renderer};
use crate::session::stage::{SessionOutcome, Stage, StageOutcome, StageResult};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Which window the pipeline is currently working in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivePage {
    Main,
    Popup,
}

pub struct SessionContext {
    session_id: String,
    started_at: DateTime<Utc>,
    stage: Stage,
    results: Vec<StageResult>,
    credentials: Option<Credentials>,
    pub(crate) collector: EvidenceCollector,
    pub(crate) observer: Option<NetworkObserver>,
    pub(crate) renderer: Option<Box<dyn Renderer>>,
    pub(crate) main_page: Option<Box<dyn RenderContext>>,
    pub(crate) popup: Option<Box<dyn RenderContext>>,
    pub(crate) active: ActivePage,
    pub(crate) artifacts: Vec<EvidenceArtifact>,
    pub(crate) login_success: bool,
    pub(crate) dashboard_loaded: bool,
    pub(crate) discovery: Option<DiscoveryReport>,
    pub(crate) inventory: Option<ClickableInventory>,
}

impl SessionContext {
    /// A fresh context in `Init`. Evidence capture is detached until the
    /// artifact layout has been prepared.
    pub fn new(output_root: &Path, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            stage: Stage::Init,
            results: Vec::new(),
            credentials: None,
            collector: EvidenceCollector::detached(output_root, started_at),
            observer: None,
            renderer: None,
            main_page: None,
            popup: None,
            active: ActivePage::Main,
            artifacts: Vec::new(),
            login_success: false,
            dashboard_loaded: false,
            discovery: None,
            inventory: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn result_of(&self, stage: Stage) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    /// Store the credentials. Returns `false` if they were already set.
    pub fn store_credentials(&mut self, credentials: Credentials) -> bool {
        if self.credentials.is_some() {
            return false;
        }
        self.credentials = Some(credentials);
        true
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// The window stages currently operate on.
    pub fn active_page(&self) -> Option<&dyn RenderContext> {
        match self.active {
            ActivePage::Popup => self.popup.as_deref().or(self.main_page.as_deref()),
            ActivePage::Main => self.main_page.as_deref(),
        }
    }

    /// Record the current stage's result.
    pub fn record(&mut self, result: StageResult) {
        debug_assert_eq!(result.stage, self.stage);
        self.results.push(result);
    }

    /// Move to the successor of the current stage.
    pub fn advance(&mut self) -> Stage {
        self.stage = self.stage.next().unwrap_or(Stage::Teardown);
        self.stage
    }

    /// Jump to teardown. Returns `false` if the session was already there.
    pub fn begin_teardown(&mut self) -> bool {
        if self.stage == Stage::Teardown {
            return false;
        }
        self.stage = Stage::Teardown;
        true
    }

    /// `Failed` as soon as any stage failed.
    pub fn outcome(&self) -> SessionOutcome {
        if self
            .results
            .iter()
            .any(|r| r.outcome == StageOutcome::Failure)
        {
            SessionOutcome::Failed
        } else {
            SessionOutcome::Completed
        }
    }
}
