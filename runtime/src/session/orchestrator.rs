//! The staged portal session.
//!
//! ## Pipeline
//!
//! ```text
//! Init ─▶ NavigateLogin ─▶ OpenPopup ─▶ SubmitCredentials ─▶ AwaitDashboard
//!                                                                 │
//!            Teardown ◀── DocumentEvidence ◀── ExploreStructure ◀─┘
//! ```
//!
//! Every stage attempt runs under the stage's [`StagePolicy`]: bounded by a
//! timeout (a timeout is a transient failure), retried with backoff, and
//! followed on failure by a screenshot and HTML dump of the page involved.
//! Exhausting a login stage fails the session and jumps to teardown; the
//! post-login stages degrade and the pipeline continues.
//!
//! Teardown consumes the session context, so it runs exactly once on every
//! exit path: success, stage failure, a fatal `Init` error, or a panic
//! inside a stage.

use crate::config::ProbeConfig;
use crate::discovery::{ClickableInventory, DiscoveryHeuristic};
use crate::error::{ConfigError, ErrorKind, SessionError, StepError};
use crate::evidence::{
    EvidenceArtifact, EvidenceCollector, EvidenceManifest, EvidenceSummary, SessionEvent,
    SessionLogSink, SummaryFacts, TraceSpan,
};
use crate::network::{NetworkObserver, NetworkStats};
use crate::renderer::{BrowserLauncher, DocumentReadiness, FrameDocument, RenderContext};
use crate::retry::{Attempted, FailureHook, RetryExecutor, RetryExhausted};
use crate::session::context::{ActivePage, SessionContext};
use crate::session::login::{classify_url, merge_credentials, plan_pointer, LoginSignal};
use crate::session::policy::{Exhaustion, StagePolicies, StagePolicy};
use crate::session::stage::{ErrorInfo, SessionOutcome, Stage, StageOutcome, StageResult};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use rand::Rng;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Attempts used, or why the stage gave up.
type StageRun = Result<u32, RetryExhausted>;

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub outcome: SessionOutcome,
    pub run_dir: PathBuf,
    pub stages: Vec<StageResult>,
    pub artifacts: Vec<EvidenceArtifact>,
    pub summary: EvidenceSummary,
    pub network: NetworkStats,
}

/// Where the login redirect was observed.
struct Landing {
    url: String,
    window: ActivePage,
}

/// Drives one session from `Init` to `Teardown`.
pub struct Orchestrator {
    config: ProbeConfig,
    launcher: Arc<dyn BrowserLauncher>,
    policies: StagePolicies,
    log_sink: Option<SessionLogSink>,
}

impl Orchestrator {
    pub fn new(config: ProbeConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            config,
            launcher,
            policies: StagePolicies::default(),
            log_sink: None,
        }
    }

    /// Replace the default stage policies, rejecting invalid retry settings
    /// or zero timeouts.
    pub fn with_policies(mut self, policies: StagePolicies) -> Result<Self, ConfigError> {
        policies.validate()?;
        self.policies = policies;
        Ok(self)
    }

    /// Route the per-run tracing file layer into this run's log directory.
    pub fn with_log_sink(mut self, sink: SessionLogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Run the whole pipeline.
    ///
    /// Stage failures end in [`SessionOutcome::Failed`] and still return
    /// `Ok`. `Err` is reserved for fatal errors and panics, and is returned
    /// only after teardown has written the summary and released the browser.
    pub async fn run(&self) -> Result<SessionReport, SessionError> {
        let clock = Instant::now();
        let mut ctx = SessionContext::new(&self.config.output_dir, Utc::now());
        ctx.store_credentials(self.config.credentials.clone());
        info!(
            session_id = ctx.session_id(),
            url = %self.config.login_url,
            "session starting"
        );

        let failure = match AssertUnwindSafe(self.drive(&mut ctx)).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(panic) => {
                let stage = ctx.stage();
                let message = panic_message(panic.as_ref());
                error!(%stage, "stage panicked: {message}");
                if stage != Stage::Teardown && ctx.result_of(stage).is_none() {
                    ctx.record(StageResult {
                        stage,
                        outcome: StageOutcome::Failure,
                        attempts: 1,
                        error: Some(ErrorInfo {
                            kind: ErrorKind::Fatal,
                            message: message.clone(),
                        }),
                    });
                }
                Some(SessionError::Aborted {
                    stage,
                    message,
                    run_dir: ctx.collector.layout().run_dir().to_path_buf(),
                })
            }
        };

        let report = self.teardown(ctx, clock).await;
        match failure {
            Some(e) => {
                error!("session ended with error: {e}");
                Err(e)
            }
            None => Ok(report),
        }
    }

    async fn drive(&self, ctx: &mut SessionContext) -> Result<(), SessionError> {
        loop {
            let stage = ctx.stage();
            if stage == Stage::Teardown {
                return Ok(());
            }
            let policy = self.policies.for_stage(stage);
            let started_at = Utc::now();
            let clock = Instant::now();
            ctx.collector.write_log(SessionEvent::StageStarted { stage });
            info!(%stage, "stage started");

            let run = match stage {
                Stage::Init => self.init(ctx, &policy).await,
                Stage::NavigateLogin => self.navigate_login(ctx, &policy).await,
                Stage::OpenPopup => self.open_popup(ctx, &policy).await,
                Stage::SubmitCredentials => self.submit_credentials(ctx, &policy).await,
                Stage::AwaitDashboard => self.await_dashboard(ctx, &policy).await,
                Stage::ExploreStructure => self.explore_structure(ctx, &policy).await,
                Stage::DocumentEvidence => self.document_evidence(ctx, &policy).await,
                Stage::Teardown => return Ok(()),
            };

            let (result, fatal_error) = match run {
                Ok(attempts) => (
                    StageResult {
                        stage,
                        outcome: StageOutcome::Success,
                        attempts,
                        error: None,
                    },
                    None,
                ),
                Err(exhausted) => {
                    let outcome = if exhausted.kind() == ErrorKind::Fatal {
                        StageOutcome::Failure
                    } else {
                        match policy.on_exhausted {
                            Exhaustion::Abort => StageOutcome::Failure,
                            Exhaustion::Degrade => StageOutcome::Degraded,
                        }
                    };
                    warn!(
                        %stage,
                        attempts = exhausted.attempts,
                        outcome = ?outcome,
                        "stage gave up: {}",
                        exhausted.last
                    );
                    self.capture_failed_stage(ctx, stage).await;
                    let result = StageResult {
                        stage,
                        outcome,
                        attempts: exhausted.attempts,
                        error: Some(ErrorInfo::from(&exhausted.last)),
                    };
                    let fatal_error =
                        (exhausted.kind() == ErrorKind::Fatal).then_some(exhausted.last);
                    (result, fatal_error)
                }
            };

            self.finish_stage(ctx, &result, started_at, clock);
            let outcome = result.outcome;
            ctx.record(result);

            if let Some(source) = fatal_error {
                return Err(SessionError::Fatal {
                    stage,
                    source,
                    run_dir: ctx.collector.layout().run_dir().to_path_buf(),
                });
            }
            if outcome == StageOutcome::Failure {
                ctx.begin_teardown();
            } else {
                ctx.advance();
            }
        }
    }

    fn finish_stage(
        &self,
        ctx: &SessionContext,
        result: &StageResult,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
    ) {
        let elapsed_ms = clock.elapsed().as_millis() as u64;
        info!(
            stage = %result.stage,
            outcome = ?result.outcome,
            attempts = result.attempts,
            elapsed_ms,
            "stage finished"
        );
        ctx.collector.write_log(SessionEvent::StageFinished {
            stage: result.stage,
            outcome: result.outcome,
            attempts: result.attempts,
            elapsed_ms,
        });
        ctx.collector.trace(&TraceSpan {
            stage: result.stage,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms,
            outcome: result.outcome,
            attempts: result.attempts,
        });
    }

    /// Screenshot of whatever window the pipeline was on when a stage gave up.
    async fn capture_failed_stage(&self, ctx: &mut SessionContext, stage: Stage) {
        let label = format!("{}-failed", stage.slug());
        let shot = match ctx.active_page() {
            Some(page) => Some(ctx.collector.screenshot(page, &label).await),
            None => None,
        };
        ctx.artifacts.extend(shot);
    }

    /// Run `step` under `policy`, capturing evidence from `page` after every
    /// failed attempt.
    async fn retry<'a, T, F, Fut>(
        &self,
        collector: &'a EvidenceCollector,
        stage: Stage,
        policy: &StagePolicy,
        page: Option<&'a dyn RenderContext>,
        mut step: F,
    ) -> (Result<Attempted<T>, RetryExhausted>, Vec<EvidenceArtifact>)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let hook = CaptureOnFailure {
            stage,
            collector,
            page,
            captured: Mutex::new(Vec::new()),
        };
        let timeout = policy.timeout;
        let result = RetryExecutor::new(policy.retry)
            .run(|attempt| bounded(timeout, stage, step(attempt)), Some(&hook))
            .await;
        (result, hook.into_captured())
    }

    // ── Init ──────────────────────────────

    async fn init(&self, ctx: &mut SessionContext, policy: &StagePolicy) -> StageRun {
        let collector = EvidenceCollector::prepare(&self.config.output_dir, ctx.started_at())
            .map_err(|e| fatal(StepError::from_anyhow(ErrorKind::Fatal, &e)))?;
        ctx.collector = collector;
        let layout = ctx.collector.layout().clone();
        info!(run_dir = %layout.run_dir().display(), "artifact directories ready");

        ctx.collector.write_log(SessionEvent::SessionStarted {
            session_id: ctx.session_id().to_string(),
            login_url: self.config.login_url.clone(),
        });
        ctx.collector
            .write_log(SessionEvent::StageStarted { stage: Stage::Init });
        if let Some(sink) = &self.log_sink {
            if let Err(e) = sink.open(&layout.session_log_path()) {
                note_degraded(&ctx.collector, format!("session log unavailable: {e:#}"));
            }
        }

        let renderer = bounded(policy.timeout, Stage::Init, async {
            self.launcher
                .launch()
                .await
                .map_err(|e| StepError::from_anyhow(ErrorKind::Fatal, &e))
        })
        .await
        .map_err(|e| fatal(StepError::fatal(format!("browser launch failed: {}", e.message))))?;
        let renderer = ctx.renderer.insert(renderer);

        let page = renderer
            .new_context()
            .await
            .map_err(|e| fatal(StepError::from_anyhow(ErrorKind::Fatal, &e)))?;

        let mut observer = NetworkObserver::open(Some(layout.network_path().as_path()));
        match page.network_feed().await {
            Ok(feed) => observer.attach("main", feed),
            Err(e) => note_degraded(
                &ctx.collector,
                format!("network capture unavailable for main page: {e:#}"),
            ),
        }
        ctx.observer = Some(observer);

        if self.config.record_video {
            if let Err(e) = page.start_screencast(&layout.videos()).await {
                note_degraded(&ctx.collector, format!("screen recording unavailable: {e:#}"));
            }
        }
        ctx.main_page = Some(page);
        ctx.active = ActivePage::Main;
        Ok(1)
    }

    // ── NavigateLogin ─────────────────────

    async fn navigate_login(&self, ctx: &mut SessionContext, policy: &StagePolicy) -> StageRun {
        let (result, captured) = {
            let page = ctx.main_page.as_deref().ok_or_else(|| missing("main page"))?;
            let url = self.config.login_url.as_str();
            let timeout_ms = policy.timeout.as_millis() as u64;
            self.retry(
                &ctx.collector,
                Stage::NavigateLogin,
                policy,
                Some(page),
                |_| async move {
                    page.navigate(url, timeout_ms)
                        .await
                        .map_err(|e| transient("login page did not load", &e))
                },
            )
            .await
        };
        ctx.artifacts.extend(captured);
        let attempted = result?;

        info!(
            url = %attempted.value.final_url,
            load_ms = attempted.value.load_time_ms,
            "login page loaded"
        );
        self.capture(ctx, "login-page").await;
        Ok(attempted.attempts)
    }

    // ── OpenPopup ─────────────────────────

    async fn open_popup(&self, ctx: &mut SessionContext, policy: &StagePolicy) -> StageRun {
        let (result, captured) = {
            let page = ctx.main_page.as_deref().ok_or_else(|| missing("main page"))?;
            let timeout_ms = policy.timeout.as_millis() as u64;
            self.retry(
                &ctx.collector,
                Stage::OpenPopup,
                policy,
                Some(page),
                |_| self.open_popup_once(page, timeout_ms),
            )
            .await
        };
        ctx.artifacts.extend(captured);
        let attempted = result?;
        let popup = attempted.value;

        match popup.current_url().await {
            Ok(url) => info!(%url, "login popup opened"),
            Err(_) => info!("login popup opened"),
        }
        match popup.network_feed().await {
            Ok(feed) => {
                if let Some(observer) = ctx.observer.as_mut() {
                    observer.attach("popup", feed);
                }
            }
            Err(e) => warn!("network capture unavailable for popup: {e:#}"),
        }
        ctx.popup = Some(popup);
        ctx.active = ActivePage::Popup;
        self.capture(ctx, "popup-opened").await;
        Ok(attempted.attempts)
    }

    async fn open_popup_once(
        &self,
        page: &dyn RenderContext,
        timeout_ms: u64,
    ) -> Result<Box<dyn RenderContext>, StepError> {
        let trigger = self.config.login_trigger.as_str();

        if self.config.human_jitter {
            let target = page
                .element_center(trigger)
                .await
                .map_err(|e| transient("login trigger lookup failed", &e))?
                .ok_or_else(|| StepError::transient("login trigger not present yet"))?;
            let plan = {
                let mut rng = rand::thread_rng();
                let start = (
                    rng.gen_range(0.0..=target.0.abs() + 200.0),
                    rng.gen_range(0.0..=target.1.abs() + 200.0),
                );
                plan_pointer(start, target, &mut rng)
            };
            for (&(x, y), pause) in plan.waypoints.iter().zip(&plan.pauses) {
                page.move_pointer(x, y)
                    .await
                    .map_err(|e| transient("pointer movement failed", &e))?;
                tokio::time::sleep(*pause).await;
            }
            debug!(
                steps = plan.waypoints.len(),
                settle_ms = plan.settle.as_millis() as u64,
                "pointer on login trigger"
            );
            tokio::time::sleep(plan.settle).await;
        }

        page.open_popup(trigger, timeout_ms)
            .await
            .map_err(|e| transient("login popup did not open", &e))
    }

    // ── SubmitCredentials ─────────────────

    async fn submit_credentials(&self, ctx: &mut SessionContext, policy: &StagePolicy) -> StageRun {
        let (result, captured) = {
            let popup = ctx.popup.as_deref().ok_or_else(|| missing("login popup"))?;
            let main = ctx.main_page.as_deref();
            let credentials = ctx.credentials().ok_or_else(|| missing("credentials"))?;
            self.retry(
                &ctx.collector,
                Stage::SubmitCredentials,
                policy,
                Some(popup),
                |_| async move {
                    let form_selector = self.config.login_form_selector.as_str();
                    let form = popup
                        .read_form(form_selector)
                        .await
                        .map_err(|e| transient("login form unreadable", &e))?;
                    let fields = merge_credentials(
                        &form,
                        credentials,
                        &self.config.username_fallbacks,
                        &self.config.password_fallbacks,
                    )?;
                    debug!(fields = fields.len(), "submitting login form");
                    popup
                        .fill_and_submit(form_selector, &fields)
                        .await
                        .map_err(|e| transient("login form submission failed", &e))?;
                    self.await_redirect(popup, main).await
                },
            )
            .await
        };
        ctx.artifacts.extend(captured);
        let attempted = result?;

        let landing = attempted.value;
        info!(url = %landing.url, window = ?landing.window, "login accepted");
        ctx.login_success = true;
        ctx.active = landing.window;
        self.capture(ctx, "post-login").await;
        Ok(attempted.attempts)
    }

    /// Poll both windows until one carries a login marker. Unbounded; the
    /// stage timeout ends it.
    async fn await_redirect(
        &self,
        popup: &dyn RenderContext,
        main: Option<&dyn RenderContext>,
    ) -> Result<Landing, StepError> {
        let markers = &self.config.markers;
        loop {
            for (window, page) in [(ActivePage::Popup, Some(popup)), (ActivePage::Main, main)] {
                let Some(page) = page else { continue };
                // the popup may close itself after submitting
                let Ok(url) = page.current_url().await else {
                    continue;
                };
                match classify_url(&url, markers) {
                    LoginSignal::Rejected(marker) => {
                        return Err(StepError::definite(format!(
                            "login rejected: {url} carries error marker '{marker}'"
                        )))
                    }
                    LoginSignal::Success(_) => return Ok(Landing { url, window }),
                    LoginSignal::Pending => {}
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    // ── AwaitDashboard ────────────────────

    async fn await_dashboard(&self, ctx: &mut SessionContext, policy: &StagePolicy) -> StageRun {
        let (result, captured) = {
            let page = ctx.active_page().ok_or_else(|| missing("dashboard page"))?;
            let min_height = self.config.ready_min_height;
            let poll = self.config.poll_interval;
            self.retry(
                &ctx.collector,
                Stage::AwaitDashboard,
                policy,
                Some(page),
                |_| async move {
                    loop {
                        let readiness: DocumentReadiness = page
                            .readiness()
                            .await
                            .map_err(|e| transient("readiness probe failed", &e))?;
                        if readiness.is_ready(min_height) {
                            return Ok::<_, StepError>(readiness);
                        }
                        debug!(?readiness, "dashboard not ready");
                        tokio::time::sleep(poll).await;
                    }
                },
            )
            .await
        };
        ctx.artifacts.extend(captured);
        let attempted = result?;

        let r = &attempted.value;
        info!(
            body_height = r.body_height,
            frames = r.frame_count,
            "dashboard ready"
        );
        ctx.dashboard_loaded = true;
        self.capture(ctx, "dashboard-ready").await;
        Ok(attempted.attempts)
    }

    // ── ExploreStructure ──────────────────

    async fn explore_structure(&self, ctx: &mut SessionContext, policy: &StagePolicy) -> StageRun {
        let (result, captured) = {
            let page = ctx.active_page().ok_or_else(|| missing("dashboard page"))?;
            self.retry(
                &ctx.collector,
                Stage::ExploreStructure,
                policy,
                Some(page),
                |_| read_documents(page),
            )
            .await
        };
        ctx.artifacts.extend(captured);
        let attempted = result?;
        let (html, frames) = attempted.value;

        let report = DiscoveryHeuristic::new(&self.config.keywords).discover(&html, &frames);
        info!(
            matches = report.matches.len(),
            frames = report.frames.len(),
            documents = report.documents_scanned,
            "structure explored"
        );

        self.capture_screenshot(ctx, "dashboard-full").await;
        let main_dump = ctx.collector.save_html("dashboard-main", &html);
        ctx.artifacts.push(main_dump);
        for frame in &frames {
            match &frame.html {
                Some(frame_html) => {
                    let dump = ctx
                        .collector
                        .save_html(&format!("frame-{}", frame.path), frame_html);
                    ctx.artifacts.push(dump);
                }
                None => {
                    let error = frame
                        .error
                        .clone()
                        .unwrap_or_else(|| "document not accessible".to_string());
                    warn!(
                        path = %frame.path,
                        src = frame.src.as_deref().unwrap_or("-"),
                        "frame unreadable: {error}"
                    );
                    ctx.collector.write_log(SessionEvent::FrameUnreadable {
                        path: frame.path.clone(),
                        src: frame.src.clone(),
                        error,
                    });
                }
            }
        }
        ctx.discovery = Some(report);
        Ok(attempted.attempts)
    }

    // ── DocumentEvidence ──────────────────

    async fn document_evidence(&self, ctx: &mut SessionContext, policy: &StagePolicy) -> StageRun {
        let (result, captured) = {
            let page = ctx.active_page().ok_or_else(|| missing("dashboard page"))?;
            self.retry(
                &ctx.collector,
                Stage::DocumentEvidence,
                policy,
                Some(page),
                |_| read_documents(page),
            )
            .await
        };
        ctx.artifacts.extend(captured);
        let attempted = result?;
        let (html, frames) = attempted.value;

        let inventory = ClickableInventory::collect(&html, &frames);
        info!(
            elements = inventory.total,
            documents = inventory.documents.len(),
            "clickable elements inventoried"
        );
        let path = ctx.collector.layout().inventory_path();
        let artifact = ctx
            .collector
            .write_json("clickable-elements", &path, &inventory);
        ctx.artifacts.push(artifact);
        ctx.inventory = Some(inventory);
        Ok(attempted.attempts)
    }

    // ── Teardown ──────────────────────────

    async fn teardown(&self, mut ctx: SessionContext, clock: Instant) -> SessionReport {
        ctx.begin_teardown();
        let started_at = Utc::now();
        let stage_clock = Instant::now();
        ctx.collector.write_log(SessionEvent::StageStarted {
            stage: Stage::Teardown,
        });
        info!(stage = %Stage::Teardown, "stage started");

        if let Some(popup) = ctx.popup.take() {
            if let Err(e) = popup.close().await {
                debug!("popup already closed: {e:#}");
            }
        }
        if let Some(page) = ctx.main_page.take() {
            if let Err(e) = page.close().await {
                debug!("main page already closed: {e:#}");
            }
        }
        let network = match ctx.observer.take() {
            Some(observer) => observer.detach().await,
            None => NetworkStats::default(),
        };
        if let Some(renderer) = ctx.renderer.take() {
            if let Err(e) = renderer.shutdown().await {
                warn!("browser shutdown failed: {e:#}");
            }
        }

        let result = StageResult {
            stage: Stage::Teardown,
            outcome: StageOutcome::Success,
            attempts: 1,
            error: None,
        };
        self.finish_stage(&ctx, &result, started_at, stage_clock);
        ctx.record(result);

        let outcome = ctx.outcome();
        let summary = EvidenceSummary::build(
            outcome,
            SummaryFacts {
                session_id: ctx.session_id().to_string(),
                login_success: ctx.login_success,
                dashboard_loaded: ctx.dashboard_loaded,
                discovery: ctx.discovery.clone(),
                network,
                stages: ctx.results().to_vec(),
            },
        );
        let summary_path = ctx.collector.layout().summary_path();
        let written = ctx
            .collector
            .write_json("evidence-summary", &summary_path, &summary);
        ctx.artifacts.push(written);

        let elapsed_ms = clock.elapsed().as_millis() as u64;
        ctx.collector.write_log(SessionEvent::SessionFinished {
            session_id: ctx.session_id().to_string(),
            outcome,
            elapsed_ms,
        });
        info!(
            session_id = ctx.session_id(),
            %outcome,
            elapsed_ms,
            run_dir = %ctx.collector.layout().run_dir().display(),
            "session finished"
        );

        let logs = ctx.collector.flush();
        ctx.artifacts.extend(logs);
        if let Some(sink) = &self.log_sink {
            sink.close();
        }

        let layout = ctx.collector.layout();
        let manifest = EvidenceManifest {
            session_id: ctx.session_id().to_string(),
            started_at: ctx.started_at(),
            finished_at: Utc::now(),
            outcome,
            run_dir: layout.run_dir().to_path_buf(),
            artifacts: ctx.artifacts.clone(),
            files: layout.list_files(),
        };
        let manifest_path = layout.manifest_path();
        let written = ctx
            .collector
            .write_json("evidence-manifest", &manifest_path, &manifest);
        ctx.artifacts.push(written);

        SessionReport {
            session_id: ctx.session_id().to_string(),
            outcome,
            run_dir: ctx.collector.layout().run_dir().to_path_buf(),
            stages: ctx.results().to_vec(),
            artifacts: ctx.artifacts,
            summary,
            network,
        }
    }

    /// Screenshot and HTML dump of the active page.
    async fn capture(&self, ctx: &mut SessionContext, label: &str) {
        let Some(page) = ctx.active_page() else {
            return;
        };
        let shot = ctx.collector.screenshot(page, label).await;
        let html = ctx.collector.dump_html(page, label).await;
        ctx.artifacts.extend([shot, html]);
    }

    async fn capture_screenshot(&self, ctx: &mut SessionContext, label: &str) {
        let shot = match ctx.active_page() {
            Some(page) => Some(ctx.collector.screenshot(page, label).await),
            None => None,
        };
        ctx.artifacts.extend(shot);
    }
}

/// Captures a screenshot and HTML dump after every failed attempt.
struct CaptureOnFailure<'a> {
    stage: Stage,
    collector: &'a EvidenceCollector,
    page: Option<&'a dyn RenderContext>,
    captured: Mutex<Vec<EvidenceArtifact>>,
}

impl CaptureOnFailure<'_> {
    fn into_captured(self) -> Vec<EvidenceArtifact> {
        self.captured.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<'a> FailureHook for CaptureOnFailure<'a> {
    async fn on_failure(&self, error: &StepError, attempt: u32) -> anyhow::Result<()> {
        warn!(
            stage = %self.stage,
            attempt,
            kind = %error.kind,
            "attempt failed: {}",
            error.message
        );
        self.collector.write_log(SessionEvent::AttemptFailed {
            stage: self.stage,
            attempt,
            kind: error.kind,
            message: error.message.clone(),
        });

        let Some(page) = self.page else {
            return Ok(());
        };
        let label = format!("{}-attempt-{attempt}", self.stage.slug());
        let shot = self.collector.screenshot(page, &label).await;
        let html = self.collector.dump_html(page, &label).await;
        self.captured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([shot, html]);
        Ok(())
    }
}

/// Warn about an Init side capability that could not start, and journal it.
fn note_degraded(collector: &EvidenceCollector, message: String) {
    warn!("{message}");
    collector.write_log(SessionEvent::Note {
        stage: Stage::Init,
        message,
    });
}

/// Bound one attempt by the stage timeout.
async fn bounded<T>(
    timeout: Duration,
    stage: Stage,
    attempt: impl Future<Output = Result<T, StepError>>,
) -> Result<T, StepError> {
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(StepError::transient(format!(
            "{stage} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Top-level HTML plus every nested frame of `page`.
async fn read_documents(page: &dyn RenderContext) -> Result<(String, Vec<FrameDocument>), StepError> {
    let html = page
        .html()
        .await
        .map_err(|e| transient("document HTML unavailable", &e))?;
    let frames = page
        .frame_documents()
        .await
        .map_err(|e| transient("frame walk failed", &e))?;
    Ok((html, frames))
}

fn transient(context: &str, err: &anyhow::Error) -> StepError {
    StepError::transient(format!("{context}: {err:#}"))
}

fn fatal(err: StepError) -> RetryExhausted {
    RetryExhausted {
        attempts: 1,
        delays: Vec::new(),
        last: StepError::new(ErrorKind::Fatal, err.message),
    }
}

fn missing(what: &str) -> RetryExhausted {
    fatal(StepError::fatal(format!("{what} is not available")))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
