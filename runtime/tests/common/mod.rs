//! Scripted portal used by the session scenario tests.
//!
//! Implements the browser seam without a browser: every page answers from a
//! shared [`Script`] and bumps shared [`Counters`], so a test can both steer
//! the portal and assert how the pipeline drove it.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use customs_probe::config::{Credentials, LoginMarkers, ProbeConfig};
use customs_probe::network::{self, NetworkEvent, NetworkFeed, ResourceKind};
use customs_probe::renderer::{
    BrowserLauncher, DocumentReadiness, FormSnapshot, FrameDocument, NavigationResult,
    RenderContext, Renderer,
};
use customs_probe::retry::RetryConfig;
use customs_probe::session::StagePolicies;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const LOGIN_URL: &str = "https://portal.example/inicio";
pub const POPUP_URL: &str = "https://portal.example/acceso/login";
pub const DASHBOARD_URL: &str = "https://portal.example/dashboard/home";

/// 1x1 transparent PNG.
const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupBehavior {
    Opens,
    Never,
}

/// How the fake portal behaves.
#[derive(Debug, Clone)]
pub struct Script {
    pub launch_fails: bool,
    /// Navigations that fail before one succeeds.
    pub navigate_failures: u32,
    pub popup: PopupBehavior,
    /// URL the popup reports once the form has been submitted.
    pub redirect_url: String,
    pub dashboard_ready: bool,
    pub panic_on_readiness: bool,
    pub screenshots_fail: bool,
    pub screencast_fails: bool,
    /// Where the login trigger sits; `None` while it is not rendered.
    pub trigger_center: Option<(f64, f64)>,
    pub dashboard_html: String,
    pub frames: Vec<FrameDocument>,
    pub form: FormSnapshot,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            launch_fails: false,
            navigate_failures: 0,
            popup: PopupBehavior::Opens,
            redirect_url: DASHBOARD_URL.to_string(),
            dashboard_ready: true,
            panic_on_readiness: false,
            screenshots_fail: false,
            screencast_fails: false,
            trigger_center: Some((640.0, 120.0)),
            dashboard_html: dashboard_html(),
            frames: dashboard_frames(),
            form: login_form(),
        }
    }
}

/// What the pipeline did to the portal.
#[derive(Debug, Default)]
pub struct Counters {
    pub launches: AtomicU32,
    pub navigations: AtomicU32,
    pub popup_clicks: AtomicU32,
    pub pointer_moves: AtomicU32,
    /// Pointer moves already made when the trigger was first clicked.
    pub moves_before_click: AtomicU32,
    pub submits: AtomicU32,
    pub readiness_polls: AtomicU32,
    pub closes: AtomicU32,
    pub shutdowns: AtomicU32,
}

impl Counters {
    pub fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

struct Shared {
    script: Script,
    counters: Arc<Counters>,
    submitted: Mutex<Option<BTreeMap<String, String>>>,
}

/// Launcher handing out scripted renderers.
pub struct ScriptedLauncher {
    shared: Arc<Shared>,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            shared: Arc::new(Shared {
                script,
                counters: Arc::new(Counters::default()),
                submitted: Mutex::new(None),
            }),
        }
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.shared.counters)
    }

    /// Fields of the last form submission.
    pub fn submitted(&self) -> Option<BTreeMap<String, String>> {
        self.shared.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Box<dyn Renderer>> {
        self.shared.counters.launches.fetch_add(1, Ordering::SeqCst);
        if self.shared.script.launch_fails {
            bail!("Chromium not found");
        }
        Ok(Box::new(ScriptedRenderer {
            shared: Arc::clone(&self.shared),
            active: Arc::new(AtomicU32::new(0)),
        }))
    }
}

struct ScriptedRenderer {
    shared: Arc<Shared>,
    active: Arc<AtomicU32>,
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPage::new(
            Arc::clone(&self.shared),
            Window::Main,
            "about:blank",
        )))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shared.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Main,
    Popup,
}

struct ScriptedPage {
    shared: Arc<Shared>,
    window: Window,
    url: Mutex<String>,
    submitted: AtomicBool,
}

impl ScriptedPage {
    fn new(shared: Arc<Shared>, window: Window, url: &str) -> Self {
        Self {
            shared,
            window,
            url: Mutex::new(url.to_string()),
            submitted: AtomicBool::new(false),
        }
    }

    fn script(&self) -> &Script {
        &self.shared.script
    }
}

#[async_trait]
impl RenderContext for ScriptedPage {
    async fn navigate(&self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        let n = self.shared.counters.navigations.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.script().navigate_failures {
            bail!("net::ERR_CONNECTION_RESET at {url}");
        }
        *self.url.lock().unwrap() = url.to_string();
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 120,
        })
    }

    async fn current_url(&self) -> Result<String> {
        if self.window == Window::Popup && self.submitted.load(Ordering::SeqCst) {
            return Ok(self.script().redirect_url.clone());
        }
        Ok(self.url.lock().unwrap().clone())
    }

    async fn html(&self) -> Result<String> {
        match self.window {
            Window::Popup if !self.submitted.load(Ordering::SeqCst) => Ok(
                r#"<html><body><form action="/auth"><input name="usuario"><input type="password" name="clave"></form></body></html>"#
                    .to_string(),
            ),
            _ => Ok(self.script().dashboard_html.clone()),
        }
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>> {
        if self.script().screenshots_fail {
            bail!("compositor unavailable");
        }
        Ok(PNG.to_vec())
    }

    async fn element_center(&self, _selector: &str) -> Result<Option<(f64, f64)>> {
        Ok(self.script().trigger_center)
    }

    async fn move_pointer(&self, _x: f64, _y: f64) -> Result<()> {
        self.shared
            .counters
            .pointer_moves
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_popup(&self, _selector: &str, _timeout_ms: u64) -> Result<Box<dyn RenderContext>> {
        let counters = &self.shared.counters;
        if counters.popup_clicks.fetch_add(1, Ordering::SeqCst) == 0 {
            counters
                .moves_before_click
                .store(counters.pointer_moves.load(Ordering::SeqCst), Ordering::SeqCst);
        }
        match self.script().popup {
            PopupBehavior::Opens => Ok(Box::new(ScriptedPage::new(
                Arc::clone(&self.shared),
                Window::Popup,
                POPUP_URL,
            ))),
            PopupBehavior::Never => Err(anyhow!("no new window appeared")),
        }
    }

    async fn read_form(&self, _form_selector: &str) -> Result<FormSnapshot> {
        Ok(self.script().form.clone())
    }

    async fn fill_and_submit(
        &self,
        _form_selector: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.shared.counters.submits.fetch_add(1, Ordering::SeqCst);
        *self.shared.submitted.lock().unwrap() = Some(fields.clone());
        self.submitted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn readiness(&self) -> Result<DocumentReadiness> {
        self.shared
            .counters
            .readiness_polls
            .fetch_add(1, Ordering::SeqCst);
        if self.script().panic_on_readiness {
            panic!("renderer crashed while probing readiness");
        }
        if self.script().dashboard_ready {
            Ok(DocumentReadiness {
                ready_state: "complete".into(),
                body_height: 900,
                frame_count: self.script().frames.len() as u32,
            })
        } else {
            Ok(DocumentReadiness {
                ready_state: "complete".into(),
                body_height: 0,
                frame_count: 0,
            })
        }
    }

    async fn frame_documents(&self) -> Result<Vec<FrameDocument>> {
        Ok(self.script().frames.clone())
    }

    async fn network_feed(&self) -> Result<NetworkFeed> {
        let (tx, feed) = network::feed();
        // only the main window reports traffic; the sender drops here so the
        // observer task ends once the events are drained
        if self.window == Window::Main {
            for event in main_traffic() {
                let _ = tx.send(event);
            }
        }
        Ok(feed)
    }

    async fn start_screencast(&self, dir: &Path) -> Result<()> {
        if self.script().screencast_fails {
            bail!("Page.startScreencast is not supported");
        }
        std::fs::write(dir.join("frame-00001.jpg"), [0xFF, 0xD8, 0xFF, 0xD9])?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.shared.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Fixtures ──

fn main_traffic() -> Vec<NetworkEvent> {
    vec![
        NetworkEvent::Request {
            request_id: "1".into(),
            method: "GET".into(),
            url: LOGIN_URL.into(),
            resource: ResourceKind::Document,
        },
        NetworkEvent::Response {
            request_id: "1".into(),
            url: LOGIN_URL.into(),
            status: 200,
            resource: ResourceKind::Document,
        },
        NetworkEvent::Request {
            request_id: "2".into(),
            method: "POST".into(),
            url: "https://portal.example/api/session".into(),
            resource: ResourceKind::Xhr,
        },
        NetworkEvent::Response {
            request_id: "2".into(),
            url: "https://portal.example/api/session".into(),
            status: 503,
            resource: ResourceKind::Xhr,
        },
    ]
}

pub fn login_form() -> FormSnapshot {
    FormSnapshot {
        action: Some("/auth".into()),
        fields: BTreeMap::from([
            ("__VIEWSTATE".to_string(), "dDwtMTA4".to_string()),
            ("usuario".to_string(), String::new()),
            ("clave".to_string(), String::new()),
        ]),
        username_field: Some("usuario".into()),
        password_field: Some("clave".into()),
    }
}

pub fn dashboard_html() -> String {
    r#"<html><body>
        <nav>
          <a href="/facturas" id="menu-facturas">Consultar Facturas</a>
          <a href="/perfil">Mi perfil</a>
        </nav>
        <iframe name="contenido" src="/frames/declaraciones"></iframe>
        <iframe name="externo" src="https://terceros.example/widget"></iframe>
      </body></html>"#
        .to_string()
}

pub fn dashboard_frames() -> Vec<FrameDocument> {
    vec![
        FrameDocument {
            index: 0,
            path: "0".into(),
            name: Some("contenido".into()),
            src: Some("/frames/declaraciones".into()),
            html: Some(
                r#"<html><body><button id="btn-nueva">Nueva declaración</button></body></html>"#
                    .into(),
            ),
            error: None,
        },
        FrameDocument {
            index: 1,
            path: "1".into(),
            name: Some("externo".into()),
            src: Some("https://terceros.example/widget".into()),
            html: None,
            error: Some("cross-origin frame".into()),
        },
    ]
}

/// Config pointing at the scripted portal with jitter and video off.
pub fn config(output_dir: &Path) -> ProbeConfig {
    let mut config = ProbeConfig::new(
        LOGIN_URL,
        Credentials::new("agente01", "s3cret"),
        output_dir.to_path_buf(),
    );
    config.human_jitter = false;
    config.record_video = false;
    config.poll_interval = Duration::from_millis(50);
    config.markers = LoginMarkers {
        success: vec!["/dashboard".into()],
        error: vec!["/error".into()],
    };
    config
}

/// Two retries, short delays, and a two second bound per attempt.
pub fn fast_policies() -> StagePolicies {
    StagePolicies::uniform(RetryConfig::new(2, 100, 1.5, 1000), Duration::from_secs(2))
}

/// The single `run-*` directory under `output_dir`.
pub fn run_dir(output_dir: &Path) -> PathBuf {
    let runs: Vec<PathBuf> = std::fs::read_dir(output_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(runs.len(), 1, "expected exactly one run directory: {runs:?}");
    runs.into_iter().next().unwrap()
}

pub fn read_json(path: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("{} unreadable: {e}", path.display()));
    serde_json::from_str(&text).unwrap()
}
