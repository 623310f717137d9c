//! Chromium-based renderer using chromiumoxide.
//!
//! Page-level operations run as small scripts that return a JSON string,
//! which is parsed back into the seam's types. Network notifications and
//! screencast frames are forwarded from CDP event streams by spawned tasks
//! that end when the page goes away.

use super::{
    js_string, BrowserLauncher, DocumentReadiness, FormSnapshot, FrameDocument, NavigationResult,
    RenderContext, Renderer,
};
use crate::network::{self, NetworkEvent, NetworkFeed, ResourceKind};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventScreencastFrame, ScreencastFrameAckParams,
    StartScreencastFormat, StartScreencastParams,
};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Interval between checks for a newly opened window.
const POPUP_POLL: Duration = Duration::from_millis(200);

/// Find the Chromium binary path.
///
/// Priority:
/// 1. `configured` (from `--chromium-path`/`CUSTOMS_PROBE_CHROMIUM_PATH`)
/// 2. `~/.customs-probe/chromium/`
/// 3. System PATH
pub fn find_chromium(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        warn!(path = %path.display(), "configured Chromium path does not exist");
    }

    if let Some(home) = dirs::home_dir() {
        let root = home.join(".customs-probe/chromium");
        let candidates = if cfg!(target_os = "macos") {
            vec![
                root.join("chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                root.join("chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                root.join("chrome"),
            ]
        } else {
            vec![root.join("chrome-linux64/chrome"), root.join("chrome")]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    ["google-chrome", "chromium", "chromium-browser"]
        .iter()
        .find_map(|bin| which::which(bin).ok())
}

/// Launches a local Chromium for each session.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    chromium_path: Option<PathBuf>,
    headless: bool,
}

impl ChromiumLauncher {
    pub fn new(chromium_path: Option<PathBuf>, headless: bool) -> Self {
        Self {
            chromium_path,
            headless,
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn Renderer>> {
        let renderer = ChromiumRenderer::launch(self.chromium_path.as_deref(), self.headless).await?;
        Ok(Box::new(renderer))
    }
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Arc<Mutex<Browser>>,
    handler: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a Chromium instance.
    pub async fn launch(chromium_path: Option<&Path>, headless: bool) -> Result<Self> {
        let chrome_path = find_chromium(chromium_path).context(
            "Chromium not found. Set CUSTOMS_PROBE_CHROMIUM_PATH or install google-chrome/chromium.",
        )?;
        debug!(path = %chrome_path.display(), headless, "launching Chromium");

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(1366, 900)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking");
        builder = if headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler: {e}");
                }
            }
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            handler,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            browser: Arc::clone(&self.browser),
            active_count: Arc::clone(&self.active_count),
            popup_baseline: Default::default(),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await.context("failed to close Chromium");
        let _ = browser.wait().await;
        self.handler.abort();
        closed.map(|_| ())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium page: the main tab or a popup window.
pub struct ChromiumContext {
    page: Page,
    browser: Arc<Mutex<Browser>>,
    active_count: Arc<AtomicUsize>,
    /// Windows and their URLs before the first unanswered popup click.
    popup_baseline: std::sync::Mutex<Option<HashMap<TargetId, Option<String>>>>,
}

impl ChromiumContext {
    /// Evaluate a script that returns `JSON.stringify(...)` and parse it.
    async fn eval_json<T: DeserializeOwned + Send>(&self, script: &str) -> Result<T> {
        let raw: String = self
            .page
            .evaluate(script)
            .await
            .context("script evaluation failed")?
            .into_value()
            .map_err(|e| anyhow!("script did not return a string: {e:?}"))?;
        serde_json::from_str(&raw).context("script returned malformed JSON")
    }

    /// Every open window with its current URL.
    async fn windows(&self) -> Result<Vec<(Page, Option<String>)>> {
        let pages = self
            .browser
            .lock()
            .await
            .pages()
            .await
            .context("failed to list windows")?;
        let mut windows = Vec::with_capacity(pages.len());
        for page in pages {
            let url = page.url().await.ok().flatten();
            windows.push((page, url));
        }
        Ok(windows)
    }

    /// The baseline kept from an earlier attempt, or a fresh snapshot.
    async fn popup_baseline(&self) -> Result<HashMap<TargetId, Option<String>>> {
        let kept = self
            .popup_baseline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(baseline) = kept {
            return Ok(baseline);
        }
        let baseline: HashMap<_, _> = self
            .windows()
            .await?
            .into_iter()
            .map(|(page, url)| (page.target_id().clone(), url))
            .collect();
        *self.popup_baseline.lock().unwrap_or_else(|e| e.into_inner()) = Some(baseline.clone());
        Ok(baseline)
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result =
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await;

        match result {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms: start.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn html(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        self.page
            .screenshot(params)
            .await
            .context("screenshot failed")
    }

    async fn element_center(&self, selector: &str) -> Result<Option<(f64, f64)>> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return JSON.stringify(null);
                el.scrollIntoView({{ block: 'center' }});
                const r = el.getBoundingClientRect();
                return JSON.stringify([r.left + r.width / 2, r.top + r.height / 2]);
            }})()"#,
            sel = js_string(selector)
        );
        self.eval_json(&script).await
    }

    async fn move_pointer(&self, x: f64, y: f64) -> Result<()> {
        self.page
            .move_mouse(Point::new(x, y))
            .await
            .context("pointer move failed")?;
        Ok(())
    }

    async fn open_popup(&self, selector: &str, timeout_ms: u64) -> Result<Box<dyn RenderContext>> {
        let baseline = self.popup_baseline().await?;
        let main = self.page.target_id().clone();

        self.page
            .find_element(selector)
            .await
            .with_context(|| format!("no element matches {selector}"))?
            .click()
            .await
            .context("click failed")?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let windows = self.windows().await?;
            let seen: Vec<(TargetId, Option<String>)> = windows
                .iter()
                .map(|(page, url)| (page.target_id().clone(), url.clone()))
                .collect();
            if let Some(index) = find_popup(&main, &baseline, &seen) {
                if let Some((page, url)) = windows.into_iter().nth(index) {
                    debug!(url = url.as_deref().unwrap_or("-"), "popup window found");
                    *self.popup_baseline.lock().unwrap_or_else(|e| e.into_inner()) = None;
                    self.active_count.fetch_add(1, Ordering::Relaxed);
                    return Ok(Box::new(ChromiumContext {
                        page,
                        browser: Arc::clone(&self.browser),
                        active_count: Arc::clone(&self.active_count),
                        popup_baseline: Default::default(),
                    }));
                }
            }
            if Instant::now() >= deadline {
                bail!("no new window within {timeout_ms}ms");
            }
            tokio::time::sleep(POPUP_POLL).await;
        }
    }

    async fn read_form(&self, form_selector: &str) -> Result<FormSnapshot> {
        let script = format!(
            r#"(() => {{
                const form = document.querySelector({sel}) || document.forms[0];
                if (!form) return JSON.stringify(null);
                const fields = {{}};
                let user = null, pass = null;
                for (const el of Array.from(form.elements)) {{
                    if (!el.name || el.disabled) continue;
                    const type = (el.type || '').toLowerCase();
                    if (['submit', 'button', 'image', 'reset', 'file'].includes(type)) continue;
                    if ((type === 'checkbox' || type === 'radio') && !el.checked) continue;
                    fields[el.name] = el.value == null ? '' : String(el.value);
                    if (type === 'password' && pass === null) pass = el.name;
                    if ((type === 'text' || type === 'email') && user === null) user = el.name;
                }}
                return JSON.stringify({{
                    action: form.getAttribute('action'),
                    fields,
                    usernameField: user,
                    passwordField: pass,
                }});
            }})()"#,
            sel = js_string(form_selector)
        );
        let snapshot: Option<FormSnapshot> = self.eval_json(&script).await?;
        snapshot.with_context(|| format!("no form matches {form_selector}"))
    }

    async fn fill_and_submit(
        &self,
        form_selector: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        let values = serde_json::to_string(fields).context("failed to encode form values")?;
        let script = format!(
            r#"(() => {{
                const form = document.querySelector({sel}) || document.forms[0];
                if (!form) return JSON.stringify(false);
                for (const [name, value] of Object.entries({values})) {{
                    let el = form.elements.namedItem(name);
                    if (el && !el.tagName && el.length) el = el[0];
                    if (!el) {{
                        el = document.createElement('input');
                        el.type = 'hidden';
                        el.name = name;
                        form.appendChild(el);
                    }}
                    el.value = value;
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                }}
                setTimeout(() => form.requestSubmit ? form.requestSubmit() : form.submit(), 0);
                return JSON.stringify(true);
            }})()"#,
            sel = js_string(form_selector)
        );
        let submitted: bool = self.eval_json(&script).await?;
        if !submitted {
            bail!("no form matches {form_selector}");
        }
        Ok(())
    }

    async fn readiness(&self) -> Result<DocumentReadiness> {
        self.eval_json(
            r#"JSON.stringify({
                readyState: document.readyState,
                bodyHeight: document.body
                    ? Math.round(document.body.getBoundingClientRect().height)
                    : 0,
                frameCount: document.querySelectorAll('frame, iframe').length,
            })"#,
        )
        .await
    }

    async fn frame_documents(&self) -> Result<Vec<FrameDocument>> {
        self.eval_json(
            r#"(() => {
                const out = [];
                let index = 0;
                const walk = (doc, prefix) => {
                    Array.from(doc.querySelectorAll('frame, iframe')).forEach((el, i) => {
                        const path = prefix === '' ? String(i) : prefix + '.' + i;
                        const entry = {
                            index: index++,
                            path,
                            name: el.getAttribute('name') || el.id || null,
                            src: el.getAttribute('src'),
                            html: null,
                            error: null,
                        };
                        out.push(entry);
                        try {
                            const child = el.contentDocument;
                            if (!child || !child.documentElement) {
                                entry.error = 'document not accessible';
                                return;
                            }
                            entry.html = child.documentElement.outerHTML;
                            walk(child, path);
                        } catch (e) {
                            entry.error = String((e && e.message) || e);
                        }
                    });
                };
                walk(document, '');
                return JSON.stringify(out);
            })()"#,
        )
        .await
    }

    async fn network_feed(&self) -> Result<NetworkFeed> {
        let (tx, feed) = network::feed();
        let mut requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .context("failed to subscribe to requests")?;
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to subscribe to responses")?;

        let request_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = requests.next().await {
                let event = NetworkEvent::Request {
                    request_id: ev.request_id.inner().clone(),
                    method: ev.request.method.clone(),
                    url: ev.request.url.clone(),
                    resource: resource_kind(ev.r#type.as_ref()),
                };
                if request_tx.send(event).is_err() {
                    break;
                }
            }
        });
        tokio::spawn(async move {
            while let Some(ev) = responses.next().await {
                let event = NetworkEvent::Response {
                    request_id: ev.request_id.inner().clone(),
                    url: ev.response.url.clone(),
                    status: u16::try_from(ev.response.status).unwrap_or(0),
                    resource: resource_kind(Some(&ev.r#type)),
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        Ok(feed)
    }

    async fn start_screencast(&self, dir: &Path) -> Result<()> {
        let mut frames = self
            .page
            .event_listener::<EventScreencastFrame>()
            .await
            .context("failed to subscribe to screencast frames")?;
        self.page
            .execute(
                StartScreencastParams::builder()
                    .format(StartScreencastFormat::Jpeg)
                    .quality(60)
                    .every_nth_frame(2)
                    .build(),
            )
            .await
            .context("failed to start screencast")?;

        let page = self.page.clone();
        let dir = dir.to_path_buf();
        tokio::spawn(async move {
            let mut written = 0u32;
            while let Some(frame) = frames.next().await {
                let _ = page
                    .execute(ScreencastFrameAckParams::new(frame.session_id))
                    .await;
                let encoded: &str = frame.data.as_ref();
                let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!("undecodable screencast frame: {e}");
                        continue;
                    }
                };
                written += 1;
                let path = dir.join(format!("frame-{written:05}.jpg"));
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    warn!(path = %path.display(), "screencast frame not written: {e}");
                    break;
                }
            }
            debug!(frames = written, "screencast ended");
        });
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        Ok(())
    }
}

/// Index of the window a click opened: a target unknown at the baseline, or
/// else a known non-main window whose URL moved (a named `window.open`
/// reusing a window that appeared late on an earlier attempt).
fn find_popup<K: Eq + Hash>(
    main: &K,
    baseline: &HashMap<K, Option<String>>,
    windows: &[(K, Option<String>)],
) -> Option<usize> {
    windows
        .iter()
        .position(|(id, _)| id != main && !baseline.contains_key(id))
        .or_else(|| {
            windows.iter().position(|(id, url)| {
                id != main && baseline.get(id).is_some_and(|before| before != url)
            })
        })
}

fn resource_kind(ty: Option<&ResourceType>) -> ResourceKind {
    match ty {
        Some(ResourceType::Document) => ResourceKind::Document,
        Some(ResourceType::Xhr) => ResourceKind::Xhr,
        Some(ResourceType::Fetch) => ResourceKind::Fetch,
        _ => ResourceKind::Other,
    }
}
