//! Browser seam for portal sessions.
//!
//! Defines the `BrowserLauncher`, `Renderer` and `RenderContext` traits that
//! abstract over the browser engine (currently Chromium via chromiumoxide).
//! Operations are semantic (read a form, poll readiness, open a popup) rather
//! than raw protocol calls, so the session pipeline can be driven by a
//! scripted context in tests.

pub mod chromium;

use crate::network::NetworkFeed;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Every submittable field of a form, read as an opaque key/value set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSnapshot {
    /// The form's `action` attribute, if any.
    pub action: Option<String>,
    /// Field name → current value, hidden fields included.
    pub fields: BTreeMap<String, String>,
    /// Name of the first text/email input, the likely username field.
    pub username_field: Option<String>,
    /// Name of the first password input.
    pub password_field: Option<String>,
}

/// Structural readiness signals of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReadiness {
    pub ready_state: String,
    /// Rendered height of `<body>` in CSS pixels.
    pub body_height: u64,
    /// Number of `<frame>`/`<iframe>` elements in the top document.
    pub frame_count: u32,
}

impl DocumentReadiness {
    /// `readyState == complete` and either a non-trivial body or at least one
    /// child frame.
    pub fn is_ready(&self, min_body_height: u64) -> bool {
        self.ready_state == "complete" && (self.body_height > min_body_height || self.frame_count > 0)
    }
}

/// One nested frame of a document, with its markup when accessible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDocument {
    /// Position in document order across all nesting levels.
    pub index: usize,
    /// Dotted path of child indices, e.g. `"0.2"` for the third frame inside
    /// the first one.
    pub path: String,
    /// `name` or `id` attribute of the frame element.
    pub name: Option<String>,
    /// `src` attribute of the frame element.
    pub src: Option<String>,
    /// Serialized `documentElement`, absent when the frame is not readable.
    pub html: Option<String>,
    /// Why the frame could not be read.
    pub error: Option<String>,
}

/// Starts a browser engine.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Renderer>>;
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single page (tab or popup window).
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Get the current URL.
    async fn current_url(&self) -> Result<String>;
    /// Get the full page HTML.
    async fn html(&self) -> Result<String>;
    /// Capture a PNG screenshot.
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>>;
    /// Viewport coordinates of the centre of the first element matching
    /// `selector`, or `None` when nothing matches.
    async fn element_center(&self, selector: &str) -> Result<Option<(f64, f64)>>;
    /// Move the pointer to viewport coordinates.
    async fn move_pointer(&self, x: f64, y: f64) -> Result<()>;
    /// Click `selector` and wait for the window it opens.
    async fn open_popup(&self, selector: &str, timeout_ms: u64) -> Result<Box<dyn RenderContext>>;
    /// Read every field of the form matching `form_selector` (or the first
    /// form on the page).
    async fn read_form(&self, form_selector: &str) -> Result<FormSnapshot>;
    /// Assign all `fields` directly (no keystroke simulation) and submit.
    async fn fill_and_submit(
        &self,
        form_selector: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<()>;
    /// Sample the document's readiness signals.
    async fn readiness(&self) -> Result<DocumentReadiness>;
    /// Walk every nested frame, capturing markup where readable.
    async fn frame_documents(&self) -> Result<Vec<FrameDocument>>;
    /// Subscribe to the page's network traffic.
    async fn network_feed(&self) -> Result<NetworkFeed>;
    /// Start writing screencast frames into `dir`.
    async fn start_screencast(&self, dir: &Path) -> Result<()>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Embed `s` as a JavaScript string literal.
pub(crate) fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_requires_complete_state() {
        let r = DocumentReadiness {
            ready_state: "interactive".into(),
            body_height: 2000,
            frame_count: 3,
        };
        assert!(!r.is_ready(100));
    }

    #[test]
    fn test_readiness_accepts_tall_body_or_frames() {
        let tall = DocumentReadiness {
            ready_state: "complete".into(),
            body_height: 640,
            frame_count: 0,
        };
        let framed = DocumentReadiness {
            ready_state: "complete".into(),
            body_height: 0,
            frame_count: 1,
        };
        let blank = DocumentReadiness {
            ready_state: "complete".into(),
            body_height: 40,
            frame_count: 0,
        };
        assert!(tall.is_ready(100));
        assert!(framed.is_ready(100));
        assert!(!blank.is_ready(100));
    }

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a[href*="login"]"#), r#""a[href*=\"login\"]""#);
        assert_eq!(js_string("it's\n"), r#""it's\n""#);
    }

    #[test]
    fn test_form_snapshot_camel_case() {
        let snap = FormSnapshot {
            action: Some("/auth".into()),
            fields: BTreeMap::from([("__VIEWSTATE".to_string(), "x".to_string())]),
            username_field: Some("user".into()),
            password_field: None,
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["usernameField"], "user");
        assert!(json["passwordField"].is_null());
    }
}
