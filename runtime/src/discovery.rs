//! Keyword discovery over the dashboard and every nested frame.
//!
//! The route to the target workflow is unknown when the probe is built, so
//! exploration surfaces candidate elements for a human to follow up:
//!
//! 1. **Keyword matches**: interactive and table elements whose visible
//!    text, `id`/`name`, title or link target contains one of the workflow
//!    keywords (case-insensitive substring).
//! 2. **Frame inventory**: index, identifier and source of every frame,
//!    with the reason when a frame could not be read.
//! 3. **Clickable inventory**: every link, button and click-handler element
//!    per document, persisted as `clickable_elements.json`.
//!
//! All entry points are synchronous and operate on captured HTML.

use crate::renderer::FrameDocument;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Label of the top-level document in reports.
pub const MAIN_DOCUMENT: &str = "main";

/// Visible text longer than this is truncated in reports.
const MAX_TEXT_LEN: usize = 160;

/// Interactive or tabular elements considered for keyword matching.
const CANDIDATE_SELECTOR: &str = "a, button, input, select, option, label, \
     [onclick], [role=button], [role=link], [role=menuitem], [role=tab], \
     table, caption, th, td, li";

/// Elements listed in the clickable inventory.
const CLICKABLE_SELECTOR: &str = "a, button, [onclick], [role=button], [role=link], \
     [role=menuitem], [role=tab], input[type=submit], input[type=button], \
     input[type=image]";

/// An element that matched at least one keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementMatch {
    /// `main` or `frame:<path>`.
    pub document: String,
    pub tag: String,
    /// `id`, falling back to `name`.
    pub identifier: Option<String>,
    pub text: String,
    pub href: Option<String>,
    /// Keywords found, in keyword-set order.
    pub keywords: Vec<String>,
}

/// One entry of the frame inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub index: usize,
    pub path: String,
    pub identifier: Option<String>,
    pub src: Option<String>,
    pub accessible: bool,
    pub error: Option<String>,
}

/// Output of [`DiscoveryHeuristic::discover`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub keywords: Vec<String>,
    pub documents_scanned: usize,
    pub matches: Vec<ElementMatch>,
    pub frames: Vec<FrameInfo>,
}

impl DiscoveryReport {
    pub fn frames_found(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Frames whose markup could not be read.
    pub fn unreadable_frames(&self) -> impl Iterator<Item = &FrameInfo> {
        self.frames.iter().filter(|f| !f.accessible)
    }
}

/// Case-insensitive keyword search over captured documents.
#[derive(Debug, Clone)]
pub struct DiscoveryHeuristic {
    keywords: Vec<String>,
}

impl DiscoveryHeuristic {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for k in keywords {
            let k = k.as_ref().trim().to_lowercase();
            if !k.is_empty() && !normalized.contains(&k) {
                normalized.push(k);
            }
        }
        Self {
            keywords: normalized,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Search the top document and every readable frame.
    pub fn discover(&self, main_html: &str, frames: &[FrameDocument]) -> DiscoveryReport {
        let mut matches = self.scan_document(MAIN_DOCUMENT, main_html);
        let mut documents_scanned = 1;

        for frame in frames {
            if let Some(html) = &frame.html {
                matches.extend(self.scan_document(&frame_label(frame), html));
                documents_scanned += 1;
            }
        }

        DiscoveryReport {
            keywords: self.keywords.clone(),
            documents_scanned,
            matches,
            frames: frames.iter().map(frame_info).collect(),
        }
    }

    /// Keyword matches within one document.
    pub fn scan_document(&self, document: &str, html: &str) -> Vec<ElementMatch> {
        if self.keywords.is_empty() {
            return Vec::new();
        }
        let parsed = Html::parse_document(html);
        let mut out = Vec::new();

        for el in parsed.select(candidate_selector()) {
            let text = visible_text(&el);
            let attrs = el.value();
            let href = attrs.attr("href").map(str::to_string);
            let haystack = [
                Some(text.as_str()),
                attrs.attr("id"),
                attrs.attr("name"),
                attrs.attr("title"),
                attrs.attr("aria-label"),
                attrs.attr("value"),
                href.as_deref(),
            ]
            .into_iter()
            .flatten()
            .map(str::to_lowercase)
            .collect::<Vec<_>>();

            let hits: Vec<String> = self
                .keywords
                .iter()
                .filter(|k| haystack.iter().any(|h| h.contains(k.as_str())))
                .cloned()
                .collect();
            if hits.is_empty() {
                continue;
            }

            out.push(ElementMatch {
                document: document.to_string(),
                tag: attrs.name().to_string(),
                identifier: identifier(&el),
                text: truncate(&text),
                href,
                keywords: hits,
            });
        }
        out
    }
}

/// An interactive element for manual review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickableElement {
    pub tag: String,
    pub identifier: Option<String>,
    pub text: String,
    pub href: Option<String>,
    pub onclick: Option<String>,
    pub role: Option<String>,
}

/// The clickable elements of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInventory {
    pub document: String,
    pub elements: Vec<ClickableElement>,
}

/// Persisted as `clickable_elements.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickableInventory {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub documents: Vec<DocumentInventory>,
}

impl ClickableInventory {
    /// Inventory the top document and every readable frame.
    pub fn collect(main_html: &str, frames: &[FrameDocument]) -> Self {
        let mut documents = vec![DocumentInventory {
            document: MAIN_DOCUMENT.to_string(),
            elements: clickable_elements(main_html),
        }];
        for frame in frames {
            if let Some(html) = &frame.html {
                documents.push(DocumentInventory {
                    document: frame_label(frame),
                    elements: clickable_elements(html),
                });
            }
        }
        Self {
            generated_at: Utc::now(),
            total: documents.iter().map(|d| d.elements.len()).sum(),
            documents,
        }
    }
}

/// Every link, button and click-handler element in `html`.
pub fn clickable_elements(html: &str) -> Vec<ClickableElement> {
    let parsed = Html::parse_document(html);
    parsed
        .select(clickable_selector())
        .map(|el| {
            let attrs = el.value();
            let mut text = visible_text(&el);
            if text.is_empty() {
                text = attrs
                    .attr("value")
                    .or_else(|| attrs.attr("title"))
                    .or_else(|| attrs.attr("aria-label"))
                    .map(normalize_ws)
                    .unwrap_or_default();
            }
            ClickableElement {
                tag: attrs.name().to_string(),
                identifier: identifier(&el),
                text: truncate(&text),
                href: attrs.attr("href").map(str::to_string),
                onclick: attrs.attr("onclick").map(str::to_string),
                role: attrs.attr("role").map(str::to_string),
            }
        })
        .collect()
}

/// Report label of a frame document.
pub fn frame_label(frame: &FrameDocument) -> String {
    format!("frame:{}", frame.path)
}

fn frame_info(frame: &FrameDocument) -> FrameInfo {
    FrameInfo {
        index: frame.index,
        path: frame.path.clone(),
        identifier: frame.name.clone(),
        src: frame.src.clone(),
        accessible: frame.html.is_some(),
        error: frame.error.clone(),
    }
}

fn identifier(el: &ElementRef<'_>) -> Option<String> {
    el.value()
        .attr("id")
        .or_else(|| el.value().attr("name"))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn visible_text(el: &ElementRef<'_>) -> String {
    normalize_ws(&el.text().collect::<String>())
}

fn normalize_ws(s: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex is valid"))
        .replace_all(s.trim(), " ")
        .into_owned()
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_TEXT_LEN {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_TEXT_LEN).collect();
    out.push('…');
    out
}

fn candidate_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse(CANDIDATE_SELECTOR).expect("candidate selector is valid"))
}

fn clickable_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse(CLICKABLE_SELECTOR).expect("clickable selector is valid"))
}
