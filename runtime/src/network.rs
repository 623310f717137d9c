// Copyright 2026 Customs Probe Contributors
// SPDX-License-Identifier: Apache-2.0

//! Passive network observer.
//!
//! The browser seam forwards request/response notifications as
//! [`NetworkEvent`]s over an unbounded channel. The observer classifies them,
//! keeps counters, and appends API-like calls, navigations and every error
//! response to `network.jsonl`. It never touches in-flight requests and never
//! shares state with the session pipeline beyond its own journal.

use crate::evidence::journal::Journal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receiving end of a page's network notifications.
pub type NetworkFeed = mpsc::UnboundedReceiver<NetworkEvent>;

/// Sending end handed to the browser seam.
pub type NetworkSender = mpsc::UnboundedSender<NetworkEvent>;

/// Create a feed channel.
pub fn feed() -> (NetworkSender, NetworkFeed) {
    mpsc::unbounded_channel()
}

/// Resource type as reported by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Document,
    Xhr,
    Fetch,
    Other,
}

/// A network notification from one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Request {
        request_id: String,
        method: String,
        url: String,
        resource: ResourceKind,
    },
    Response {
        request_id: String,
        url: String,
        status: u16,
        resource: ResourceKind,
    },
}

/// How a request is classified for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    /// xhr/fetch calls.
    Api,
    /// Document loads.
    Navigation,
    Other,
}

impl From<ResourceKind> for RequestClass {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Xhr | ResourceKind::Fetch => Self::Api,
            ResourceKind::Document => Self::Navigation,
            ResourceKind::Other => Self::Other,
        }
    }
}

/// Log tag of a journal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkTag {
    Api,
    Navigation,
    /// Any response with status >= 400, whatever its class.
    Error,
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub timestamp: String,
    pub tag: NetworkTag,
    /// Which page produced it (`main`, `popup`).
    pub source: String,
    pub phase: NetworkPhase,
    pub method: Option<String>,
    pub url: String,
    pub status: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPhase {
    Request,
    Response,
}

/// Counters reported at detach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub requests: u64,
    pub api_calls: u64,
    pub navigations: u64,
    pub responses: u64,
    pub error_responses: u64,
}

/// Classification state shared by every attached feed.
#[derive(Debug, Default)]
pub struct ObserverState {
    stats: NetworkStats,
    /// request id → method, so responses can be logged with their method.
    methods: HashMap<String, String>,
}

impl ObserverState {
    /// Classify one event, update counters, and return the line to log (if
    /// the event is worth logging).
    pub fn observe(&mut self, source: &str, event: NetworkEvent) -> Option<NetworkRecord> {
        let timestamp = Utc::now().to_rfc3339();
        match event {
            NetworkEvent::Request {
                request_id,
                method,
                url,
                resource,
            } => {
                self.stats.requests += 1;
                let tag = match RequestClass::from(resource) {
                    RequestClass::Api => {
                        self.stats.api_calls += 1;
                        NetworkTag::Api
                    }
                    RequestClass::Navigation => {
                        self.stats.navigations += 1;
                        NetworkTag::Navigation
                    }
                    RequestClass::Other => return None,
                };
                self.methods.insert(request_id, method.clone());
                Some(NetworkRecord {
                    timestamp,
                    tag,
                    source: source.to_string(),
                    phase: NetworkPhase::Request,
                    method: Some(method),
                    url,
                    status: None,
                })
            }
            NetworkEvent::Response {
                request_id,
                url,
                status,
                resource,
            } => {
                self.stats.responses += 1;
                let method = self.methods.remove(&request_id);
                let tag = if status >= 400 {
                    self.stats.error_responses += 1;
                    NetworkTag::Error
                } else {
                    match RequestClass::from(resource) {
                        RequestClass::Api => NetworkTag::Api,
                        RequestClass::Navigation => NetworkTag::Navigation,
                        RequestClass::Other => return None,
                    }
                };
                Some(NetworkRecord {
                    timestamp,
                    tag,
                    source: source.to_string(),
                    phase: NetworkPhase::Response,
                    method,
                    url,
                    status: Some(status),
                })
            }
        }
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }
}

struct Shared {
    state: ObserverState,
    journal: Option<Journal>,
}

/// Time allowed for attached feeds to drain at detach.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Listens to every attached page for the whole session.
pub struct NetworkObserver {
    shared: Arc<Mutex<Shared>>,
    tasks: Vec<JoinHandle<()>>,
}

impl NetworkObserver {
    /// Create an observer journaling to `journal_path`. When the journal
    /// cannot be opened the observer still counts and logs via tracing.
    pub fn open(journal_path: Option<&Path>) -> Self {
        let journal = journal_path.and_then(|path| match Journal::open(path) {
            Ok(j) => Some(j),
            Err(e) => {
                warn!("network journal unavailable, logging to tracing only: {e:#}");
                None
            }
        });
        Self {
            shared: Arc::new(Mutex::new(Shared {
                state: ObserverState::default(),
                journal,
            })),
            tasks: Vec::new(),
        }
    }

    /// Start consuming `feed`, tagging its records with `source`.
    pub fn attach(&mut self, source: &str, mut feed: NetworkFeed) {
        let shared = Arc::clone(&self.shared);
        let source = source.to_string();
        debug!(%source, "network observer attached");
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = feed.recv().await {
                let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
                let Shared { state, journal } = &mut *guard;
                let Some(record) = state.observe(&source, event) else {
                    continue;
                };
                match record.tag {
                    NetworkTag::Error => warn!(
                        target: "customs_probe::network::error",
                        source = %record.source,
                        status = record.status,
                        method = record.method.as_deref().unwrap_or("-"),
                        "{}",
                        record.url
                    ),
                    _ => debug!(
                        source = %record.source,
                        tag = ?record.tag,
                        method = record.method.as_deref().unwrap_or("-"),
                        status = record.status,
                        "{}",
                        record.url
                    ),
                }
                if let Some(journal) = journal.as_mut() {
                    if let Err(e) = journal.append(&record) {
                        warn!("network journal write failed: {e:#}");
                    }
                }
            }
        }));
    }

    /// Number of feeds attached so far.
    pub fn attached(&self) -> usize {
        self.tasks.len()
    }

    /// Stop listening, flush the journal and return the counters.
    pub async fn detach(self) -> NetworkStats {
        for mut task in self.tasks {
            if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        let mut guard = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(journal) = guard.journal.as_mut() {
            if let Err(e) = journal.flush() {
                warn!("network journal flush failed: {e:#}");
            }
        }
        let stats = guard.state.stats();
        info!(
            requests = stats.requests,
            api_calls = stats.api_calls,
            errors = stats.error_responses,
            "network observer detached"
        );
        stats
    }
}
