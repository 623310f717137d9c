// Copyright 2026 Customs Probe Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for portal sessions.
//!
//! Every failure a stage can produce carries an explicit [`ErrorKind`], so the
//! retry executor decides eligibility from the tag alone and never from the
//! wording of a message.

use crate::session::stage::Stage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// How a failure should be treated by the stage that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timing-dependent failure (navigation timeout, element not yet present,
    /// readiness poll expired). Retried under the stage's policy.
    Transient,
    /// The portal gave a definite answer (e.g. the login error redirect).
    /// Never retried.
    Definite,
    /// The session cannot continue at all (browser did not start, artifact
    /// directories unwritable). Never retried.
    Fatal,
}

impl ErrorKind {
    /// Whether another attempt may change the result.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Definite => write!(f, "definite"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// A single failed attempt of a stage step.
#[derive(Debug, Clone, Error)]
#[error("{kind} failure: {message}")]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn definite(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Definite, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Wrap a browser-seam error, keeping the whole context chain.
    pub fn from_anyhow(kind: ErrorKind, err: &anyhow::Error) -> Self {
        Self::new(kind, format!("{err:#}"))
    }
}

/// Errors that escape [`Orchestrator::run`](crate::session::Orchestrator::run).
///
/// Stage failures are not errors at this level: they end the session in the
/// `Failed` outcome and are reported through the evidence summary. Only the
/// cases below propagate, and teardown has already run when they do.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("fatal error during {stage}: {source}")]
    Fatal {
        stage: Stage,
        #[source]
        source: StepError,
        /// Where the run's evidence (or what could be written of it) lives.
        run_dir: PathBuf,
    },
    #[error("session aborted during {stage}: {message}")]
    Aborted {
        stage: Stage,
        message: String,
        run_dir: PathBuf,
    },
}

impl SessionError {
    /// The stage that was running when the session ended.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Fatal { stage, .. } | Self::Aborted { stage, .. } => *stage,
        }
    }

    pub fn run_dir(&self) -> &Path {
        match self {
            Self::Fatal { run_dir, .. } | Self::Aborted { run_dir, .. } => run_dir,
        }
    }
}

/// Invalid or incomplete configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid login URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("no credentials: set CUSTOMS_PROBE_USERNAME/CUSTOMS_PROBE_PASSWORD or write {path}")]
    MissingCredentials { path: String },
    #[error("unreadable credentials file {path}: {source}")]
    CredentialsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid retry policy: {0}")]
    InvalidRetry(String),
    #[error("{0} must not be empty")]
    Empty(&'static str),
}
