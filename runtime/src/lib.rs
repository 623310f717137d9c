// Copyright 2026 Customs Probe Contributors
// SPDX-License-Identifier: Apache-2.0

//! customs-probe: an evidence-gathering browser session for a customs
//! declaration portal that offers no API.
//!
//! The library drives a staged session (login through a popup, dashboard
//! readiness, structure discovery) with bounded retries, and records
//! screenshots, HTML dumps, network traffic and structured logs for every
//! step so the portal can be mapped by hand afterwards.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod evidence;
pub mod network;
pub mod renderer;
pub mod retry;
pub mod session;
