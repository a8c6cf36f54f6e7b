// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::{Orchestrator, lock};
use crate::process::ManagedProcess;
use crate::state::ProcessState;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const RUNNING: &str = "running";
const STOPPED: &str = "stopped";

/// Point-in-time view of one active instance.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub name: String,
    pub display_name: String,
    pub pid: u32,
    pub generation: u64,
    pub state: ProcessState,
    pub uptime_secs: u64,
    pub restarts: u32,
    #[serde(skip)]
    pub started_at: Instant,
}

impl ProcessStatus {
    pub(crate) fn of(process: &ManagedProcess, restarts: u32) -> Self {
        Self {
            name: process.name().to_string(),
            display_name: process.descriptor().display_name.clone(),
            pid: process.pid(),
            generation: process.generation(),
            state: process.state(),
            uptime_secs: process.uptime().as_secs(),
            restarts,
            started_at: process.started_at(),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: String,
    /// Every registered service, `running` or `stopped`.
    pub services: BTreeMap<String, &'static str>,
    /// Orchestrator uptime in seconds.
    pub uptime: f64,
}

/// Body of `GET /status` and `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveServicesReport {
    pub status: &'static str,
    pub services: Vec<String>,
    pub timestamp: String,
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

impl Orchestrator {
    pub fn is_active(&self, name: &str) -> bool {
        lock(&self.active).contains_key(name)
    }

    /// Active service names in registration order.
    pub fn active_names(&self) -> Vec<String> {
        let active = lock(&self.active);
        self.registry
            .names()
            .filter(|n| active.contains_key(*n))
            .map(str::to_string)
            .collect()
    }

    /// Snapshot of every active instance, in registration order.
    pub fn status(&self) -> Vec<ProcessStatus> {
        let restarts = lock(&self.restarts);
        let active = lock(&self.active);
        self.registry
            .names()
            .filter_map(|n| active.get(n))
            .map(|p| {
                let count = restarts.get(p.name()).map(|t| t.total_restarts()).unwrap_or(0);
                ProcessStatus::of(p, count)
            })
            .collect()
    }

    pub fn uptime(&self) -> Duration {
        self.launched_at.elapsed()
    }

    pub fn health(&self) -> HealthReport {
        let active = lock(&self.active);
        let services = self
            .registry
            .names()
            .map(|n| {
                let state = match active.get(n) {
                    Some(p) if p.state().is_alive() => RUNNING,
                    _ => STOPPED,
                };
                (n.to_string(), state)
            })
            .collect();
        HealthReport {
            status: "healthy",
            timestamp: now_rfc3339(),
            services,
            uptime: self.uptime().as_secs_f64(),
        }
    }

    pub fn active_report(&self) -> ActiveServicesReport {
        ActiveServicesReport {
            status: RUNNING,
            services: self.active_names(),
            timestamp: now_rfc3339(),
        }
    }

    /// Log one line per registered service plus a summary.
    pub fn log_status_report(&self) {
        let status: BTreeMap<String, ProcessStatus> = self
            .status()
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        info!(
            "status: {}/{} service(s) running, up {}s, public port {}",
            status.len(),
            self.registry.len(),
            self.uptime().as_secs(),
            self.settings.public_port
        );
        for d in self.registry.all_services() {
            match status.get(&d.name) {
                Some(s) => svc_log!(
                    info,
                    d,
                    "{RUNNING} (pid={}, uptime={}s, restarts={})",
                    s.pid,
                    s.uptime_secs,
                    s.restarts
                ),
                None => svc_log!(warn, d, "{STOPPED}"),
            }
        }
    }
}
