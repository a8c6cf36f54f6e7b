// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The orchestrator owns every running child. Its behaviour is split by
//! phase: `launcher` (start, start_all), `monitor` (crash handling and
//! periodic reports), `shutdown` (coordinated stop) and `status` (read-only
//! views for logs and HTTP).

mod launcher;
mod monitor;
mod shutdown;
mod status;
#[cfg(test)]
mod testutil;

pub use launcher::StartupSummary;
pub use shutdown::{ShutdownReport, ShutdownSignal, StopOutcome};
pub use status::{ActiveServicesReport, HealthReport, ProcessStatus};

use crate::config::Settings;
use crate::process::ManagedProcess;
use crate::registry::ServiceRegistry;
use crate::restart::RestartTracker;
use monitor::CrashEvent;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shared as `Arc<Orchestrator>` between the binary, the HTTP handlers, the
/// monitor and every watcher task.
pub struct Orchestrator {
    registry: ServiceRegistry,
    settings: Settings,
    /// Name -> current instance. Never locked across an `.await`.
    active: Mutex<HashMap<String, ManagedProcess>>,
    restarts: Mutex<HashMap<String, RestartTracker>>,
    /// Services with a restart loop in flight.
    restarting: Mutex<HashSet<String>>,
    /// Serializes `start`.
    start_lock: tokio::sync::Mutex<()>,
    shutting_down: AtomicBool,
    next_generation: AtomicU64,
    launched_at: Instant,
    cancel: CancellationToken,
    crash_tx: mpsc::UnboundedSender<CrashEvent>,
    crash_rx: Mutex<Option<mpsc::UnboundedReceiver<CrashEvent>>>,
}

/// Lock a std mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Orchestrator {
    pub fn new(registry: ServiceRegistry, settings: Settings) -> Self {
        let (crash_tx, crash_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            settings,
            active: Mutex::new(HashMap::new()),
            restarts: Mutex::new(HashMap::new()),
            restarting: Mutex::new(HashSet::new()),
            start_lock: tokio::sync::Mutex::new(()),
            shutting_down: AtomicBool::new(false),
            next_generation: AtomicU64::new(1),
            launched_at: Instant::now(),
            cancel: CancellationToken::new(),
            crash_tx,
            crash_rx: Mutex::new(Some(crash_rx)),
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Cancelled once shutdown begins.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
