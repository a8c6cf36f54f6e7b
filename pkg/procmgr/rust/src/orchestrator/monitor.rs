// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Crash handling, restart loops and the periodic sweep/status timers.

use super::{Orchestrator, lock};
use crate::config::MAX_INTERVAL_SECS;
use crate::error::LifecycleError;
use crate::process::ExitReport;
use crate::registry::ServiceDescriptor;
use crate::state::ProcessState;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, sleep};

/// A Running instance went away outside of shutdown.
#[derive(Debug, Clone)]
pub(crate) struct CrashEvent {
    pub name: String,
    pub generation: u64,
    pub exit: ExitReport,
    pub uptime: Duration,
}

impl Orchestrator {
    /// Start the lifecycle monitor. Only the first call spawns anything.
    pub fn spawn_monitor(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let crashes = lock(&self.crash_rx).take()?;
        Some(tokio::spawn(self.clone().run_monitor(crashes)))
    }

    async fn run_monitor(self: Arc<Self>, mut crashes: mpsc::UnboundedReceiver<CrashEvent>) {
        let longest = Duration::from_secs(MAX_INTERVAL_SECS);
        let sweep_every = self.settings.monitor_interval.min(longest);
        let report_every = self.settings.status_interval.min(longest);
        let start = tokio::time::Instant::now();
        let mut sweep = interval_at(start + sweep_every, sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report = interval_at(start + report_every, report_every);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "lifecycle monitor started (sweep every {}s, status every {}s)",
            sweep_every.as_secs_f64(),
            report_every.as_secs_f64()
        );
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(event) = crashes.recv() => self.handle_crash(event),
                _ = sweep.tick() => self.sweep(),
                _ = report.tick() => self.log_status_report(),
            }
        }
        debug!("lifecycle monitor stopped");
    }

    fn handle_crash(self: &Arc<Self>, event: CrashEvent) {
        if self.is_shutting_down() {
            return;
        }
        let Ok(descriptor) = self.registry.get(&event.name) else {
            return;
        };
        let err = LifecycleError::RuntimeCrash {
            service: event.name.clone(),
            exit: event.exit,
        };
        svc_log!(
            error,
            descriptor,
            "{err} after {:.1}s (generation {})",
            event.uptime.as_secs_f64(),
            event.generation
        );

        let policy = descriptor.restart.policy;
        if !policy.should_restart(&event.exit) {
            svc_log!(info, descriptor, "restart policy '{policy}' leaves it stopped");
            return;
        }
        lock(&self.restarts)
            .entry(event.name)
            .or_default()
            .record_crash(event.uptime, &descriptor.restart);
        self.schedule_restart(descriptor);
    }

    /// Treat Running records whose exit was observed, or whose watcher is
    /// gone, as crashes. Also picks up crashes that arrived while a restart
    /// loop for the same service was finishing.
    fn sweep(self: &Arc<Self>) {
        let dead: Vec<CrashEvent> = {
            let mut active = lock(&self.active);
            let names: Vec<String> = active
                .values()
                .filter(|p| {
                    p.state() == ProcessState::Running
                        && (p.exit_observed() || p.watcher_finished())
                })
                .map(|p| p.name().to_string())
                .collect();
            names
                .into_iter()
                .filter_map(|name| active.remove(&name))
                .map(|p| CrashEvent {
                    name: p.name().to_string(),
                    generation: p.generation(),
                    exit: p
                        .last_exit()
                        .or(*p.exit_receiver().borrow())
                        .unwrap_or_else(ExitReport::unknown),
                    uptime: p.uptime(),
                })
                .collect()
        };
        debug!("liveness sweep found {} dead service(s)", dead.len());
        for event in dead {
            self.handle_crash(event);
        }

        let orphaned: Vec<String> = {
            let restarts = lock(&self.restarts);
            restarts
                .iter()
                .filter(|(_, t)| t.is_pending())
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in orphaned {
            if self.is_active(&name) || lock(&self.restarting).contains(&name) {
                continue;
            }
            if let Ok(descriptor) = self.registry.get(&name) {
                svc_log!(debug, descriptor, "crash without a restart in flight, rescheduling");
                self.schedule_restart(descriptor);
            }
        }
    }

    fn schedule_restart(self: &Arc<Self>, descriptor: Arc<ServiceDescriptor>) {
        if !lock(&self.restarting).insert(descriptor.name.clone()) {
            svc_log!(debug, descriptor, "restart already in flight");
            return;
        }
        tokio::spawn(self.clone().restart_loop(descriptor));
    }

    /// Back off, start, and repeat until the service survives its grace
    /// period, the start limit is reached, or shutdown begins.
    async fn restart_loop(self: Arc<Self>, descriptor: Arc<ServiceDescriptor>) {
        let name = descriptor.name.as_str();
        loop {
            let delay = {
                let mut restarts = lock(&self.restarts);
                let tracker = restarts.entry(name.to_string()).or_default();
                let now = Instant::now();
                if tracker.limit_reached(&descriptor.restart, now) {
                    tracker.set_pending(false);
                    svc_log!(
                        error,
                        descriptor,
                        "start limit reached ({} restarts within {}s), giving up",
                        descriptor.restart.start_limit_burst,
                        descriptor.restart.start_limit_interval.as_secs()
                    );
                    break;
                }
                tracker.record_restart(now);
                tracker.set_pending(false);
                tracker.next_delay(&descriptor.restart)
            };

            svc_log!(
                warn,
                descriptor,
                "restarting in {:.1}s...",
                delay.as_secs_f64()
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }

            match self.start(name).await {
                Ok(status) => {
                    svc_success!(descriptor, "restarted (pid={})", status.pid);
                    break;
                }
                Err(LifecycleError::AlreadyRunning(_) | LifecycleError::ShuttingDown(_)) => break,
                Err(e) if e.is_configuration() => {
                    svc_log!(error, descriptor, "cannot restart: {e}");
                    break;
                }
                Err(e) => {
                    svc_log!(warn, descriptor, "restart attempt failed: {e}");
                    lock(&self.restarts)
                        .entry(name.to_string())
                        .or_default()
                        .record_failed_attempt();
                }
            }
        }
        lock(&self.restarting).remove(name);
    }
}
