// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::monitor::CrashEvent;
use super::status::ProcessStatus;
use super::{Orchestrator, lock};
use crate::env::child_environment;
use crate::error::{LifecycleError, Result};
use crate::output;
use crate::process::{self, ExitReport, Spawned};
use crate::registry::ServiceDescriptor;
use crate::state::ProcessState;
use log::{error, info, warn};
use nix::sys::signal::Signal;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};

/// Result of `start_all` when no critical service failed.
#[derive(Debug, Default)]
pub struct StartupSummary {
    pub started: Vec<ProcessStatus>,
    /// Non-critical services that did not come up, with the reason.
    pub failed: Vec<(String, String)>,
    pub total: usize,
    /// Startup stopped early because shutdown began.
    pub interrupted: bool,
}

impl StartupSummary {
    pub fn started_names(&self) -> Vec<&str> {
        self.started.iter().map(|s| s.name.as_str()).collect()
    }
}

impl Orchestrator {
    /// Launch one registered service and wait out its grace period.
    ///
    /// Fails with a configuration error before spawning anything if the name
    /// is unknown or the working directory is missing. A child that exits
    /// within the grace period is a `StartupFailure` and is left out of the
    /// active map.
    pub async fn start(self: &Arc<Self>, name: &str) -> Result<ProcessStatus> {
        let descriptor = self.registry.get(name)?;
        let _serial = self.start_lock.lock().await;

        if self.is_shutting_down() {
            return Err(LifecycleError::ShuttingDown(name.to_string()));
        }
        if lock(&self.active).contains_key(name) {
            return Err(LifecycleError::AlreadyRunning(name.to_string()));
        }
        if !descriptor.working_dir.is_dir() {
            let err = LifecycleError::MissingWorkingDirectory {
                service: name.to_string(),
                path: descriptor.working_dir.clone(),
            };
            svc_log!(error, descriptor, "{err}");
            return Err(err);
        }

        svc_log!(info, descriptor, "starting {}...", descriptor.display_name);
        let env = child_environment(
            &self.settings.base_env,
            &self.settings.node_env,
            descriptor.port,
            &descriptor.env,
        );
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let Spawned {
            process,
            mut child,
            exit_tx,
        } = process::spawn(descriptor.clone(), &env, generation).inspect_err(|e| {
            svc_log!(error, descriptor, "{e}");
        })?;
        let pid = process.pid();
        let mut exit_rx = process.exit_receiver();
        output::capture(&descriptor, child.stdout.take(), child.stderr.take());

        {
            let mut active = lock(&self.active);
            // Checked under the same lock the shutdown snapshot takes, so a
            // child is either seen by shutdown or never registered.
            if self.is_shutting_down() {
                drop(active);
                svc_log!(warn, descriptor, "shutdown began during launch, killing pid {pid}");
                process::signal_group(name, pid, Signal::SIGKILL);
                let _ = child.start_kill();
                return Err(LifecycleError::ShuttingDown(name.to_string()));
            }
            active.insert(name.to_string(), process);
        }

        let watcher = tokio::spawn(self.clone().watch(
            descriptor.clone(),
            generation,
            child,
            exit_tx,
        ));
        if let Some(p) = lock(&self.active).get_mut(name)
            && p.generation() == generation
        {
            p.set_watcher(watcher);
        }

        let early_exit = timeout(
            self.settings.grace_period,
            exit_rx.wait_for(Option::is_some),
        )
        .await
        .map(|res| res.map(|r| (*r).unwrap_or_else(ExitReport::unknown)));
        if let Ok(res) = early_exit {
            // A closed channel means the watcher went away without a report.
            let exit = res.unwrap_or_else(|_| ExitReport::unknown());
            if self.is_shutting_down() {
                return Err(LifecycleError::ShuttingDown(name.to_string()));
            }
            let err = LifecycleError::StartupFailure {
                service: name.to_string(),
                exit,
            };
            svc_log!(error, descriptor, "failed to start: {err}");
            return Err(err);
        }

        let status = {
            let restarts = lock(&self.restarts)
                .get(name)
                .map(|t| t.total_restarts())
                .unwrap_or(0);
            let mut active = lock(&self.active);
            match active.get_mut(name) {
                Some(p) if p.generation() == generation => p
                    .transition(ProcessState::Running)
                    .then(|| ProcessStatus::of(p, restarts)),
                _ => None,
            }
        };

        match status {
            Some(status) => {
                svc_success!(
                    descriptor,
                    "{} started (pid={pid}, generation={generation})",
                    descriptor.display_name
                );
                Ok(status)
            }
            // Exited (or was killed) right at the end of the grace period.
            None if self.is_shutting_down() => Err(LifecycleError::ShuttingDown(name.to_string())),
            None => {
                let exit = (*exit_rx.borrow()).unwrap_or_else(ExitReport::unknown);
                let err = LifecycleError::StartupFailure {
                    service: name.to_string(),
                    exit,
                };
                svc_log!(error, descriptor, "failed to start: {err}");
                Err(err)
            }
        }
    }

    /// Owns the OS child until it exits, then retires its record.
    async fn watch(
        self: Arc<Self>,
        descriptor: Arc<ServiceDescriptor>,
        generation: u64,
        mut child: Child,
        exit_tx: watch::Sender<Option<ExitReport>>,
    ) {
        let pgid = child.id().unwrap_or(0);
        let exit = match child.wait().await {
            Ok(status) => ExitReport::from_status(status),
            Err(e) => {
                svc_log!(error, descriptor, "failed to wait for child: {e}");
                ExitReport::unknown()
            }
        };
        // Anything the child forked and left behind goes with it, so a
        // restart never finds the old generation still holding its port.
        process::signal_group(&descriptor.name, pgid, Signal::SIGKILL);

        let crashed_after = {
            let mut active = lock(&self.active);
            match active.get_mut(&descriptor.name) {
                Some(p) if p.generation() == generation => {
                    let was_running = p.state() == ProcessState::Running;
                    p.record_exit(exit);
                    let uptime = p.uptime();
                    active.remove(&descriptor.name);
                    was_running.then_some(uptime)
                }
                // Stale generation or already cleaned up: leave the map alone.
                _ => None,
            }
        };

        let shutting_down = self.is_shutting_down();
        if shutting_down {
            svc_log!(info, descriptor, "exited ({exit})");
        } else if exit.success() {
            svc_log!(warn, descriptor, "exited cleanly ({exit})");
        } else {
            svc_log!(error, descriptor, "exited with {exit}");
        }

        let _ = exit_tx.send(Some(exit));

        if let Some(uptime) = crashed_after
            && !shutting_down
        {
            let _ = self.crash_tx.send(CrashEvent {
                name: descriptor.name.clone(),
                generation,
                exit,
                uptime,
            });
        }
    }

    /// Start every registered service in priority order.
    ///
    /// Waits the launch delay between services and, before each one, up to
    /// the dependency timeout for its dependencies to be active. A failed
    /// critical service aborts with `CriticalServiceFailed`; other failures
    /// are logged and skipped.
    pub async fn start_all(self: &Arc<Self>) -> Result<StartupSummary> {
        let services = self.registry.all_services();
        let mut summary = StartupSummary {
            total: services.len(),
            ..Default::default()
        };
        info!("starting {} service(s)", services.len());

        for (i, descriptor) in services.iter().enumerate() {
            if self.is_shutting_down() {
                summary.interrupted = true;
                break;
            }
            if i > 0 && !self.settings.launch_delay.is_zero() {
                sleep(self.settings.launch_delay).await;
            }
            self.await_dependencies(descriptor).await;

            match self.start(&descriptor.name).await {
                Ok(status) => summary.started.push(status),
                Err(LifecycleError::ShuttingDown(_)) => {
                    summary.interrupted = true;
                    break;
                }
                Err(e) if descriptor.critical => {
                    error!(
                        service = descriptor.name.as_str(), color = descriptor.color.as_str();
                        "critical service failed to start, aborting"
                    );
                    return Err(LifecycleError::CriticalServiceFailed {
                        service: descriptor.name.clone(),
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    svc_log!(warn, descriptor, "continuing without it: {e}");
                    summary.failed.push((descriptor.name.clone(), e.to_string()));
                }
            }
        }

        if summary.interrupted {
            warn!("startup interrupted by shutdown");
        }
        let started = summary.started.len();
        if started == summary.total {
            info!(success = true; "started {started}/{} service(s)", summary.total);
        } else {
            warn!("started {started}/{} service(s)", summary.total);
        }
        Ok(summary)
    }

    /// Poll until every dependency is active or the timeout passes.
    async fn await_dependencies(&self, descriptor: &ServiceDescriptor) {
        for dep in &descriptor.dependencies {
            if dep == &descriptor.name || !self.registry.contains(dep) {
                continue;
            }
            let deadline = Instant::now() + self.settings.dependency_timeout;
            while !self.is_active(dep) {
                if self.is_shutting_down() {
                    return;
                }
                if Instant::now() >= deadline {
                    svc_log!(
                        warn,
                        descriptor,
                        "dependency '{dep}' not active after {:.1}s, starting anyway",
                        self.settings.dependency_timeout.as_secs_f64()
                    );
                    break;
                }
                sleep(self.settings.dependency_poll).await;
            }
        }
    }
}
