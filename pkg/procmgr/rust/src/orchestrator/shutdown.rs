// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::{Orchestrator, lock};
use crate::error::LifecycleError;
use crate::process::{self, ExitReport};
use crate::registry::ServiceDescriptor;
use crate::state::ProcessState;
use log::{error, info, warn};
use nix::sys::signal::Signal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// How long to wait for the OS to reap a child after SIGKILL.
const SIGKILL_TIMEOUT: Duration = Duration::from_secs(1);

/// The OS signal that asked the orchestrator to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
    /// SIGUSR2, the platform's restart request.
    Restart,
}

impl ShutdownSignal {
    /// What children receive: SIGTERM stays SIGTERM, everything else
    /// becomes SIGINT.
    pub fn child_signal(self) -> Signal {
        match self {
            ShutdownSignal::Terminate => Signal::SIGTERM,
            ShutdownSignal::Interrupt | ShutdownSignal::Restart => Signal::SIGINT,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Restart => write!(f, "SIGUSR2"),
        }
    }
}

/// How one child ended during shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    pub name: String,
    pub pid: u32,
    pub final_state: ProcessState,
    /// `None` if the child could not be reaped even after SIGKILL.
    pub exit: Option<ExitReport>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub signal: ShutdownSignal,
    pub outcomes: Vec<StopOutcome>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn killed(&self) -> impl Iterator<Item = &StopOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.final_state == ProcessState::Killed)
    }
}

struct StopTarget {
    descriptor: Arc<ServiceDescriptor>,
    pid: u32,
    generation: u64,
    exit_rx: watch::Receiver<Option<ExitReport>>,
}

impl Orchestrator {
    /// Stop every child in parallel.
    ///
    /// Only the first call does anything; concurrent and later calls return
    /// `None` straight away. Each child gets the forwarded signal and its stop
    /// timeout, then SIGKILL. Also cancels the monitor and pending restarts,
    /// and makes further `start` calls fail.
    pub async fn shutdown(self: &Arc<Self>, signal: ShutdownSignal) -> Option<ShutdownReport> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("shutdown already in progress, ignoring {signal}");
            return None;
        }
        let began = Instant::now();
        warn!("received {signal}, shutting down gracefully...");
        self.cancel.cancel();

        let targets: Vec<StopTarget> = lock(&self.active)
            .values()
            .map(|p| StopTarget {
                descriptor: p.descriptor().clone(),
                pid: p.pid(),
                generation: p.generation(),
                exit_rx: p.exit_receiver(),
            })
            .collect();

        let child_signal = signal.child_signal();
        let mut tasks = JoinSet::new();
        for target in targets {
            let orch = Arc::clone(self);
            let stop_timeout = target
                .descriptor
                .stop_timeout
                .unwrap_or(self.settings.stop_timeout);
            tasks.spawn(async move { orch.stop_one(target, child_signal, stop_timeout).await });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("stop task failed: {e}"),
            }
        }
        outcomes.sort_by(|a, b| a.name.cmp(&b.name));

        let report = ShutdownReport {
            signal,
            outcomes,
            elapsed: began.elapsed(),
        };
        let killed = report.killed().count();
        info!(
            success = true;
            "stopped {} service(s) in {:.1}s ({killed} force-killed), up {}s",
            report.outcomes.len(),
            report.elapsed.as_secs_f64(),
            self.uptime().as_secs()
        );
        Some(report)
    }

    async fn stop_one(
        &self,
        target: StopTarget,
        sig: Signal,
        stop_timeout: Duration,
    ) -> StopOutcome {
        let StopTarget {
            descriptor,
            pid,
            generation,
            mut exit_rx,
        } = target;
        let began = Instant::now();
        svc_log!(info, descriptor, "stopping (pid={pid}, {sig})...");
        process::signal_group(&descriptor.name, pid, sig);

        let waited = timeout(stop_timeout, exit_rx.wait_for(Option::is_some))
            .await
            .map(|res| res.ok().and_then(|r| *r));

        let (final_state, exit) = match waited {
            Ok(exit) => {
                match exit {
                    Some(exit) => svc_success!(descriptor, "stopped ({exit})"),
                    None => svc_log!(warn, descriptor, "stopped, exit status unknown"),
                }
                (ProcessState::Exited, exit)
            }
            Err(_) => {
                let err = LifecycleError::ShutdownTimeout {
                    service: descriptor.name.clone(),
                    timeout: stop_timeout,
                };
                svc_log!(warn, descriptor, "{err}, sending SIGKILL");
                self.mark_killed(&descriptor.name, generation);
                process::signal_group(&descriptor.name, pid, Signal::SIGKILL);
                let reaped = timeout(SIGKILL_TIMEOUT, exit_rx.wait_for(Option::is_some))
                    .await
                    .ok()
                    .and_then(|res| res.ok().and_then(|r| *r));
                if reaped.is_none() {
                    svc_log!(error, descriptor, "still running after SIGKILL, giving up");
                }
                (ProcessState::Killed, reaped)
            }
        };

        StopOutcome {
            name: descriptor.name.clone(),
            pid,
            final_state,
            exit,
            elapsed_ms: began.elapsed().as_millis(),
        }
    }

    fn mark_killed(&self, name: &str, generation: u64) {
        if let Some(p) = lock(&self.active).get_mut(name)
            && p.generation() == generation
        {
            p.transition(ProcessState::Killed);
        }
    }
}
