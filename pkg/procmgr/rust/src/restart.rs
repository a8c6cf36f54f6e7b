// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Restart policy and per-service crash bookkeeping.

use crate::process::ExitReport;
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RESTART_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_START_LIMIT_BURST: u32 = 10;
pub const DEFAULT_START_LIMIT_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_RUNTIME_SUCCESS: Duration = Duration::from_secs(60);
const RESTART_BACKOFF_BASE: u32 = 2;

/// When a crashed service is started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Restart regardless of exit code.
    #[default]
    Always,
    /// Restart only on a non-zero exit or a signal.
    OnFailure,
    Never,
}

impl RestartPolicy {
    pub fn should_restart(self, exit: &ExitReport) -> bool {
        match self {
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => !exit.success(),
            RestartPolicy::Never => false,
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::OnFailure => write!(f, "on-failure"),
            RestartPolicy::Never => write!(f, "never"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestartSettings {
    pub policy: RestartPolicy,
    /// Delay before the first restart; doubles with each consecutive failure.
    pub delay: Duration,
    pub max_delay: Duration,
    /// Restarts allowed within `start_limit_interval`. Zero disables the ceiling.
    pub start_limit_burst: u32,
    pub start_limit_interval: Duration,
    /// A run at least this long resets the failure counter. Zero disables.
    pub runtime_success: Duration,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            policy: RestartPolicy::default(),
            delay: DEFAULT_RESTART_DELAY,
            max_delay: DEFAULT_RESTART_MAX_DELAY,
            start_limit_burst: DEFAULT_START_LIMIT_BURST,
            start_limit_interval: DEFAULT_START_LIMIT_INTERVAL,
            runtime_success: DEFAULT_RUNTIME_SUCCESS,
        }
    }
}

/// Crash history for one service name. Survives across generations.
#[derive(Debug, Default)]
pub struct RestartTracker {
    consecutive_failures: u32,
    recent_restarts: VecDeque<Instant>,
    total_restarts: u32,
    /// A crash was seen and no restart has been attempted for it yet.
    pending: bool,
}

impl RestartTracker {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_restarts(&self) -> u32 {
        self.total_restarts
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }

    /// Account for a crash of a process that had been up for `uptime`.
    pub fn record_crash(&mut self, uptime: Duration, settings: &RestartSettings) {
        if !settings.runtime_success.is_zero() && uptime >= settings.runtime_success {
            self.consecutive_failures = 1;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        self.pending = true;
    }

    /// A restart attempt that did not survive the grace window.
    pub fn record_failed_attempt(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn record_restart(&mut self, now: Instant) {
        self.recent_restarts.push_back(now);
        self.total_restarts = self.total_restarts.saturating_add(1);
    }

    pub fn limit_reached(&mut self, settings: &RestartSettings, now: Instant) -> bool {
        if settings.start_limit_burst == 0 {
            return false;
        }
        while let Some(&oldest) = self.recent_restarts.front() {
            if now.saturating_duration_since(oldest) > settings.start_limit_interval {
                self.recent_restarts.pop_front();
            } else {
                break;
            }
        }
        self.recent_restarts.len() >= settings.start_limit_burst as usize
    }

    /// `delay * 2^(failures-1)`, capped at `max_delay`.
    pub fn next_delay(&self, settings: &RestartSettings) -> Duration {
        if self.consecutive_failures <= 1 {
            return settings.delay.min(settings.max_delay);
        }
        let exponent = self.consecutive_failures - 1;
        let factor = RESTART_BACKOFF_BASE.saturating_pow(exponent);
        settings.delay.saturating_mul(factor).min(settings.max_delay)
    }
}
