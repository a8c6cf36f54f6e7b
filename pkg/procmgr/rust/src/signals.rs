// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::orchestrator::ShutdownSignal;
use anyhow::{Context, Result};
use tokio::signal::unix::{Signal, SignalKind, signal};

/// SIGTERM, SIGINT and SIGUSR2 listeners. Install early: a signal that
/// arrives before installation gets the default disposition.
pub struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
    sigusr2: Signal,
}

impl ShutdownSignals {
    pub fn install() -> Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("failed to setup SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("failed to setup SIGINT handler")?,
            sigusr2: signal(SignalKind::user_defined2())
                .context("failed to setup SIGUSR2 handler")?,
        })
    }

    /// Wait for the next termination request.
    pub async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.sigterm.recv() => ShutdownSignal::Terminate,
            _ = self.sigint.recv() => ShutdownSignal::Interrupt,
            _ = self.sigusr2.recv() => ShutdownSignal::Restart,
        }
    }
}
