// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Supervisor for the Wojat platform's child services: ordered startup,
//! crash restarts, health reporting and coordinated shutdown.

/// Log through `log` with the service label and color attached.
macro_rules! svc_log {
    ($level:ident, $d:expr, $($arg:tt)+) => {
        log::$level!(service = $d.name.as_str(), color = $d.color.as_str(); $($arg)+)
    };
}

/// Info line rendered with the success symbol.
macro_rules! svc_success {
    ($d:expr, $($arg:tt)+) => {
        log::info!(service = $d.name.as_str(), color = $d.color.as_str(), success = true; $($arg)+)
    };
}

pub mod config;
pub mod env;
pub mod error;
pub mod orchestrator;
mod output;
pub mod process;
pub mod registry;
pub mod restart;
pub mod server;
pub mod signals;
pub mod state;

pub use config::Settings;
pub use error::{LifecycleError, Result};
pub use orchestrator::{
    HealthReport, Orchestrator, ProcessStatus, ShutdownReport, ShutdownSignal, StartupSummary,
    StopOutcome,
};
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use state::ProcessState;
