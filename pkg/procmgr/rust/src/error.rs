// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::process::ExitReport;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong in one service's lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    // Configuration
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("[{service}] working directory does not exist: {}", path.display())]
    MissingWorkingDirectory { service: String, path: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    // Launch / startup
    #[error("[{service}] failed to spawn '{command}': {source}")]
    Launch {
        service: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{service}] exited during startup ({exit})")]
    StartupFailure { service: String, exit: ExitReport },

    #[error("[{0}] is already running")]
    AlreadyRunning(String),

    #[error("shutdown in progress, refusing to start '{0}'")]
    ShuttingDown(String),

    #[error("critical service '{service}' failed to start")]
    CriticalServiceFailed {
        service: String,
        #[source]
        source: Box<LifecycleError>,
    },

    // Runtime
    #[error("[{service}] crashed ({exit})")]
    RuntimeCrash { service: String, exit: ExitReport },

    #[error("[{service}] did not exit within {}s", timeout.as_secs_f64())]
    ShutdownTimeout { service: String, timeout: Duration },
}

impl LifecycleError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LifecycleError::UnknownService(_)
                | LifecycleError::MissingWorkingDirectory { .. }
                | LifecycleError::InvalidConfiguration(_)
        )
    }

    /// Exit code carried by a startup failure or crash, if the child had one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            LifecycleError::StartupFailure { exit, .. }
            | LifecycleError::RuntimeCrash { exit, .. } => exit.code,
            LifecycleError::CriticalServiceFailed { source, .. } => source.exit_code(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_failure_carries_code() {
        let err = LifecycleError::StartupFailure {
            service: "x".into(),
            exit: ExitReport::from_code(127),
        };
        assert_eq!(err.exit_code(), Some(127));
        assert_eq!(err.to_string(), "[x] exited during startup (exit code 127)");
    }

    #[test]
    fn test_critical_failure_unwraps_code() {
        let err = LifecycleError::CriticalServiceFailed {
            service: "frontend".into(),
            source: Box::new(LifecycleError::StartupFailure {
                service: "frontend".into(),
                exit: ExitReport::from_code(3),
            }),
        };
        assert_eq!(err.exit_code(), Some(3));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_configuration_family() {
        assert!(LifecycleError::UnknownService("a".into()).is_configuration());
        assert!(
            LifecycleError::MissingWorkingDirectory {
                service: "a".into(),
                path: PathBuf::from("/nope"),
            }
            .is_configuration()
        );
        assert!(!LifecycleError::AlreadyRunning("a".into()).is_configuration());
    }

    #[test]
    fn test_shutdown_timeout_message() {
        let err = LifecycleError::ShutdownTimeout {
            service: "elizaos".into(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "[elizaos] did not exit within 1.5s");
    }
}
