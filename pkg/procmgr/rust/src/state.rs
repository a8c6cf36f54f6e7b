// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Spawned, still inside the startup grace window.
    Starting,
    /// Survived the grace window.
    Running,
    /// The OS reported the exit.
    Exited,
    /// Force-killed by the shutdown coordinator.
    Killed,
}

impl ProcessState {
    pub fn is_alive(self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Running)
    }

    pub(crate) fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Exited)
                | (Starting, Killed)
                | (Running, Exited)
                | (Running, Killed)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Exited => write!(f, "exited"),
            ProcessState::Killed => write!(f, "killed"),
        }
    }
}
