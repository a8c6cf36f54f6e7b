// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::Orchestrator;
use crate::config::Settings;
use crate::registry::{ServiceDescriptor, ServiceRegistry};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn fast_settings() -> Settings {
    let mut s = Settings::from_vars(BTreeMap::from([(
        "PATH".to_string(),
        "/usr/bin:/bin".to_string(),
    )]));
    s.grace_period = Duration::from_millis(300);
    s.launch_delay = Duration::from_millis(50);
    s.dependency_timeout = Duration::from_millis(500);
    s.dependency_poll = Duration::from_millis(20);
    s.monitor_interval = Duration::from_millis(200);
    s.status_interval = Duration::from_secs(60);
    s.stop_timeout = Duration::from_secs(2);
    s
}

/// A service running `script` under `/bin/sh -c`.
pub(crate) fn sh(name: &str, priority: i32, script: &str, dir: &Path) -> ServiceDescriptor {
    let mut d = ServiceDescriptor::new(name, "/bin/sh");
    d.args = vec!["-c".into(), script.into()];
    d.priority = priority;
    d.working_dir = dir.to_path_buf();
    d
}

/// `/bin/sleep 30`, exec'd directly so signals reach it unfiltered.
pub(crate) fn sleeper(name: &str, priority: i32, dir: &Path) -> ServiceDescriptor {
    let mut d = ServiceDescriptor::new(name, "/bin/sleep");
    d.args = vec!["30".into()];
    d.priority = priority;
    d.working_dir = dir.to_path_buf();
    d
}

pub(crate) fn orchestrator(services: Vec<ServiceDescriptor>) -> Arc<Orchestrator> {
    orchestrator_with(services, fast_settings())
}

pub(crate) fn orchestrator_with(
    services: Vec<ServiceDescriptor>,
    settings: Settings,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        ServiceRegistry::new(services).unwrap(),
        settings,
    ))
}

/// Pid written to `path` by a test script, once it appears.
pub(crate) async fn read_pid_file(path: &Path) -> u32 {
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(path)
            && let Ok(pid) = text.trim().parse()
        {
            return pid;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never appeared", path.display());
}

/// A zombie waiting for an absent reaper counts as gone.
pub(crate) fn is_running(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next())
        .is_some_and(|state| state != 'Z' && state != 'X')
}

pub(crate) async fn wait_until_gone(pid: u32, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if !is_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    !is_running(pid)
}
