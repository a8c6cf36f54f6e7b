// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{LifecycleError, Result};
use crate::registry::ServiceDescriptor;
use crate::state::ProcessState;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const SHELL: &str = "/bin/sh";

/// How a child ended: an exit code, a terminating signal, or (rarely) neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitReport {
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn from_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }

    /// Exit observed but not attributable (e.g. `wait` itself failed).
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => match Signal::try_from(sig) {
                Ok(s) => write!(f, "signal {s}"),
                Err(_) => write!(f, "signal {sig}"),
            },
            (None, None) => write!(f, "unknown exit"),
        }
    }
}

/// One running instance of a service. Lives in the orchestrator's active map
/// from spawn until its exit is observed.
#[derive(Debug)]
pub struct ManagedProcess {
    descriptor: Arc<ServiceDescriptor>,
    pid: u32,
    generation: u64,
    state: ProcessState,
    started_at: Instant,
    last_exit: Option<ExitReport>,
    exit_rx: watch::Receiver<Option<ExitReport>>,
    watcher: Option<JoinHandle<()>>,
}

/// A freshly spawned child, before the orchestrator splits it into the
/// record, the OS handle owned by the watcher, and the exit publisher.
#[derive(Debug)]
pub(crate) struct Spawned {
    pub process: ManagedProcess,
    pub child: Child,
    pub exit_tx: watch::Sender<Option<ExitReport>>,
}

impl ManagedProcess {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn last_exit(&self) -> Option<ExitReport> {
        self.last_exit
    }

    pub fn exit_receiver(&self) -> watch::Receiver<Option<ExitReport>> {
        self.exit_rx.clone()
    }

    /// The exit has been published, whether or not the record was cleaned up.
    pub fn exit_observed(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub fn watcher_finished(&self) -> bool {
        self.watcher.as_ref().is_some_and(JoinHandle::is_finished)
    }

    pub(crate) fn set_watcher(&mut self, watcher: JoinHandle<()>) {
        self.watcher = Some(watcher);
    }

    /// Apply a state change. Invalid transitions are refused and logged.
    pub(crate) fn transition(&mut self, next: ProcessState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            warn!(
                service = self.descriptor.name.as_str();
                "refusing state change {} -> {next} (generation {})",
                self.state,
                self.generation
            );
            return false;
        }
        self.state = next;
        true
    }

    /// Record the OS-reported exit. A Killed record stays Killed.
    pub(crate) fn record_exit(&mut self, exit: ExitReport) {
        self.last_exit = Some(exit);
        if self.state != ProcessState::Killed {
            self.transition(ProcessState::Exited);
        }
    }
}

/// Build the launch command for a descriptor.
fn build_command(descriptor: &ServiceDescriptor, env: &BTreeMap<String, String>) -> Command {
    let mut cmd = if descriptor.shell {
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(descriptor.command_line());
        cmd
    } else {
        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args);
        cmd
    };
    // Each child leads its own process group, so signals reach whatever it
    // forks (npm scripts, node supervisors) and not the orchestrator.
    cmd.current_dir(&descriptor.working_dir)
        .process_group(0)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

pub(crate) fn spawn(
    descriptor: Arc<ServiceDescriptor>,
    env: &BTreeMap<String, String>,
    generation: u64,
) -> Result<Spawned> {
    let child = build_command(&descriptor, env)
        .spawn()
        .map_err(|source| LifecycleError::Launch {
            service: descriptor.name.clone(),
            command: descriptor.command_line(),
            source,
        })?;
    // id() is only None once the child has been reaped, which cannot have
    // happened yet.
    let pid = child.id().unwrap_or(0);
    let (exit_tx, exit_rx) = watch::channel(None);
    debug!(
        service = descriptor.name.as_str();
        "spawned (pid={pid}, generation={generation}, cmd={})",
        descriptor.command_line()
    );

    Ok(Spawned {
        process: ManagedProcess {
            descriptor,
            pid,
            generation,
            state: ProcessState::Starting,
            started_at: Instant::now(),
            last_exit: None,
            exit_rx,
            watcher: None,
        },
        child,
        exit_tx,
    })
}

/// Deliver `sig` to the process group `pgid` leads. A group that is already
/// gone is not an error.
pub fn signal_group(service: &str, pgid: u32, sig: Signal) {
    if pgid == 0 {
        return;
    }
    match signal::killpg(Pid::from_raw(pgid as i32), sig) {
        Ok(()) => debug!(service = service; "sent {sig} to process group {pgid}"),
        Err(Errno::ESRCH) => {
            debug!(service = service; "process group {pgid} already gone, {sig} not sent")
        }
        Err(e) => warn!(service = service; "failed to send {sig} to process group {pgid}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn descriptor(command: &str, args: &[&str]) -> Arc<ServiceDescriptor> {
        let mut d = ServiceDescriptor::new("test", command);
        d.args = args.iter().map(|s| s.to_string()).collect();
        d.working_dir = PathBuf::from("/tmp");
        Arc::new(d)
    }

    fn path_env() -> BTreeMap<String, String> {
        BTreeMap::from([("PATH".to_string(), "/usr/bin:/bin".to_string())])
    }

    #[test]
    fn test_exit_report_display() {
        assert_eq!(ExitReport::from_code(3).to_string(), "exit code 3");
        assert_eq!(ExitReport::from_signal(9).to_string(), "signal SIGKILL");
        assert_eq!(ExitReport::unknown().to_string(), "unknown exit");
    }

    #[test]
    fn test_exit_report_success() {
        assert!(ExitReport::from_code(0).success());
        assert!(!ExitReport::from_code(1).success());
        assert!(!ExitReport::from_signal(15).success());
        assert!(!ExitReport::unknown().success());
    }

    #[tokio::test]
    async fn test_spawn_reports_exit_code() {
        let spawned = spawn(descriptor("/bin/sh", &["-c", "exit 7"]), &path_env(), 1).unwrap();
        assert_eq!(spawned.process.state(), ProcessState::Starting);
        assert_eq!(spawned.process.generation(), 1);
        assert!(spawned.process.pid() > 0);

        let mut child = spawned.child;
        let status = child.wait().await.unwrap();
        assert_eq!(ExitReport::from_status(status), ExitReport::from_code(7));
    }

    #[tokio::test]
    async fn test_spawn_uses_only_given_environment() {
        let mut env = path_env();
        env.insert("MY_EXIT_CODE".into(), "42".into());
        let d = descriptor("/bin/sh", &["-c", "test -z \"$HOME\" && exit $MY_EXIT_CODE"]);
        let mut child = spawn(d, &env, 1).unwrap().child;
        assert_eq!(child.wait().await.unwrap().code(), Some(42));
    }

    #[tokio::test]
    async fn test_spawn_shell_mode() {
        let mut d = ServiceDescriptor::new("shell", "exit");
        d.args = vec!["5".into()];
        d.shell = true;
        d.working_dir = PathBuf::from("/tmp");
        let mut child = spawn(Arc::new(d), &path_env(), 1).unwrap().child;
        assert_eq!(child.wait().await.unwrap().code(), Some(5));
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_binary() {
        let err = spawn(descriptor("/nonexistent/binary", &[]), &path_env(), 1).unwrap_err();
        assert!(matches!(err, LifecycleError::Launch { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_signal_group_terminates() {
        let spawned = spawn(descriptor("/bin/sleep", &["60"]), &path_env(), 1).unwrap();
        signal_group("test", spawned.process.pid(), Signal::SIGTERM);
        let mut child = spawned.child;
        let report = ExitReport::from_status(child.wait().await.unwrap());
        assert_eq!(report.signal, Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn test_signal_group_to_missing_pid_does_not_panic() {
        signal_group("test", 0, Signal::SIGTERM);
        signal_group("test", i32::MAX as u32, Signal::SIGTERM);
    }

    #[tokio::test]
    async fn test_record_exit_keeps_killed() {
        let mut spawned = spawn(descriptor("/bin/sleep", &["60"]), &path_env(), 1).unwrap();
        let process = &mut spawned.process;
        assert!(process.transition(ProcessState::Running));
        assert!(process.transition(ProcessState::Killed));
        process.record_exit(ExitReport::from_signal(9));
        assert_eq!(process.state(), ProcessState::Killed);
        assert_eq!(process.last_exit(), Some(ExitReport::from_signal(9)));
        assert!(!process.transition(ProcessState::Running));

        let _ = spawned.child.kill().await;
    }
}
