// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment that keeps the daemon quick and its output parseable.
fn base_command(config_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_wojat-procmgrd"));
    cmd.env_clear()
        .env("PATH", "/usr/bin:/bin")
        .env("WOJAT_PM_CONFIG_DIR", config_dir)
        .env("WOJAT_PM_ROOT", config_dir)
        .env("WOJAT_PM_HTTP_ADDR", "127.0.0.1:0")
        .env("WOJAT_PM_GRACE_MS", "300")
        .env("WOJAT_PM_LAUNCH_DELAY_MS", "50")
        .env("WOJAT_PM_DEPENDENCY_TIMEOUT_MS", "1000")
        .env("WOJAT_PM_DEPENDENCY_POLL_MS", "20")
        .env("WOJAT_PM_STOP_TIMEOUT_SEC", "2")
        .env("WOJAT_PM_LOG_LEVEL", "debug")
        .env("WOJAT_PM_LOG_COLOR", "never");
    cmd
}

/// Run `wojat-procmgrd check` to completion.
pub fn run_check(config_dir: &Path, extra_env: &[(&str, &str)]) -> Output {
    let mut cmd = base_command(config_dir);
    cmd.arg("check").envs(extra_env.iter().copied());
    cmd.output().expect("failed to run wojat-procmgrd check")
}

/// Handle to a running wojat-procmgrd daemon process.
pub struct DaemonHandle {
    child: Child,
    log_lines: Arc<Mutex<Vec<String>>>,
    _reader_thread: std::thread::JoinHandle<()>,
    _stderr_thread: std::thread::JoinHandle<()>,
}

fn collect_lines<R: Read + Send + 'static>(
    reader: R,
    tag: &'static str,
    lines: Arc<Mutex<Vec<String>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(l) => {
                    eprintln!("[{tag}] {l}");
                    lines.lock().unwrap().push(l);
                }
                Err(_) => break,
            }
        }
    })
}

impl DaemonHandle {
    /// Start the daemon with `WOJAT_PM_CONFIG_DIR` pointing to the given directory.
    pub fn start(config_dir: &Path) -> Self {
        Self::start_with_env(config_dir, &[])
    }

    pub fn start_with_env(config_dir: &Path, extra_env: &[(&str, &str)]) -> Self {
        let mut child = base_command(config_dir)
            .envs(extra_env.iter().copied())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start wojat-procmgrd");

        let stdout = child.stdout.take().expect("failed to capture stdout");
        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));

        // Info and below go to stdout, warnings and errors to stderr.
        let reader_thread = collect_lines(stdout, "daemon", Arc::clone(&log_lines));
        let stderr_thread = collect_lines(stderr, "daemon:err", Arc::clone(&log_lines));

        Self {
            child,
            log_lines,
            _reader_thread: reader_thread,
            _stderr_thread: stderr_thread,
        }
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        self.wait_for_log_count(pattern, 1, timeout)
    }

    /// Wait until a log line containing `pattern` appears using the default timeout.
    pub fn wait_for_log_default(&self, pattern: &str) -> bool {
        self.wait_for_log(pattern, DEFAULT_TIMEOUT)
    }

    /// Count how many log lines contain `pattern`.
    pub fn count_log_matches(&self, pattern: &str) -> usize {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().filter(|l| l.contains(pattern)).count()
    }

    /// Wait until the count of log lines matching `pattern` reaches at least `n`.
    pub fn wait_for_log_count(&self, pattern: &str, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count_log_matches(pattern) >= n {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// First log line containing `pattern`, if any.
    pub fn find_log(&self, pattern: &str) -> Option<String> {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().find(|l| l.contains(pattern)).cloned()
    }

    /// Send a signal to the daemon process.
    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to daemon");
    }

    /// Send SIGTERM and wait for the daemon to exit. Returns the exit status.
    pub fn stop(&mut self) -> ExitStatus {
        self.send_signal(Signal::SIGTERM);
        self.wait_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Wait for the daemon to exit within the given timeout.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .child
                .try_wait()
                .expect("failed to check daemon status")
            {
                Some(status) => return status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        return self.child.wait().expect("failed to wait on killed daemon");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// Index of the first log line containing `pattern`. Lines from the same
    /// stream keep their order.
    pub fn log_position(&self, pattern: &str) -> Option<usize> {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().position(|l| l.contains(pattern))
    }

    /// Extract PIDs from "<name> started (pid=NNN" log lines. Restarts log
    /// this line too, once per new instance.
    pub fn started_pids(&self) -> Vec<u32> {
        let lines = self.log_lines.lock().unwrap();
        lines
            .iter()
            .filter_map(|l| {
                let marker = " started (pid=";
                let start = l.find(marker)? + marker.len();
                let end = l[start..].find(|c: char| !c.is_ascii_digit())? + start;
                l[start..end].parse().ok()
            })
            .collect()
    }

    /// The address from the "listening on http://ADDR/health" line.
    pub fn http_addr(&self) -> String {
        assert!(
            self.wait_for_log_default("listening on http://"),
            "health endpoint never came up"
        );
        let line = self.find_log("listening on http://").unwrap();
        let start = line.find("http://").unwrap() + "http://".len();
        let end = line[start..].find('/').unwrap() + start;
        line[start..end].to_string()
    }

    /// `GET path` against the health endpoint; returns the raw response.
    pub fn http_get(&self, path: &str) -> String {
        let mut stream = TcpStream::connect(self.http_addr()).expect("failed to connect");
        stream
            .set_read_timeout(Some(DEFAULT_TIMEOUT))
            .expect("failed to set read timeout");
        write!(
            stream,
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .expect("failed to send request");
        let mut raw = String::new();
        stream
            .read_to_string(&mut raw)
            .expect("failed to read response");
        raw
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Write a YAML config file into `dir` with the given service `name`.
pub fn write_config(dir: &Path, name: &str, yaml: &str) {
    let path = dir.join(format!("{name}.yaml"));
    std::fs::write(&path, yaml)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
}

/// Check if a PID is still alive.
pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Wait until a PID is no longer alive, or timeout.
pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !pid_is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
