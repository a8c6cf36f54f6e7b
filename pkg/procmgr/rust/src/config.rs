// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::env::parse_environment_file;
use crate::registry::ServiceDescriptor;
use crate::restart::{RestartPolicy, RestartSettings};
use anyhow::{Context, Result, bail};
use log::{LevelFilter, debug, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use wojat_log::ColorMode;

const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_NODE_ENV: &str = "production";
const DEFAULT_HTTP_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 8080));
const DEFAULT_GRACE_MS: u64 = 2_000;
const DEFAULT_LAUNCH_DELAY_MS: u64 = 1_000;
const DEFAULT_DEPENDENCY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DEPENDENCY_POLL_MS: u64 = 250;
const DEFAULT_MONITOR_INTERVAL_SEC: u64 = 30;
const DEFAULT_STATUS_INTERVAL_SEC: u64 = 300;
const DEFAULT_STOP_TIMEOUT_SEC: u64 = 5;
/// Upper bound for second-valued settings; timers are scheduled from now.
pub(crate) const MAX_INTERVAL_SECS: u64 = 86_400;
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Secrets children need to do anything useful. Missing ones are reported at
/// startup, never their values.
pub const REQUIRED_SECRETS: &[&str] = &["SUPABASE_URL", "SUPABASE_ANON_KEY", "OPENAI_API_KEY"];

/// Secrets individual services use when present.
pub const OPTIONAL_SECRETS: &[&str] = &[
    "SUPABASE_SERVICE_ROLE_KEY",
    "BITQUERY_API_KEY",
    "TWITTER_USERNAME",
    "TWITTER_PASSWORD",
    "TWITTER_EMAIL",
    "TELEGRAM_BOT_TOKEN",
    "DISCORD_BOT_TOKEN",
    "DISCORD_APPLICATION_ID",
    "APIFY_API_TOKEN",
];

/// One service, as written in `<name>.yaml` under the config directory.
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub display_name: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub shell: bool,
    pub working_dir: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub environment_file: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    pub restart_sec: Option<f64>,
    pub restart_max_delay_sec: Option<f64>,
    pub start_limit_burst: Option<u32>,
    pub start_limit_interval_sec: Option<f64>,
    pub runtime_success_sec: Option<f64>,
    pub stop_timeout: Option<f64>,
}

fn seconds(field: &str, value: Option<f64>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(v) => Duration::try_from_secs_f64(v)
            .with_context(|| format!("{field} must be a non-negative number of seconds, got {v}")),
    }
}

impl ServiceConfig {
    /// Resolve paths against `root` and fold the environment file into the
    /// descriptor's variables (`env` wins over the file).
    pub fn into_descriptor(self, name: &str, root: &Path) -> Result<ServiceDescriptor> {
        if self.command.trim().is_empty() {
            bail!("command must not be empty");
        }
        let defaults = RestartSettings::default();
        let restart = RestartSettings {
            policy: self.restart,
            delay: seconds("restart_sec", self.restart_sec, defaults.delay)?,
            max_delay: seconds(
                "restart_max_delay_sec",
                self.restart_max_delay_sec,
                defaults.max_delay,
            )?,
            start_limit_burst: self.start_limit_burst.unwrap_or(defaults.start_limit_burst),
            start_limit_interval: seconds(
                "start_limit_interval_sec",
                self.start_limit_interval_sec,
                defaults.start_limit_interval,
            )?,
            runtime_success: seconds(
                "runtime_success_sec",
                self.runtime_success_sec,
                defaults.runtime_success,
            )?,
        };
        let stop_timeout = self
            .stop_timeout
            .map(|v| seconds("stop_timeout", Some(v), Duration::ZERO))
            .transpose()?;

        let mut env = BTreeMap::new();
        if let Some(file) = &self.environment_file {
            let path = resolve(root, file);
            env.extend(parse_environment_file(&path)?);
        }
        env.extend(self.env);

        let mut descriptor = ServiceDescriptor::new(name, &self.command);
        descriptor.display_name = self.display_name.unwrap_or_else(|| name.to_string());
        descriptor.args = self.args;
        descriptor.shell = self.shell;
        descriptor.working_dir = match &self.working_dir {
            Some(dir) => resolve(root, dir),
            None => root.to_path_buf(),
        };
        descriptor.port = self.port;
        descriptor.priority = self.priority;
        descriptor.critical = self.critical;
        descriptor.dependencies = self.dependencies;
        descriptor.env = env;
        if let Some(color) = self.color {
            descriptor.color = color;
        }
        descriptor.restart = restart;
        descriptor.stop_timeout = stop_timeout;
        Ok(descriptor)
    }
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Read every `<service>.yaml` (or `.yml`) in `dir`, sorted by file name.
/// Hidden files are ignored; files that fail to parse are logged and skipped.
pub fn load_configs(dir: &Path) -> Result<Vec<(String, ServiceConfig)>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read config directory: {}", dir.display()))?;

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => paths.push(entry.path()),
            Err(e) => warn!("skipping unreadable entry in {}: {e}", dir.display()),
        }
    }
    paths.sort();

    let mut configs = Vec::new();
    for path in paths {
        let Some(name) = service_name(&path) else {
            debug!("not a service definition: {}", path.display());
            continue;
        };
        match parse_config(&path) {
            Ok(config) => configs.push((name.to_string(), config)),
            Err(e) => warn!("skipping {}: {e:#}", path.display()),
        }
    }
    Ok(configs)
}

/// The service a definition file describes, from its file stem.
fn service_name(path: &Path) -> Option<&str> {
    let is_yaml = path
        .extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml");
    let stem = path.file_stem()?.to_str()?;
    (is_yaml && path.is_file() && !stem.starts_with('.')).then_some(stem)
}

fn parse_config(path: &Path) -> Result<ServiceConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: ServiceConfig =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

/// Orchestrator settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Public port, handed to the critical service when it declares none.
    pub public_port: u16,
    pub node_env: String,
    pub config_dir: Option<PathBuf>,
    /// Base for relative working directories and environment files.
    pub root_dir: PathBuf,
    pub http_addr: SocketAddr,
    pub grace_period: Duration,
    pub launch_delay: Duration,
    pub dependency_timeout: Duration,
    pub dependency_poll: Duration,
    pub monitor_interval: Duration,
    pub status_interval: Duration,
    pub stop_timeout: Duration,
    pub log_level: LevelFilter,
    pub log_color: ColorMode,
    /// Parent environment snapshot every child starts from.
    pub base_env: BTreeMap<String, String>,
    /// Problems found while reading the environment, logged once the
    /// logger is up.
    pub warnings: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_vars(BTreeMap::new())
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: BTreeMap<String, String>) -> Self {
        let mut parser = VarParser {
            vars: &vars,
            warnings: Vec::new(),
        };

        let public_port = parser.parse("PORT", DEFAULT_PUBLIC_PORT);
        let http_addr = parser.parse("WOJAT_PM_HTTP_ADDR", DEFAULT_HTTP_ADDR);
        let grace_period = parser.millis("WOJAT_PM_GRACE_MS", DEFAULT_GRACE_MS);
        let launch_delay = parser.millis("WOJAT_PM_LAUNCH_DELAY_MS", DEFAULT_LAUNCH_DELAY_MS);
        let dependency_timeout =
            parser.millis("WOJAT_PM_DEPENDENCY_TIMEOUT_MS", DEFAULT_DEPENDENCY_TIMEOUT_MS);
        let dependency_poll =
            parser.millis("WOJAT_PM_DEPENDENCY_POLL_MS", DEFAULT_DEPENDENCY_POLL_MS);
        let monitor_interval =
            parser.nonzero_secs("WOJAT_PM_MONITOR_INTERVAL_SEC", DEFAULT_MONITOR_INTERVAL_SEC);
        let status_interval =
            parser.nonzero_secs("WOJAT_PM_STATUS_INTERVAL_SEC", DEFAULT_STATUS_INTERVAL_SEC);
        let stop_timeout =
            parser.nonzero_secs("WOJAT_PM_STOP_TIMEOUT_SEC", DEFAULT_STOP_TIMEOUT_SEC);
        // Priority: WOJAT_PM_LOG_LEVEL > RUST_LOG > default
        let log_level = if vars.contains_key("WOJAT_PM_LOG_LEVEL") {
            parser.parse("WOJAT_PM_LOG_LEVEL", DEFAULT_LOG_LEVEL)
        } else {
            parser.parse("RUST_LOG", DEFAULT_LOG_LEVEL)
        };
        let log_color = parser.parse("WOJAT_PM_LOG_COLOR", ColorMode::Auto);
        let warnings = parser.warnings;

        let non_empty = |key: &str| vars.get(key).filter(|v| !v.trim().is_empty()).cloned();

        Self {
            public_port,
            node_env: non_empty("NODE_ENV").unwrap_or_else(|| DEFAULT_NODE_ENV.to_string()),
            config_dir: non_empty("WOJAT_PM_CONFIG_DIR").map(PathBuf::from),
            root_dir: non_empty("WOJAT_PM_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            http_addr,
            grace_period,
            launch_delay,
            dependency_timeout,
            dependency_poll: dependency_poll.max(Duration::from_millis(1)),
            monitor_interval,
            status_interval,
            stop_timeout,
            log_level,
            log_color,
            warnings,
            base_env: vars,
        }
    }

    /// Required secrets absent (or empty) in the parent environment.
    pub fn missing_required_secrets(&self) -> Vec<&'static str> {
        REQUIRED_SECRETS
            .iter()
            .copied()
            .filter(|key| self.base_env.get(*key).is_none_or(|v| v.trim().is_empty()))
            .collect()
    }

    pub fn optional_secrets_present(&self) -> usize {
        OPTIONAL_SECRETS
            .iter()
            .filter(|key| self.base_env.get(**key).is_some_and(|v| !v.trim().is_empty()))
            .count()
    }
}

struct VarParser<'a> {
    vars: &'a BTreeMap<String, String>,
    warnings: Vec<String>,
}

impl VarParser<'_> {
    fn parse<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Display,
    {
        match self.vars.get(key).map(|s| s.trim()) {
            None | Some("") => default,
            Some(raw) => match raw.parse() {
                Ok(v) => v,
                Err(_) => {
                    self.warnings
                        .push(format!("invalid {key}={raw:?}, using default {default}"));
                    default
                }
            },
        }
    }

    fn millis(&mut self, key: &str, default: u64) -> Duration {
        Duration::from_millis(self.parse(key, default))
    }

    /// Whole seconds in `1..=MAX_INTERVAL_SECS`.
    fn nonzero_secs(&mut self, key: &str, default: u64) -> Duration {
        let secs = self.parse(key, default);
        if secs == 0 {
            self.warnings
                .push(format!("{key} must be greater than zero, using default {default}"));
            return Duration::from_secs(default);
        }
        if secs > MAX_INTERVAL_SECS {
            self.warnings.push(format!(
                "{key}={secs} exceeds {MAX_INTERVAL_SECS}, using {MAX_INTERVAL_SECS}"
            ));
            return Duration::from_secs(MAX_INTERVAL_SECS);
        }
        Duration::from_secs(secs)
    }
}
