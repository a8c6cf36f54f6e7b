// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The static table of services the orchestrator knows about.

use crate::config::{ServiceConfig, Settings, load_configs};
use crate::error::{LifecycleError, Result};
use crate::restart::RestartSettings;
use log::warn;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_COLOR: &str = "white";

/// Everything needed to launch one service. Immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub display_name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Run `command args...` through `/bin/sh -c`.
    pub shell: bool,
    pub working_dir: PathBuf,
    pub port: Option<u16>,
    /// Lower starts earlier. Ties keep registration order.
    pub priority: i32,
    pub critical: bool,
    pub dependencies: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub color: String,
    pub restart: RestartSettings,
    /// Overrides the orchestrator-wide stop timeout.
    pub stop_timeout: Option<Duration>,
}

impl ServiceDescriptor {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: name.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            shell: false,
            working_dir: PathBuf::from("."),
            port: None,
            priority: 0,
            critical: false,
            dependencies: Vec::new(),
            env: BTreeMap::new(),
            color: DEFAULT_COLOR.to_string(),
            restart: RestartSettings::default(),
            stop_timeout: None,
        }
    }

    /// The invocation as a single string, for logs and shell mode.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<ServiceDescriptor>>,
    index: HashMap<String, usize>,
}

impl ServiceRegistry {
    /// Build a registry. Duplicate names are rejected; dependencies on
    /// unregistered names are only warned about.
    pub fn new(descriptors: Vec<ServiceDescriptor>) -> Result<Self> {
        let mut registry = Self::default();
        for d in descriptors {
            if d.name.is_empty() {
                return Err(LifecycleError::InvalidConfiguration(
                    "service name must not be empty".to_string(),
                ));
            }
            if registry.index.contains_key(&d.name) {
                return Err(LifecycleError::InvalidConfiguration(format!(
                    "duplicate service name '{}'",
                    d.name
                )));
            }
            registry.index.insert(d.name.clone(), registry.services.len());
            registry.services.push(Arc::new(d));
        }
        for d in &registry.services {
            for dep in &d.dependencies {
                if dep == &d.name {
                    warn!(service = d.name.as_str(); "service depends on itself, ignoring");
                } else if !registry.index.contains_key(dep) {
                    warn!(service = d.name.as_str(); "unknown dependency '{dep}'");
                }
            }
        }
        Ok(registry)
    }

    /// Load from `settings.config_dir` when set, otherwise the built-in
    /// table. The critical service inherits the public port if it has none.
    pub fn load(settings: &Settings) -> anyhow::Result<Self> {
        let mut descriptors = match &settings.config_dir {
            Some(dir) => from_config_dir(dir, &settings.root_dir)?,
            None => builtin(&settings.root_dir),
        };
        for d in descriptors.iter_mut().filter(|d| d.critical && d.port.is_none()) {
            d.port = Some(settings.public_port);
        }
        Ok(Self::new(descriptors)?)
    }

    /// Every service, sorted by priority. The sort is stable, so equal
    /// priorities keep registration order.
    pub fn all_services(&self) -> Vec<Arc<ServiceDescriptor>> {
        let mut all = self.services.clone();
        all.sort_by_key(|d| d.priority);
        all
    }

    pub fn get(&self, name: &str) -> Result<Arc<ServiceDescriptor>> {
        self.index
            .get(name)
            .map(|&i| self.services[i].clone())
            .ok_or_else(|| LifecycleError::UnknownService(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|d| d.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Problems that would make startup fail or degrade, without spawning
    /// anything.
    pub fn problems(&self) -> Vec<String> {
        let sorted = self.all_services();
        let order: HashMap<&str, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.as_str(), i))
            .collect();
        let mut problems = Vec::new();
        for d in &self.services {
            if !d.working_dir.is_dir() {
                problems.push(format!(
                    "[{}] working directory does not exist: {}",
                    d.name,
                    d.working_dir.display()
                ));
            }
            for dep in &d.dependencies {
                if dep == &d.name {
                    problems.push(format!("[{}] depends on itself", d.name));
                    continue;
                }
                match (order.get(dep.as_str()), order.get(d.name.as_str())) {
                    (None, _) => problems.push(format!("[{}] unknown dependency '{dep}'", d.name)),
                    (Some(dep_pos), Some(pos)) if dep_pos >= pos => problems.push(format!(
                        "[{}] dependency '{dep}' is started after it (priority {} vs {})",
                        d.name,
                        self.services[self.index[dep]].priority,
                        d.priority
                    )),
                    _ => {}
                }
            }
        }
        if self.services.iter().filter(|d| d.critical).count() > 1 {
            problems.push("more than one service is marked critical".to_string());
        }
        problems
    }
}

fn from_config_dir(dir: &Path, root: &Path) -> anyhow::Result<Vec<ServiceDescriptor>> {
    let configs: Vec<(String, ServiceConfig)> = load_configs(dir)?;
    let mut descriptors = Vec::with_capacity(configs.len());
    for (name, config) in configs {
        match config.into_descriptor(&name, root) {
            Ok(d) => descriptors.push(d),
            Err(e) => warn!("skipping service '{name}': {e:#}"),
        }
    }
    Ok(descriptors)
}

/// The Wojat platform services, relative to `root`.
pub fn builtin(root: &Path) -> Vec<ServiceDescriptor> {
    let service = |name: &str, display: &str, command: &str, args: &[&str], dir: &str| {
        let mut d = ServiceDescriptor::new(name, command);
        d.display_name = display.to_string();
        d.args = args.iter().map(|a| a.to_string()).collect();
        d.working_dir = root.join(dir);
        d
    };

    let mut frontend = service(
        "frontend",
        "Frontend (Next.js)",
        "npm",
        &["run", "start"],
        "frontend",
    );
    frontend.priority = 1;
    frontend.critical = true;
    frontend.color = "cyan".to_string();

    let mut bitquery = service(
        "bitquery",
        "Bitquery Service",
        "node",
        &["index.js"],
        "bitquery",
    );
    bitquery.priority = 2;
    bitquery.color = "blue".to_string();

    let mut elizaos = service(
        "elizaos",
        "ElizaOS Agents",
        "node",
        &["railway-start.js"],
        "elizaos-agents",
    );
    elizaos.priority = 3;
    elizaos.color = "magenta".to_string();

    let mut scrapers = service(
        "scrapers",
        "Data Scrapers",
        "node",
        &["railway-start.js"],
        "js-scraper",
    );
    scrapers.priority = 4;
    scrapers.color = "yellow".to_string();

    vec![frontend, bitquery, elizaos, scrapers]
}
