// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Console logger for the Wojat process orchestrator.
//!
//! Lines look like `12:03:44.120 ✅ [frontend] started (pid=4242)`. Three
//! structured keys on a record change how it renders:
//!
//! * `service`: the label shown in brackets (defaults to `procmgr`)
//! * `color`: ANSI color name applied to the whole line
//! * `success`: `true` swaps the info symbol for the success one
//!
//! Info and lower go to stdout, warnings and errors to stderr.

use log::kv::{Key, Value};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::{IsTerminal, Write};
use std::str::FromStr;
use time::OffsetDateTime;
use time::macros::format_description;

pub const SERVICE_KEY: &str = "service";
pub const COLOR_KEY: &str = "color";
pub const SUCCESS_KEY: &str = "success";

const DEFAULT_LABEL: &str = "procmgr";
const RESET: &str = "\x1b[0m";
const BRIGHT: &str = "\x1b[1m";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// Color only when stdout is a terminal.
    #[default]
    Auto,
    Always,
    Never,
}

impl FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ColorMode::Auto),
            "always" | "true" | "1" => Ok(ColorMode::Always),
            "never" | "false" | "0" => Ok(ColorMode::Never),
            other => Err(format!("unknown color mode: {other}")),
        }
    }
}

impl std::fmt::Display for ColorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorMode::Auto => write!(f, "auto"),
            ColorMode::Always => write!(f, "always"),
            ColorMode::Never => write!(f, "never"),
        }
    }
}

impl ColorMode {
    fn enabled(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => std::io::stdout().is_terminal(),
        }
    }
}

/// ANSI escape for a color name, `None` for names we don't know.
pub fn ansi_code(color: &str) -> Option<&'static str> {
    match color.to_ascii_lowercase().as_str() {
        "red" => Some("\x1b[31m"),
        "green" => Some("\x1b[32m"),
        "yellow" => Some("\x1b[33m"),
        "blue" => Some("\x1b[34m"),
        "magenta" => Some("\x1b[35m"),
        "cyan" => Some("\x1b[36m"),
        "white" => Some("\x1b[37m"),
        "bright" | "bold" => Some(BRIGHT),
        _ => None,
    }
}

struct ConsoleLogger {
    level: LevelFilter,
    colored: bool,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_record(record, &timestamp(), self.colored);
        // A closed pipe must not take the orchestrator down with it.
        let _ = match record.level() {
            Level::Error | Level::Warn => writeln!(std::io::stderr().lock(), "{line}"),
            _ => writeln!(std::io::stdout().lock(), "{line}"),
        };
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }
}

/// Install the console logger as the global `log` backend.
pub fn init(level: LevelFilter, mode: ColorMode) -> Result<(), SetLoggerError> {
    let logger = ConsoleLogger {
        level,
        colored: mode.enabled(),
    };
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}

fn timestamp() -> String {
    let format = format_description!("[hour]:[minute]:[second].[subsecond digits:3]");
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| "--:--:--.---".to_string())
}

fn symbol(level: Level, success: bool) -> &'static str {
    match level {
        Level::Error => "❌",
        Level::Warn => "⚠️",
        Level::Info if success => "✅",
        Level::Info => "ℹ️",
        Level::Debug | Level::Trace => "📝",
    }
}

fn lookup(record: &Record, key: &str) -> Option<String> {
    record
        .key_values()
        .get(Key::from_str(key))
        .map(|v: Value| v.to_string())
}

/// Render one record into a console line (without trailing newline).
pub fn format_record(record: &Record, timestamp: &str, colored: bool) -> String {
    let success = record
        .key_values()
        .get(Key::from_str(SUCCESS_KEY))
        .is_some_and(|v| v.to_bool().unwrap_or_else(|| v.to_string() == "true"));
    let service = lookup(record, SERVICE_KEY);
    let label = service.as_deref().unwrap_or(DEFAULT_LABEL);
    let body = format!(
        "{timestamp} {} [{label}] {}",
        symbol(record.level(), success),
        record.args()
    );

    if !colored {
        return body;
    }
    let color = match service {
        Some(_) => lookup(record, COLOR_KEY)
            .and_then(|c| ansi_code(&c))
            .unwrap_or("\x1b[37m"),
        None => BRIGHT,
    };
    format!("{color}{body}{RESET}")
}
