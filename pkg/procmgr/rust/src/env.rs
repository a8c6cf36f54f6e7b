// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

pub const NODE_ENV: &str = "NODE_ENV";
pub const PORT: &str = "PORT";

/// Read a dotenv-style file. Blank lines, `#` comments and lines without
/// a key are skipped; an `export ` prefix is accepted.
pub fn parse_environment_file(path: &Path) -> Result<Vec<(String, String)>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading environment file: {}", path.display()))?;
    Ok(contents.lines().filter_map(parse_line).collect())
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), unquote(value.trim()).to_string()))
}

/// Strip one pair of matching surrounding quotes.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// The environment a child is launched with. Later layers win:
/// parent snapshot, `NODE_ENV`, `PORT` (only when the service has one),
/// then the service's own variables.
pub fn child_environment(
    base: &BTreeMap<String, String>,
    node_env: &str,
    port: Option<u16>,
    service_env: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = base.clone();
    env.insert(NODE_ENV.to_string(), node_env.to_string());
    if let Some(port) = port {
        env.insert(PORT.to_string(), port.to_string());
    }
    env.extend(service_env.clone());
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env");
        std::fs::write(
            &path,
            r#"# Wojat secrets
SUPABASE_URL=https://example.supabase.co
PATH="/usr/local/bin:/usr/bin"
QUOTED='single'
MIXED="keep'
export EXPORTED=yes
malformed line without equals
=novalue

# blank lines above are skipped
LANG=en_US.UTF-8
"#,
        )
        .unwrap();

        let vars: HashMap<String, String> = parse_environment_file(&path)
            .unwrap()
            .into_iter()
            .collect();

        assert_eq!(vars["SUPABASE_URL"], "https://example.supabase.co");
        assert_eq!(vars["PATH"], "/usr/local/bin:/usr/bin");
        assert_eq!(vars["QUOTED"], "single");
        assert_eq!(vars["MIXED"], "\"keep'");
        assert_eq!(vars["EXPORTED"], "yes");
        assert_eq!(vars["LANG"], "en_US.UTF-8");
        assert_eq!(vars.len(), 6);
    }

    #[test]
    fn test_parse_missing_file() {
        assert!(parse_environment_file(Path::new("/nonexistent/env")).is_err());
    }

    #[test]
    fn test_child_environment_precedence() {
        let base = BTreeMap::from([
            ("PATH".to_string(), "/bin".to_string()),
            ("NODE_ENV".to_string(), "development".to_string()),
            ("PORT".to_string(), "1".to_string()),
            ("SHARED".to_string(), "parent".to_string()),
        ]);
        let service = BTreeMap::from([("SHARED".to_string(), "service".to_string())]);

        let env = child_environment(&base, "production", Some(3001), &service);
        assert_eq!(env["PATH"], "/bin");
        assert_eq!(env["NODE_ENV"], "production");
        assert_eq!(env["PORT"], "3001");
        assert_eq!(env["SHARED"], "service");
    }

    #[test]
    fn test_child_environment_without_port_keeps_parent_port() {
        let base = BTreeMap::from([("PORT".to_string(), "8080".to_string())]);
        let env = child_environment(&base, "production", None, &BTreeMap::new());
        assert_eq!(env["PORT"], "8080");
    }

    #[test]
    fn test_service_env_can_override_port() {
        let service = BTreeMap::from([("PORT".to_string(), "9999".to_string())]);
        let env = child_environment(&BTreeMap::new(), "test", Some(3001), &service);
        assert_eq!(env["PORT"], "9999");
        assert_eq!(env["NODE_ENV"], "test");
    }
}
