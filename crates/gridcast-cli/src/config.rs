use anyhow::{bail, Context, Result};
use gridcast_realtime::Credentials;
use std::env;
use std::path::PathBuf;
use url::Url;

pub const DEFAULT_DB_PATH: &str = ".gridcast/dashboard.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub log_dir: Option<PathBuf>,
    pub log_stdout: bool,
}

/// Flag value when set, otherwise the environment variable, otherwise `None`.
pub fn resolve_value(flag: Option<&str>, env_key: &str) -> Option<String> {
    if let Some(value) = flag.filter(|value| !value.trim().is_empty()) {
        return Some(value.to_string());
    }
    env::var(env_key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub fn resolve_db_path(flag: Option<&str>) -> PathBuf {
    resolve_value(flag, "GRIDCAST_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

pub fn resolve_log_config(flag_dir: Option<&str>) -> LogConfig {
    LogConfig {
        log_dir: resolve_value(flag_dir, "GRIDCAST_LOG_DIR").map(PathBuf::from),
        log_stdout: env::var("GRIDCAST_LOG_STDOUT")
            .ok()
            .and_then(|value| parse_flag(&value))
            .unwrap_or(false),
    }
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectArgs<'a> {
    pub endpoint: Option<&'a str>,
    pub api_key: Option<&'a str>,
    pub token: Option<&'a str>,
}

/// An API key takes precedence over a bearer token when both are present.
pub fn resolve_credentials(args: &ConnectArgs<'_>) -> Result<Credentials> {
    let Some(endpoint) = resolve_value(args.endpoint, "GRIDCAST_ENDPOINT") else {
        bail!("missing realtime endpoint (--endpoint or GRIDCAST_ENDPOINT)");
    };
    let endpoint =
        Url::parse(&endpoint).with_context(|| format!("invalid realtime endpoint {endpoint}"))?;
    if !matches!(endpoint.scheme(), "ws" | "wss") {
        bail!("realtime endpoint must use ws:// or wss://, got {}", endpoint.scheme());
    }

    if let Some(key) = resolve_value(args.api_key, "GRIDCAST_API_KEY") {
        return Ok(Credentials::api_key(endpoint, key));
    }
    if let Some(token) = resolve_value(args.token, "GRIDCAST_TOKEN") {
        return Ok(Credentials::bearer(endpoint, token));
    }
    bail!("missing credential (--api-key/GRIDCAST_API_KEY or --token/GRIDCAST_TOKEN)")
}
