//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.pairlink/config.json`) and environment.
//! Everything is optional; a missing file yields the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Env var that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "PAIRLINK_CONFIG_PATH";

/// Env var that overrides `relay.port`.
pub const PORT_ENV: &str = "PAIRLINK_PORT";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Relay listener settings.
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Relay bind address and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Port for HTTP and WebSocket (default 8080).
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0" so devices on the LAN can reach the relay).
    #[serde(default = "default_relay_bind")]
    pub bind: String,
}

fn default_relay_port() -> u16 {
    8080
}

fn default_relay_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            bind: default_relay_bind(),
        }
    }
}

impl RelayConfig {
    /// `bind:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind.trim(), self.port)
    }
}

/// Parse a port override value; empty or invalid values are ignored.
fn parse_port(raw: &str) -> Option<u16> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    match t.parse::<u16>() {
        Ok(p) => Some(p),
        Err(_) => {
            log::warn!("ignoring invalid {} value: {:?}", PORT_ENV, t);
            None
        }
    }
}

/// Resolve the relay port: env PAIRLINK_PORT overrides config.
pub fn resolve_relay_port(config: &Config) -> u16 {
    std::env::var(PORT_ENV)
        .ok()
        .and_then(|s| parse_port(&s))
        .unwrap_or(config.relay.port)
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV).map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".pairlink").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or PAIRLINK_CONFIG_PATH). Missing file => default config.
/// Applies the PAIRLINK_PORT override. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config: Config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config.relay.port = resolve_relay_port(&config);
    Ok((config, path))
}
