//! # Configuration
//!
//! Centralizes all settings with a clear override hierarchy:
//! defaults → config file → env vars → CLI flags.
//!
//! Config lives at `~/.consult/config.toml`. If missing on first run, a
//! commented-out default is generated so users can discover all options.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::reconnect::ReconnectPolicy;
use crate::core::state::ChatSettings;

// ============================================================================
// Config Structs (all fields Option<T> for sparse TOML)
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConsultConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub socket_url: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ChatConfig {
    pub typing_debounce_ms: Option<u64>,
    pub typing_expiry_ms: Option<u64>,
    pub scroll_threshold_px: Option<f64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReconnectConfig {
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub stable_after_ms: Option<u64>,
}

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:5000/chat";
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

// ============================================================================
// Resolved Config (concrete values, no Options)
// ============================================================================

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub socket_url: String,
    pub api_url: String,
    pub chat: ChatSettings,
    pub reconnect: ReconnectPolicy,
}

/// Values given on the command line. `None` = not specified.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub socket_url: Option<String>,
    pub api_url: Option<String>,
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

/// Returns the path to `~/.consult/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".consult").join("config.toml"))
}

/// Load config from `~/.consult/config.toml`.
///
/// If the file doesn't exist, generates a commented-out default and
/// returns `ConsultConfig::default()`. If it exists but is malformed,
/// returns `ConfigError::Parse`.
pub fn load_config() -> Result<ConsultConfig, ConfigError> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            warn!("Could not determine home directory, using default config");
            return Ok(ConsultConfig::default());
        }
    };

    if !path.exists() {
        info!("No config file found, generating default at {}", path.display());
        generate_default_config(&path);
        return Ok(ConsultConfig::default());
    }

    let contents = fs::read_to_string(&path).map_err(ConfigError::Io)?;
    let config: ConsultConfig = toml::from_str(&contents).map_err(ConfigError::Parse)?;
    info!("Loaded config from {}", path.display());
    debug!("Config: {:?}", config);
    Ok(config)
}

/// Generates a commented-out default config file at the given path.
fn generate_default_config(path: &PathBuf) {
    let default_content = r#"# Consult Configuration
# All settings are optional; defaults are used for anything not specified.
# Override hierarchy: defaults → this file → env vars → CLI flags.

# [general]
# user_id = "p1"                     # Or set CONSULT_USER_ID, or pass --user
# token = "..."                      # Or set CONSULT_TOKEN

# [server]
# socket_url = "ws://localhost:5000/chat"
# api_url = "http://localhost:5000/api"

# [chat]
# typing_debounce_ms = 1500          # Inactivity before "stopped typing" is sent
# typing_expiry_ms = 30000           # Peer typing indicator clears after this much silence
# scroll_threshold_px = 100          # Distance from bottom that counts as "reading history"

# [reconnect]
# base_delay_ms = 500
# max_delay_ms = 30000
# stable_after_ms = 5000             # Uptime before a link counts as healthy and backoff resets
"#;

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Failed to create config directory: {}", e);
            return;
        }
    }
    if let Err(e) = fs::write(path, default_content) {
        warn!("Failed to write default config: {}", e);
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve the final config by collapsing: defaults → config file → env vars → CLI.
pub fn resolve(config: &ConsultConfig, cli: &CliOverrides) -> ResolvedConfig {
    // Identity: CLI → env → config
    let user_id = cli
        .user_id
        .clone()
        .or_else(|| std::env::var("CONSULT_USER_ID").ok())
        .or_else(|| config.general.user_id.clone());

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("CONSULT_TOKEN").ok())
        .or_else(|| config.general.token.clone());

    // Endpoints: CLI → env → config → default
    let socket_url = cli
        .socket_url
        .clone()
        .or_else(|| std::env::var("CONSULT_SOCKET_URL").ok())
        .or_else(|| config.server.socket_url.clone())
        .unwrap_or_else(|| DEFAULT_SOCKET_URL.to_string());

    let api_url = cli
        .api_url
        .clone()
        .or_else(|| std::env::var("CONSULT_API_URL").ok())
        .or_else(|| config.server.api_url.clone())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let defaults = ChatSettings::default();
    let chat = ChatSettings {
        typing_debounce: config
            .chat
            .typing_debounce_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.typing_debounce),
        typing_expiry: config
            .chat
            .typing_expiry_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.typing_expiry),
        scroll_threshold_px: config
            .chat
            .scroll_threshold_px
            .unwrap_or(defaults.scroll_threshold_px),
    };

    let default_policy = ReconnectPolicy::default();
    let reconnect = ReconnectPolicy {
        base_delay: config
            .reconnect
            .base_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(default_policy.base_delay),
        max_delay: config
            .reconnect
            .max_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(default_policy.max_delay),
        stable_after: config
            .reconnect
            .stable_after_ms
            .map(Duration::from_millis)
            .unwrap_or(default_policy.stable_after),
    };

    ResolvedConfig {
        user_id,
        token,
        socket_url,
        api_url,
        chat,
        reconnect,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = ConsultConfig::default();
        assert!(config.general.user_id.is_none());
        assert!(config.server.socket_url.is_none());
    }

    #[test]
    fn test_resolve_uses_defaults_when_empty() {
        let config = ConsultConfig::default();
        let resolved = resolve(&config, &CliOverrides::default());
        assert_eq!(resolved.chat, ChatSettings::default());
        assert_eq!(resolved.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn test_resolve_config_values_override_defaults() {
        let config = ConsultConfig {
            chat: ChatConfig {
                typing_debounce_ms: Some(800),
                typing_expiry_ms: Some(10_000),
                scroll_threshold_px: Some(64.0),
            },
            reconnect: ReconnectConfig {
                base_delay_ms: Some(250),
                max_delay_ms: Some(8000),
                stable_after_ms: Some(2000),
            },
            ..Default::default()
        };
        let resolved = resolve(&config, &CliOverrides::default());
        assert_eq!(resolved.chat.typing_debounce, Duration::from_millis(800));
        assert_eq!(resolved.chat.typing_expiry, Duration::from_secs(10));
        assert_eq!(resolved.chat.scroll_threshold_px, 64.0);
        assert_eq!(resolved.reconnect.base_delay, Duration::from_millis(250));
        assert_eq!(resolved.reconnect.max_delay, Duration::from_secs(8));
        assert_eq!(resolved.reconnect.stable_after, Duration::from_secs(2));
    }

    #[test]
    fn test_resolve_cli_wins() {
        let config = ConsultConfig {
            general: GeneralConfig {
                user_id: Some("from-file".to_string()),
                token: None,
            },
            server: ServerConfig {
                socket_url: Some("ws://file".to_string()),
                api_url: Some("http://file".to_string()),
            },
            ..Default::default()
        };
        let cli = CliOverrides {
            user_id: Some("d1".to_string()),
            token: Some("t".to_string()),
            socket_url: Some("ws://cli".to_string()),
            api_url: Some("http://cli".to_string()),
        };
        let resolved = resolve(&config, &cli);
        assert_eq!(resolved.user_id.as_deref(), Some("d1"));
        assert_eq!(resolved.token.as_deref(), Some("t"));
        assert_eq!(resolved.socket_url, "ws://cli");
        assert_eq!(resolved.api_url, "http://cli");
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
[general]
user_id = "p1"

[server]
socket_url = "wss://chat.example.org/socket"
api_url = "https://chat.example.org/api"

[chat]
typing_debounce_ms = 2000
scroll_threshold_px = 120.5

[reconnect]
max_delay_ms = 10000
"#;
        let config: ConsultConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.user_id.as_deref(), Some("p1"));
        assert_eq!(
            config.server.socket_url.as_deref(),
            Some("wss://chat.example.org/socket")
        );
        assert_eq!(config.chat.typing_debounce_ms, Some(2000));
        assert_eq!(config.chat.scroll_threshold_px, Some(120.5));
        assert!(config.chat.typing_expiry_ms.is_none());
        assert_eq!(config.reconnect.max_delay_ms, Some(10000));
    }

    #[test]
    fn test_sparse_toml_parses() {
        // Only override one thing; everything else stays default
        let toml_str = r#"
[chat]
typing_debounce_ms = 900
"#;
        let config: ConsultConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chat.typing_debounce_ms, Some(900));
        assert!(config.general.user_id.is_none());
        assert!(config.server.api_url.is_none());
    }
}
