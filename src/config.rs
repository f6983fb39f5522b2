//! # Configuration
//!
//! Operator-facing configuration for the three network services.
//!
//! Options mirror the server's config file keys. A [`Config`] can be built
//! from a TOML file, a TOML string, or field-by-field in tests; `validate()`
//! reports every finding instead of stopping at the first one.
//!
//! All values are read once at startup and treated as immutable afterwards;
//! the world list in the login response in particular depends on `ip`,
//! `game_port` and `location` never changing while the services run.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

fn default_server_name() -> String {
    String::from("World")
}

fn default_ip() -> String {
    String::from("127.0.0.1")
}

fn default_location() -> String {
    String::from("ZZZ")
}

fn default_game_port() -> u16 {
    7172
}

fn default_status_port() -> u16 {
    7171
}

fn default_http_port() -> u16 {
    8080
}

fn default_max_players() -> u32 {
    2000
}

fn default_max_packets_per_second() -> u32 {
    25
}

fn default_status_interval_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

/// Runtime configuration consumed by the gateway core.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// World name the client must send as its first handshake line.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Externally visible address, also used for binding when
    /// `bind_only_global_address` is set.
    #[serde(default = "default_ip")]
    pub ip: String,

    /// Three-letter world location code surfaced in the login world list.
    #[serde(default = "default_location")]
    pub location: String,

    #[serde(default = "default_game_port")]
    pub game_port: u16,

    #[serde(default = "default_status_port")]
    pub status_port: u16,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// When false, listeners bind to the IPv6 any-address instead of `ip`.
    #[serde(default)]
    pub bind_only_global_address: bool,

    /// Wait-list threshold. Zero disables admission control.
    #[serde(default = "default_max_players")]
    pub max_players: u32,

    /// Per-connection receive rate cap; offenders are disconnected.
    #[serde(default = "default_max_packets_per_second")]
    pub max_packets_per_second: u32,

    /// Minimum interval between status queries from one peer, milliseconds.
    #[serde(default = "default_status_interval_ms")]
    pub status_min_request_interval: u64,

    /// Relaxes the single-character-per-account rule.
    #[serde(default)]
    pub allow_clones: bool,

    #[serde(default = "default_true")]
    pub one_player_per_account: bool,

    /// Parsed for config-file compatibility; the reconnect-replace path it
    /// gated is not implemented and the simple already-logged-in refusal
    /// applies instead.
    #[serde(default)]
    pub replace_kick_on_login: bool,

    /// Treat every account as premium.
    #[serde(default)]
    pub free_premium: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            ip: default_ip(),
            location: default_location(),
            game_port: default_game_port(),
            status_port: default_status_port(),
            http_port: default_http_port(),
            bind_only_global_address: false,
            max_players: default_max_players(),
            max_packets_per_second: default_max_packets_per_second(),
            status_min_request_interval: default_status_interval_ms(),
            allow_clones: false,
            one_player_per_account: true,
            replace_kick_on_login: false,
            free_premium: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| GatewayError::Config(format!("failed to parse TOML: {e}")))
    }

    /// Minimum interval between status queries from one peer.
    pub fn status_request_interval(&self) -> Duration {
        Duration::from_millis(self.status_min_request_interval)
    }

    /// Validate the configuration. Returns a list of findings; an empty
    /// list means the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_name.is_empty() {
            errors.push("server_name cannot be empty".to_string());
        }

        if self.ip.parse::<IpAddr>().is_err() {
            errors.push(format!("ip is not a valid address: '{}'", self.ip));
        }

        let ports = [
            ("game_port", self.game_port),
            ("status_port", self.status_port),
            ("http_port", self.http_port),
        ];
        for (name, port) in ports {
            if port == 0 {
                errors.push(format!("{name} cannot be 0"));
            }
        }
        if self.game_port == self.status_port
            || self.game_port == self.http_port
            || self.status_port == self.http_port
        {
            errors.push("game_port, status_port and http_port must be distinct".to_string());
        }

        if self.max_packets_per_second == 0 {
            errors.push("max_packets_per_second must be greater than 0".to_string());
        }

        if self.status_min_request_interval == 0 {
            errors.push("status_min_request_interval must be greater than 0".to_string());
        } else if self.status_min_request_interval > 3_600_000 {
            errors.push("status_min_request_interval too long (maximum: 1 hour)".to_string());
        }

        errors
    }

    /// Validate and return Result - convenience method.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Config(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn parses_partial_toml() {
        let config = Config::from_toml(
            r#"
            server_name = "Aurora"
            game_port = 7272
            free_premium = true
            "#,
        )
        .unwrap();
        assert_eq!(config.server_name, "Aurora");
        assert_eq!(config.game_port, 7272);
        assert!(config.free_premium);
        assert_eq!(config.status_port, 7171);
    }

    #[test]
    fn rejects_port_collisions() {
        let config = Config {
            game_port: 7171,
            status_port: 7171,
            ..Config::default()
        };
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn rejects_bad_ip() {
        let config = Config {
            ip: "not-an-ip".to_string(),
            ..Config::default()
        };
        assert!(config
            .validate()
            .iter()
            .any(|e| e.contains("not a valid address")));
    }
}
