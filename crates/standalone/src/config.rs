//! Layered configuration: CLI flags override environment variables
//! (`REFLECT_*`) override a TOML file override built-in defaults. Validated
//! eagerly in [`Config::load`] so a bad turn duration or missing admin key
//! fails at startup, not on the first request.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub turn_duration_ms: u64,
    pub buffer_min_ms: i64,
    pub buffer_max_ms: i64,
    pub revalidation_interval_secs: u64,
    pub admin_api_key: String,
    pub jwt_public_key_path: Option<PathBuf>,
    pub jwt_issuer: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "0.0.0.0:8080".parse().expect("valid default listen address"),
            data_dir: PathBuf::from("./roomsync-data"),
            turn_duration_ms: 1000 / 15,
            buffer_min_ms: 0,
            buffer_max_ms: 500,
            revalidation_interval_secs: 30,
            admin_api_key: String::new(),
            jwt_public_key_path: None,
            jwt_issuer: None,
        }
    }
}

impl Config {
    /// Loads defaults, then a TOML file (if given), then `REFLECT_*`
    /// environment overrides, then validates the result.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Config> {
        let mut config = match config_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(v) = std::env::var("REFLECT_LISTEN_ADDR") {
            self.listen_addr = v.parse().context("REFLECT_LISTEN_ADDR")?;
        }
        if let Ok(v) = std::env::var("REFLECT_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("REFLECT_TURN_DURATION_MS") {
            self.turn_duration_ms = v.parse().context("REFLECT_TURN_DURATION_MS")?;
        }
        if let Ok(v) = std::env::var("REFLECT_BUFFER_MIN_MS") {
            self.buffer_min_ms = v.parse().context("REFLECT_BUFFER_MIN_MS")?;
        }
        if let Ok(v) = std::env::var("REFLECT_BUFFER_MAX_MS") {
            self.buffer_max_ms = v.parse().context("REFLECT_BUFFER_MAX_MS")?;
        }
        if let Ok(v) = std::env::var("REFLECT_REVALIDATION_INTERVAL_SECS") {
            self.revalidation_interval_secs = v.parse().context("REFLECT_REVALIDATION_INTERVAL_SECS")?;
        }
        if let Ok(v) = std::env::var("REFLECT_ADMIN_API_KEY") {
            self.admin_api_key = v;
        }
        if let Ok(v) = std::env::var("REFLECT_JWT_PUBLIC_KEY_PATH") {
            self.jwt_public_key_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("REFLECT_JWT_ISSUER") {
            self.jwt_issuer = Some(v);
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.turn_duration_ms == 0 {
            bail!("turn_duration_ms must be positive");
        }
        if self.admin_api_key.is_empty() {
            bail!("admin_api_key must be set (REFLECT_ADMIN_API_KEY or config file)");
        }
        if self.buffer_min_ms > self.buffer_max_ms {
            bail!("buffer_min_ms ({}) must not exceed buffer_max_ms ({})", self.buffer_min_ms, self.buffer_max_ms);
        }
        if self.jwt_public_key_path.is_none() {
            bail!("jwt_public_key_path must be set");
        }
        Ok(())
    }

    pub fn turn_duration(&self) -> Duration {
        Duration::from_millis(self.turn_duration_ms)
    }

    pub fn revalidation_interval(&self) -> Duration {
        Duration::from_secs(self.revalidation_interval_secs)
    }

    pub fn room_config(&self) -> roomsync_core::RoomConfig {
        let mut cfg = roomsync_core::RoomConfig::default();
        cfg.turn_duration = self.turn_duration();
        cfg.buffer_min_ms = self.buffer_min_ms;
        cfg.buffer_max_ms = self.buffer_max_ms;
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_turn_duration() {
        let mut config = Config { turn_duration_ms: 0, admin_api_key: "k".into(), jwt_public_key_path: Some(PathBuf::from("k.pem")), ..Config::default() };
        config.admin_api_key = "k".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("turn_duration_ms"));
    }

    #[test]
    fn rejects_missing_admin_api_key() {
        let config = Config { jwt_public_key_path: Some(PathBuf::from("k.pem")), ..Config::default() };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("admin_api_key"));
    }

    #[test]
    fn accepts_a_fully_specified_config() {
        let config = Config {
            admin_api_key: "k".into(),
            jwt_public_key_path: Some(PathBuf::from("k.pem")),
            ..Config::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        std::env::set_var("REFLECT_ADMIN_API_KEY", "from-env");
        let mut config = Config::default();
        config.apply_env().unwrap();
        std::env::remove_var("REFLECT_ADMIN_API_KEY");
        assert_eq!(config.admin_api_key, "from-env");
    }
}
