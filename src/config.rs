use crate::protocol::client::DEFAULT_PORT;
use figment2::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Figment(#[from] figment2::Error),
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    #[serde(default = "default_client_port")]
    pub port: u16,
    pub password: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub static_dir: PathBuf,
    /// Seconds between two polls of the same client.
    pub poll_interval: u64,
    pub clients: Vec<ClientConfig>,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            static_dir: PathBuf::from("gui/dist"),
            poll_interval: 1,
            clients: vec![ClientConfig {
                host: "127.0.0.1".to_string(),
                port: DEFAULT_PORT,
                password: None,
                name: None,
            }],
        }
    }
}

fn default_client_port() -> u16 {
    DEFAULT_PORT
}

/// Defaults, then the optional TOML file, then `BOINC_MONITOR_*` env vars.
/// Nested keys are separated by `__`, e.g. `BOINC_MONITOR_CLIENTS='[{host="10.0.0.2"}]'`.
pub fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    let config = figment
        .merge(Env::prefixed("BOINC_MONITOR_").split("__"))
        .extract()?;
    Ok(config)
}
