use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::listener::ListenOptions;
use crate::pipewire::DEFAULT_SINK;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub pipewire: PipewireConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListenerConfig {
    #[serde(default)]
    pub fetch_initial_volume: bool,
}

impl ListenerConfig {
    pub fn listen_options(&self) -> ListenOptions {
        ListenOptions::new(self.fetch_initial_volume)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipewireConfig {
    #[serde(default = "default_sink")]
    pub sink: String,
    #[serde(default = "default_wpctl")]
    pub wpctl: String,
    #[serde(default = "default_pactl")]
    pub pactl: String,
}

impl Default for PipewireConfig {
    fn default() -> Self {
        Self {
            sink: default_sink(),
            wpctl: default_wpctl(),
            pactl: default_pactl(),
        }
    }
}

fn default_sink() -> String {
    DEFAULT_SINK.to_string()
}

fn default_wpctl() -> String {
    "wpctl".to_string()
}

fn default_pactl() -> String {
    "pactl".to_string()
}

impl PipewireConfig {
    pub fn wpctl_program(&self) -> String {
        shellexpand::tilde(&self.wpctl).into_owned()
    }

    pub fn pactl_program(&self) -> String {
        shellexpand::tilde(&self.pactl).into_owned()
    }
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "volwatch", "volwatch").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads the user config file, if any, then `VOLWATCH_` environment
    /// variables, e.g. `VOLWATCH_PIPEWIRE__SINK`.
    pub fn load() -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        match Self::config_path() {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => tracing::warn!("Could not determine config directory, using defaults"),
        }

        figment.merge(Env::prefixed("VOLWATCH_").split("__")).extract()
    }

    pub fn load_from_path(path: PathBuf) -> Result<Self, figment::Error> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("VOLWATCH_").split("__"));

        figment.extract()
    }
}
