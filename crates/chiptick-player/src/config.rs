use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_VOLUME: u8 = 80;

/// Settings remembered between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Master volume in percent.
    pub volume: u8,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("chiptick").join("player.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("chiptick").join("player.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("chiptick")
            .join("player.toml");
    }

    PathBuf::from("player.toml")
}

pub fn load_from_file(path: &Path) -> PlayerConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return PlayerConfig::default(),
    };

    match toml::from_str::<PlayerConfig>(&text) {
        Ok(mut cfg) => {
            cfg.volume = cfg.volume.min(100);
            cfg
        }
        Err(e) => {
            warn!(
                "Failed to parse player config {}: {e}; using defaults",
                path.display()
            );
            PlayerConfig::default()
        }
    }
}

pub fn save_to_file(path: &Path, cfg: &PlayerConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(cfg).map_err(std::io::Error::other)?;
    std::fs::write(path, text)
}
