use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

const RECENT_TARGETS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellSettings {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "ShellSettings::default_preview_file")]
    pub preview_file: PathBuf,
    #[serde(default = "ShellSettings::default_show_code_size")]
    pub show_code_size: bool,
    #[serde(default)]
    pub recent_targets: Vec<String>,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            preview_file: ShellSettings::default_preview_file(),
            show_code_size: ShellSettings::default_show_code_size(),
            recent_targets: Vec::new(),
        }
    }
}

impl ShellSettings {
    fn default_preview_file() -> PathBuf {
        PathBuf::from("sitecraft-preview.html")
    }

    fn default_show_code_size() -> bool {
        true
    }

    /// Moves `target` to the front of the recent list.
    pub fn record_target(&mut self, target: &str) {
        self.recent_targets.retain(|entry| entry != target);
        self.recent_targets.insert(0, target.to_string());
        self.recent_targets.truncate(RECENT_TARGETS);
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

pub async fn load_settings(path: &Path) -> Result<ShellSettings> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                let defaults = ShellSettings::default();
                save_settings(path, &defaults).await?;
                warn!(
                    error = ?err,
                    "failed to parse settings.json, resetting to defaults"
                );
                Ok(defaults)
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let defaults = ShellSettings::default();
            save_settings(path, &defaults).await?;
            Ok(defaults)
        }
        Err(err) => Err(err).context("failed to read settings.json"),
    }
}

pub async fn save_settings(path: &Path, settings: &ShellSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(settings)?;
    tokio::fs::write(path, serialized)
        .await
        .with_context(|| format!("failed to write settings.json at {}", path.display()))
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn config_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.config_dir().join("sitecraft")
    } else {
        PathBuf::from(".sitecraft")
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.data_dir().join("sitecraft")
    } else {
        PathBuf::from(".sitecraft").join("data")
    }
}
