//! Configuration management for forge
//!
//! Stores settings in ~/.config/forge/config.json (override with
//! `FORGE_CONFIG_FILE`). Credentials never live here; see [`crate::keyring`].

use crate::github::GITHUB_API_URL;
use crate::llm::client::DEFAULT_TEMPERATURE;
use crate::llm::{Model, ModelSelection, OPENROUTER_URL};
use crate::snapshot::{SnapshotLimits, DEFAULT_MAX_SNAPSHOT_CHARS, DEFAULT_README_EXCERPT_CHARS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_ENV: &str = "FORGE_CONFIG_FILE";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub planner_model: String,
    pub coder_model: String,
    pub openrouter_url: String,
    pub github_api_url: String,
    /// Branch to read from and commit to; the repository default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub max_snapshot_chars: usize,
    pub readme_excerpt_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            planner_model: Model::Planner.default_id().to_string(),
            coder_model: Model::Coder.default_id().to_string(),
            openrouter_url: OPENROUTER_URL.to_string(),
            github_api_url: GITHUB_API_URL.to_string(),
            branch: None,
            temperature: DEFAULT_TEMPERATURE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_snapshot_chars: DEFAULT_MAX_SNAPSHOT_CHARS,
            readme_excerpt_chars: DEFAULT_README_EXCERPT_CHARS,
        }
    }
}

fn or_default(value: &mut String, default: &str) {
    if value.trim().is_empty() {
        *value = default.to_string();
    } else {
        *value = value.trim().to_string();
    }
}

impl Config {
    fn sanitize(&mut self) {
        or_default(&mut self.planner_model, Model::Planner.default_id());
        or_default(&mut self.coder_model, Model::Coder.default_id());
        or_default(&mut self.openrouter_url, OPENROUTER_URL);
        or_default(&mut self.github_api_url, GITHUB_API_URL);
        self.branch = self
            .branch
            .take()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());
        if !self.temperature.is_finite() {
            self.temperature = DEFAULT_TEMPERATURE;
        }
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, 600);
        self.max_snapshot_chars = self.max_snapshot_chars.max(200);
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_FILE_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::config_dir().map(|p| p.join("forge").join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match serde_json::from_str::<Config>(&content) {
                Ok(mut config) => {
                    config.sanitize();
                    return config;
                }
                Err(err) => {
                    preserve_corrupt_config(path, &content);
                    tracing::warn!(
                        "config file {} was corrupted ({}); a backup was saved and defaults were loaded",
                        path.display(),
                        err
                    );
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let path =
            Self::config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let mut sanitized = self.clone();
        sanitized.sanitize();

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        let content = serde_json::to_string_pretty(&sanitized)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        #[cfg(unix)]
        {
            write_config_atomic(path, &content)
                .map_err(|e| format!("Failed to write config: {}", e))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        }

        Ok(())
    }

    pub fn models(&self) -> ModelSelection {
        ModelSelection {
            planner: self.planner_model.clone(),
            coder: self.coder_model.clone(),
        }
    }

    pub fn snapshot_limits(&self) -> SnapshotLimits {
        SnapshotLimits {
            readme_excerpt_chars: self.readme_excerpt_chars,
            max_chars: self.max_snapshot_chars,
        }
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/forge/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(unix)]
fn write_config_atomic(path: &Path, content: &str) -> Result<(), String> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| e.to_string())?;

    if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
        tracing::warn!("failed to set temp config file permissions: {}", e);
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}
