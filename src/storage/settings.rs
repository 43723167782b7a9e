//! Settings storage
//!
//! Manages persistence of user preferences and model configuration.

use crate::inference::engine::{EngineConfig, DEFAULT_MAX_LENGTH};
use crate::session::controller::SessionConfig;
use crate::storage::{get_data_dir, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Instruction given to the model at the top of every conversation
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a maths assistant to help students answer homework questions. Do not provide any code in your response.";

/// Environment variable overriding the configured model path
pub const MODEL_PATH_ENV: &str = "CHATGEN_MODEL_PATH";

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Path to the GGUF model file
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// System prompt prepended to conversations
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Maximum total sequence length (prompt plus reply) in tokens
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Temperature parameter for text generation (0.0 - 2.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// Delay before the "..." reply placeholder is shown, in milliseconds
    #[serde(default)]
    pub placeholder_delay_ms: u64,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            system_prompt: default_system_prompt(),
            max_length: DEFAULT_MAX_LENGTH,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            gpu_layers: 99, // Offload all layers to GPU by default
            placeholder_delay_ms: 0,
        }
    }
}

impl AppSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);

        if self.top_k == 0 {
            self.top_k = 40;
        }

        self.max_length = self.max_length.clamp(256, 131072);
        self.placeholder_delay_ms = self.placeholder_delay_ms.min(5_000);

        if self.system_prompt.trim().is_empty() {
            self.system_prompt = default_system_prompt();
        }
    }

    /// Engine configuration for `model_path`
    pub fn engine_config(&self, model_path: impl Into<PathBuf>) -> EngineConfig {
        EngineConfig {
            model_path: model_path.into(),
            gpu_layers: self.gpu_layers,
            max_length: self.max_length,
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            seed: 0,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            system_prompt: self.system_prompt.clone(),
            placeholder_delay: Duration::from_millis(self.placeholder_delay_ms),
        }
    }

    /// Model path from the first CLI argument, the environment, then the settings file
    pub fn resolve_model_path(&self, cli_arg: Option<String>) -> Option<PathBuf> {
        cli_arg
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var(MODEL_PATH_ENV)
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from)
            })
            .or_else(|| self.model_path.clone())
    }

    /// Store `path` as the model to open next time; returns true if it changed
    pub fn remember_model_path(&mut self, path: &Path) -> bool {
        if self.model_path.as_deref() == Some(path) {
            return false;
        }
        self.model_path = Some(path.to_path_buf());
        true
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> AppSettings {
    match get_settings_path().and_then(|path| load_settings_from(&path)) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        }
    }
}

/// Load and validate settings from a specific file
pub fn load_settings_from(path: &Path) -> Result<AppSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(AppSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: AppSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings) -> Result<(), StorageError> {
    save_settings_to(settings, &get_settings_path()?)
}

/// Save settings to a specific file, creating parent directories
pub fn save_settings_to(settings: &AppSettings, path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {:?}", path);
    Ok(())
}
