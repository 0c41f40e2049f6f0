use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_recording_length")]
    pub recording_length_seconds: u64,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default)]
    pub record_audio: bool,
    #[serde(default = "default_capture_program")]
    pub capture_program: String,
    /// Extra arguments placed before the generated ones.
    #[serde(default)]
    pub capture_args: Vec<String>,
}

fn default_recordings_dir() -> PathBuf { home_dir().join("recordings") }
fn default_max_files() -> usize { 60 }
fn default_recording_length() -> u64 { 60 }
fn default_extension() -> String { ".mkv".to_string() }
fn default_codec() -> String { "libx265".to_string() }
fn default_capture_program() -> String { crate::DEFAULT_CAPTURE_PROGRAM.to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            max_files: default_max_files(),
            recording_length_seconds: default_recording_length(),
            extension: default_extension(),
            codec: default_codec(),
            record_audio: false,
            capture_program: default_capture_program(),
            capture_args: Vec::new(),
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// `$HOME/dashcam.json`
pub fn default_config_path() -> PathBuf {
    home_dir().join(crate::DEFAULT_CONFIG_FILE)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Format {
    Json,
    Toml,
    Yaml,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "toml" => Format::Toml,
            "yaml" | "yml" => Format::Yaml,
            _ => Format::Json,
        }
    }
}

impl Config {
    /// Parse configuration text in the format implied by `path`.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let mut config: Config = match Format::of(path) {
            Format::Json => serde_json::from_str(content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?,
            Format::Toml => toml::from_str(content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?,
            Format::Yaml => serde_yaml::from_str(content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?,
        };
        config.recordings_dir = expand_home(&config.recordings_dir);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, writing defaults to `path` if it does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            if let Err(e) = config.save(path) {
                log::warn!("Could not save default config: {:#}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(path, &content)
    }

    /// Like [`Config::load`], but falls back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Could not load config, using defaults: {:#}", e);
                Config::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let data = match Format::of(path) {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
            Format::Yaml => serde_yaml::to_string(self)?,
        };
        fs::write(path, data).with_context(|| format!("Failed to write config file: {:?}", path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.recording_length_seconds == 0 {
            anyhow::bail!("recording_length_seconds must be positive");
        }
        if self.extension.is_empty() {
            anyhow::bail!("extension must not be empty");
        }
        if self.capture_program.trim().is_empty() {
            anyhow::bail!("capture_program must not be empty");
        }
        Ok(())
    }
}
