//! Configuration loading and types for keyclack
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/keyclack/config.toml)
//! 3. Environment variables (KEYCLACK_*)
//! 4. CLI arguments (highest priority)

use crate::error::KeyclackError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Keyclack Configuration
#
# Location: ~/.config/keyclack/config.toml
# All settings can be overridden via CLI flags

[storage]
# Root directory holding profiles/, daemon.json and daemon.lock
# Defaults to the platform data directory (~/.local/share/keyclack)
# root = "/home/me/.keyclack"

[defaults]
# Volume used by `keyclack start` when --volume is not given (0-100)
volume = 100

# Keyboard profile used by `keyclack start` when --profile is not given
profile = "ios"

# Mouse profile (leave unset to keep mouse sounds off)
# mouse_profile = "clicky"

[playback]
# Number of playback worker threads
workers = 8

[input]
# Input backend: "auto", "evdev" (Linux, needs the 'input' group) or "rdev"
# "auto" prefers evdev on Wayland sessions and rdev everywhere else
backend = "auto"

[control]
# Loopback port for the control server (0 = pick a free port)
port = 0
"#;

/// Input capture backend selection
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputBackend {
    /// Probe the platform and pick the best available backend (default)
    #[default]
    Auto,
    /// Kernel-level capture through /dev/input (Linux only)
    Evdev,
    /// Display-server level capture via rdev
    Rdev,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub control: ControlConfig,
}

/// Where profiles and daemon bookkeeping files live
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Override for the root storage directory
    #[serde(default)]
    pub root: Option<String>,
}

/// Values used when the CLI does not specify them
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefaultsConfig {
    /// Volume (0-100)
    #[serde(default = "default_volume")]
    pub volume: u8,

    /// Keyboard profile name
    #[serde(default = "default_profile")]
    pub profile: Option<String>,

    /// Mouse profile name
    #[serde(default)]
    pub mouse_profile: Option<String>,
}

/// Playback pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Number of worker threads draining the playback queue
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Input capture configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    #[serde(default)]
    pub backend: InputBackend,
}

/// Control server configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Loopback port, 0 for an ephemeral port
    #[serde(default)]
    pub port: u16,
}

fn default_volume() -> u8 {
    100
}

fn default_profile() -> Option<String> {
    Some("ios".to_string())
}

fn default_workers() -> usize {
    8
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            profile: default_profile(),
            mouse_profile: None,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "keyclack")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "keyclack")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Resolve the root storage directory
    ///
    /// Explicit `storage.root` wins, then the platform data directory.
    pub fn root_dir(&self) -> PathBuf {
        if let Some(ref root) = self.storage.root {
            return PathBuf::from(root);
        }
        directories::ProjectDirs::from("", "", "keyclack")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".keyclack"))
    }

    /// Directory containing one sub-directory per profile
    pub fn profiles_dir(&self) -> PathBuf {
        self.root_dir().join("profiles")
    }

    /// The human-readable daemon state record
    pub fn state_file(&self) -> PathBuf {
        self.root_dir().join("daemon.json")
    }

    /// The advisory lock file, distinct from the state record
    pub fn lock_file(&self) -> PathBuf {
        self.root_dir().join("daemon.lock")
    }

    /// Ensure the root and profiles directories exist
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        let profiles_dir = self.profiles_dir();
        std::fs::create_dir_all(&profiles_dir)?;
        tracing::debug!("Ensured profiles directory exists: {:?}", profiles_dir);
        Ok(())
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, KeyclackError> {
    // Start with defaults
    let mut config = Config::default();

    // Determine config file path
    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    // Load from file if it exists
    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| KeyclackError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| KeyclackError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    // Override from environment variables
    if let Ok(root) = std::env::var("KEYCLACK_ROOT") {
        config.storage.root = Some(root);
    }
    if let Ok(backend) = std::env::var("KEYCLACK_INPUT_BACKEND") {
        config.input.backend = match backend.to_lowercase().as_str() {
            "evdev" => InputBackend::Evdev,
            "rdev" => InputBackend::Rdev,
            _ => InputBackend::Auto,
        };
    }

    Ok(config)
}
