//! Configuration file handling.
//!
//! Loads `~/.config/yuyv-capture/config.toml` or a custom path. Every key is
//! optional; a missing file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::traits::Resolution;

/// Configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    /// Device selection and enumeration.
    #[serde(default)]
    pub camera: CameraConfig,
    /// Capture loop pacing.
    #[serde(default)]
    pub pacing: PacingConfig,
}

/// `[camera]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CameraConfig {
    /// Device node to open.
    #[serde(default = "default_device")]
    pub device: PathBuf,
    /// Capacity of the resolution enumeration.
    #[serde(default = "default_max_resolutions")]
    pub max_resolutions: usize,
    /// Requested width; the smallest supported size is used when unset.
    #[serde(default)]
    pub width: Option<u32>,
    /// Requested height; must be set together with `width`.
    #[serde(default)]
    pub height: Option<u32>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            max_resolutions: default_max_resolutions(),
            width: None,
            height: None,
        }
    }
}

/// `[pacing]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PacingConfig {
    /// Target capture rate.
    #[serde(default = "default_frames_per_second")]
    pub frames_per_second: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            frames_per_second: default_frames_per_second(),
        }
    }
}

fn default_device() -> PathBuf {
    PathBuf::from("/dev/video0")
}

const fn default_max_resolutions() -> usize {
    8
}

const fn default_frames_per_second() -> f64 {
    10.0
}

impl Config {
    /// Load configuration from `path`, or from [`default_path`] when `None`.
    ///
    /// Returns the default configuration if the file doesn't exist, and an
    /// error if it exists but cannot be read, parsed or validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(default_path, Path::to_path_buf);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Self =
            toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that the file format cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fps = self.pacing.frames_per_second;
        if !fps.is_finite() || fps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "pacing.frames_per_second must be a positive number, got {fps}"
            )));
        }
        if self.camera.max_resolutions == 0 {
            return Err(ConfigError::Invalid(
                "camera.max_resolutions must be at least 1".to_owned(),
            ));
        }
        if self.camera.width.is_some() != self.camera.height.is_some() {
            return Err(ConfigError::Invalid(
                "camera.width and camera.height must be set together".to_owned(),
            ));
        }
        if self.resolution().is_some_and(|resolution| resolution.is_empty()) {
            return Err(ConfigError::Invalid(
                "camera.width and camera.height must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Explicitly requested resolution, if both dimensions are set.
    pub fn resolution(&self) -> Option<Resolution> {
        match (self.camera.width, self.camera.height) {
            (Some(width), Some(height)) => Some(Resolution::new(width, height)),
            _ => None,
        }
    }

    /// Target frame interval.
    pub fn frame_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.pacing.frames_per_second.recip()).unwrap_or_default()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this structure.
    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("yuyv-capture")
        .join("config.toml")
}
