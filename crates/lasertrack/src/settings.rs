//! Tracking calibration and source settings persistence
//!
//! Settings are stored as JSON files in the installation's config directory.
//! They map normalized tracking coordinates onto screen pixels and carry the
//! network endpoint of each tracking source. Settings are loaded once at
//! startup; the save path exists to regenerate a file after the layout of
//! these structs changes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use nalgebra::Vector2;

/// Default Tracklink settings file, relative to the config root
pub const TRACKLINK_CONFIG_FILE: &str = "DeepSpaceConfig/tracklinkConfig.json";

/// Default TUIO settings file, relative to the config root
pub const TUIO_CONFIG_FILE: &str = "DeepSpaceConfig/tuioConfig.json";

/// Calibration between relative tracking coordinates and the display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingSettings {
    /// Screen width in pixels
    pub screen_width_pixel: f32,
    /// Screen height in pixels
    pub screen_height_pixel: f32,
    /// Stage width in centimeters
    pub stage_width: f32,
    /// Stage height in centimeters
    pub stage_height: f32,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            screen_width_pixel: 19.2,
            screen_height_pixel: 10.8,
            stage_width: 1600.0,
            stage_height: 900.0,
        }
    }
}

impl TrackingSettings {
    /// Map a relative [0, 1] position to screen pixels (y axis flipped)
    pub fn screen_position_from_relative(&self, x: f32, y: f32) -> Vector2<f32> {
        Vector2::new(
            x * self.screen_width_pixel,
            self.screen_height_pixel - y * self.screen_height_pixel,
        )
    }
}

/// Settings for the Tracklink UDP source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TracklinkSettings {
    #[serde(flatten)]
    pub tracking: TrackingSettings,
    /// Unicast or multicast IPv4 address
    pub udp_address: String,
    /// Port to listen for Tracklink data
    pub udp_port: u16,
    /// Whether `udp_address` is a multicast group to join
    pub is_multicast_address: bool,
}

impl Default for TracklinkSettings {
    fn default() -> Self {
        Self {
            tracking: TrackingSettings::default(),
            udp_address: "239.1.1.1".to_string(),
            udp_port: 44345,
            is_multicast_address: false,
        }
    }
}

/// Settings for the TUIO source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TuioSettings {
    #[serde(flatten)]
    pub tracking: TrackingSettings,
    /// Port the TUIO client listens on
    pub udp_port: u16,
}

impl Default for TuioSettings {
    fn default() -> Self {
        Self {
            tracking: TrackingSettings::default(),
            udp_port: 3333,
        }
    }
}

/// Errors that can occur during settings operations
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse JSON at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to serialize JSON for {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Load settings from a JSON file.
/// Returns Ok(None) if the file doesn't exist.
pub fn load_settings<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let settings = serde_json::from_str(&contents).map_err(|e| SettingsError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!("Loaded settings from {:?}", path);
    Ok(Some(settings))
}

/// Load settings, falling back to defaults when the file is missing
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, SettingsError> {
    match load_settings(path)? {
        Some(settings) => Ok(settings),
        None => {
            warn!(
                "Could not find settings file at {:?}, using default values",
                path
            );
            Ok(T::default())
        }
    }
}

/// Write settings as pretty JSON, creating parent directories as needed
pub fn save_settings<T: Serialize>(settings: &T, path: &Path) -> Result<(), SettingsError> {
    let json = serde_json::to_string_pretty(settings).map_err(|e| SettingsError::Serialize {
        path: path.to_path_buf(),
        source: e,
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(path, json).map_err(|e| SettingsError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!("Saved settings to {:?}", path);
    Ok(())
}
