//! Calibration store
//!
//! One record per device: the port it hangs off and the frequency/phase each
//! channel should start at. Records live in a JSON file under the XDG config
//! directory and are read once when a writer is constructed.

use std::path::{Path, PathBuf};

use dds_protocol::{ConfigurationError, RegisterState, ValueRangeError, CHANNEL_COUNT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DdsError;

/// Starting values for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCalibration {
    /// Name the operator refers to the device by
    pub name: String,
    /// Device path or USB serial number
    pub port: String,
    /// Per-channel frequency in kHz
    pub frequency_khz: [f64; CHANNEL_COUNT],
    /// Per-channel phase in degrees
    pub phase_deg: [f64; CHANNEL_COUNT],
}

impl DeviceCalibration {
    /// A record with every channel at 0 kHz / 0 deg
    pub fn new(name: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: port.into(),
            frequency_khz: [0.0; CHANNEL_COUNT],
            phase_deg: [0.0; CHANNEL_COUNT],
        }
    }

    /// Encode the record into register values
    pub fn registers(&self) -> Result<RegisterState, ValueRangeError> {
        RegisterState::from_physical(&self.frequency_khz, &self.phase_deg)
    }

    /// Build a record from register values
    pub fn from_registers(
        name: impl Into<String>,
        port: impl Into<String>,
        registers: &RegisterState,
    ) -> Self {
        Self {
            name: name.into(),
            port: port.into(),
            frequency_khz: registers.frequencies_khz(),
            phase_deg: registers.phases_deg(),
        }
    }
}

/// Calibration records, as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStore {
    #[serde(default)]
    devices: Vec<DeviceCalibration>,
}

impl CalibrationStore {
    /// Get the XDG config directory for dds-tune
    /// Uses $XDG_CONFIG_HOME/dds-tune, falls back to ~/.config/dds-tune
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("dds-tune"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("dds-tune"))
    }

    /// Default location of the calibration file
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("calibration.json"))
    }

    /// Load from the default location; a missing file yields an empty store
    pub fn load() -> Result<Self, DdsError> {
        let path = Self::default_path().ok_or(DdsError::NoConfigDir)?;
        if !path.exists() {
            debug!("No calibration file at {}", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load and validate a calibration file
    pub fn load_from(path: &Path) -> Result<Self, DdsError> {
        let text = std::fs::read_to_string(path).map_err(|source| DdsError::CalibrationFile {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_json(&text).map_err(|e| match e {
            DdsError::CalibrationFormat { source, .. } => DdsError::CalibrationFormat {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!(
            "Loaded {} calibration record(s) from {}",
            store.devices.len(),
            path.display()
        );
        Ok(store)
    }

    /// Parse and validate calibration JSON
    pub fn from_json(text: &str) -> Result<Self, DdsError> {
        let store: Self =
            serde_json::from_str(text).map_err(|source| DdsError::CalibrationFormat {
                path: PathBuf::new(),
                source,
            })?;
        store.validate()?;
        Ok(store)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        for (i, record) in self.devices.iter().enumerate() {
            if self.devices[..i].iter().any(|r| r.name == record.name) {
                return Err(ConfigurationError::InvalidCalibration {
                    device: record.name.clone(),
                    reason: "duplicate device name".to_string(),
                });
            }
            record
                .registers()
                .map_err(|e| ConfigurationError::InvalidCalibration {
                    device: record.name.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Save to the default location
    pub fn save(&self) -> Result<PathBuf, DdsError> {
        let path = Self::default_path().ok_or(DdsError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), DdsError> {
        let file_error = |source| DdsError::CalibrationFile {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(file_error)?;
        }

        let json =
            serde_json::to_string_pretty(self).map_err(|source| DdsError::CalibrationFormat {
                path: path.to_path_buf(),
                source,
            })?;
        std::fs::write(path, json).map_err(file_error)?;
        info!("Saved calibration to {}", path.display());
        Ok(())
    }

    /// Look up the record for `name`
    pub fn find(&self, name: &str) -> Result<&DeviceCalibration, ConfigurationError> {
        self.devices
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| ConfigurationError::MissingCalibration(name.to_string()))
    }

    /// Insert a record, replacing any existing record with the same name
    pub fn upsert(&mut self, record: DeviceCalibration) {
        match self.devices.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => *existing = record,
            None => self.devices.push(record),
        }
    }

    /// Every record
    pub fn devices(&self) -> &[DeviceCalibration] {
        &self.devices
    }
}
