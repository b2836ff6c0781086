//! Error types for DDS value encoding and channel configuration

use thiserror::Error;

/// A physical value fell outside the domain its register can represent
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ValueRangeError {
    /// Frequency outside `[0, FREQUENCY_MAX]`
    #[error("frequency {value} kHz outside [0, {max}] kHz")]
    Frequency { value: f64, max: f64 },

    /// Phase outside `[0, 360]` degrees
    #[error("phase {value} deg outside [0, 360] deg")]
    Phase { value: f64 },
}

/// Invalid construction-time configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Channel index is not one of 0..=3
    #[error("channel {0} out of range (expected 0-3)")]
    ChannelOutOfRange(u8),

    /// Channel group has no members
    #[error("channel group is empty")]
    EmptyGroup,

    /// Writer's own channel is missing from its group
    #[error("channel {channel} is not part of its group (mask 0x{mask:02X})")]
    ChannelNotInGroup { channel: u8, mask: u8 },

    /// Sweep step of zero would never terminate
    #[error("sweep step must be non-zero")]
    ZeroStep,

    /// No calibration record for the device
    #[error("no calibration record for device '{0}'")]
    MissingCalibration(String),

    /// Calibration record present but unusable
    #[error("invalid calibration for device '{device}': {reason}")]
    InvalidCalibration { device: String, reason: String },
}
