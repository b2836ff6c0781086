//! Error types for the control layer

use std::io;
use std::path::PathBuf;

use dds_link::{HandshakeError, LinkError};
use dds_protocol::{ConfigurationError, ValueRangeError};
use thiserror::Error;

/// Errors surfaced by writers, sweeps and the calibration store
#[derive(Debug, Error)]
pub enum DdsError {
    /// Bad channel/group/calibration; fatal to construction
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Value outside its register domain; nothing was sent
    #[error(transparent)]
    ValueRange(#[from] ValueRangeError),

    /// Device never completed the greeting exchange
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Port could not be opened
    #[error(transparent)]
    Link(LinkError),

    /// Read or write failure, passed through unmodified
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// Calibration file could not be read or written
    #[error("calibration file {path}: {source}")]
    CalibrationFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Calibration file is not valid JSON for the store
    #[error("calibration file {path} is malformed: {source}")]
    CalibrationFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No configuration directory could be determined
    #[error("could not determine the calibration file location")]
    NoConfigDir,

    /// The sweep worker has exited
    #[error("sweep worker is not running")]
    SweepStopped,

    /// The sweep command queue is full
    #[error("sweep worker is busy")]
    SweepBusy,

    /// The sweep worker panicked or was cancelled
    #[error("sweep worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl From<LinkError> for DdsError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::Handshake(e) => DdsError::Handshake(e),
            LinkError::Transport(e) => DdsError::Transport(e),
            other => DdsError::Link(other),
        }
    }
}

impl DdsError {
    /// Whether the error happened before anything was sent
    pub fn is_rejected_input(&self) -> bool {
        matches!(self, DdsError::ValueRange(_) | DdsError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dds_link::HandshakePhase;

    #[test]
    fn test_link_errors_unwrap() {
        let handshake = HandshakeError {
            port: "/dev/ttyACM0".to_string(),
            phase: HandshakePhase::FirstGreeting,
            attempts: 5,
        };
        let err: DdsError = LinkError::Handshake(handshake.clone()).into();
        assert!(matches!(err, DdsError::Handshake(ref h) if *h == handshake));

        let err: DdsError = LinkError::Transport(io::Error::from(io::ErrorKind::BrokenPipe)).into();
        match err {
            DdsError::Transport(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejected_input() {
        let err: DdsError = ValueRangeError::Phase { value: 361.0 }.into();
        assert!(err.is_rejected_input());
        assert_eq!(err.to_string(), "phase 361 deg outside [0, 360] deg");

        let err: DdsError = io::Error::other("gone").into();
        assert!(!err.is_rejected_input());
    }
}
