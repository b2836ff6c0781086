//! Error types for the serial link

use std::fmt;
use std::io;

use thiserror::Error;

/// Which greeting the handshake was waiting for when it gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Power-up greeting, before the hello token is sent
    FirstGreeting,
    /// Confirmation greeting, after the hello token is sent
    SecondGreeting,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakePhase::FirstGreeting => f.write_str("first greeting"),
            HandshakePhase::SecondGreeting => f.write_str("second greeting"),
        }
    }
}

/// The liveness exchange exhausted its retry budget
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("handshake with {port} failed: no {phase} after {attempts} attempts (is the DDS firmware uploaded?)")]
pub struct HandshakeError {
    /// Port the handshake ran on
    pub port: String,
    /// Phase that timed out
    pub phase: HandshakePhase,
    /// Read attempts consumed in that phase
    pub attempts: u32,
}

/// Errors that can occur while establishing or using a link
#[derive(Debug, Error)]
pub enum LinkError {
    /// Handshake failed; nothing was cached
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Failed to open serial port
    #[error("failed to open port {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// Read or write on the underlying transport failed
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}
