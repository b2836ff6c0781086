//! Transport capability
//!
//! A [`PortOpener`] turns a port identifier into a byte stream. Real hardware
//! goes through [`SerialOpener`]; simulated devices and tests supply their
//! own opener returning an in-memory stream (e.g. one end of
//! `tokio::io::duplex()`). Everything above this seam is identical for both.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use crate::error::LinkError;
use crate::handshake::HandshakeConfig;
use crate::scanner::resolve_port_name;

/// Byte stream a link can run over
pub trait DeviceIo: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> DeviceIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased device stream
pub type BoxedIo = Box<dyn DeviceIo>;

/// Opens the physical (or simulated) port behind a port identifier
pub trait PortOpener: Send + Sync {
    /// Open `port_id` and return its byte stream
    ///
    /// Called from within a tokio runtime.
    fn open(&self, port_id: &str, config: &LinkConfig) -> Result<BoxedIo, LinkError>;
}

/// Link configuration shared by every connection of a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial baud rate
    pub baud_rate: u32,
    /// Greeting exchange parameters
    pub handshake: HandshakeConfig,
    /// How long to wait for an optional acknowledgement line
    ///
    /// Zero means only an acknowledgement that has already arrived is consumed.
    pub ack_window: Duration,
    /// Quiet period used to drain stale input before a DOWNLOAD exchange
    pub drain_window: Duration,
    /// Upper bound on waiting for a DOWNLOAD reply
    pub reply_timeout: Duration,
    /// Depth of the per-link request queue
    pub request_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            handshake: HandshakeConfig::default(),
            ack_window: Duration::ZERO,
            drain_window: Duration::from_millis(20),
            reply_timeout: Duration::from_millis(300),
            request_buffer: 32,
        }
    }
}

/// Opens real serial ports with tokio-serial
#[derive(Debug, Clone, Default)]
pub struct SerialOpener;

impl SerialOpener {
    /// Create a serial opener
    pub fn new() -> Self {
        Self
    }
}

impl PortOpener for SerialOpener {
    fn open(&self, port_id: &str, config: &LinkConfig) -> Result<BoxedIo, LinkError> {
        let port_name = resolve_port_name(port_id);
        debug!(
            "Opening {} (id {}) at {} baud",
            port_name, port_id, config.baud_rate
        );

        let stream = tokio_serial::new(&port_name, config.baud_rate)
            .timeout(config.handshake.read_timeout)
            .open_native_async()
            .map_err(|source| LinkError::OpenFailed {
                port: port_name.clone(),
                source,
            })?;

        info!("Opened serial port {}", port_name);
        Ok(Box::new(stream))
    }
}
