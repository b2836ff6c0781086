//! DDS Serial Link Library
//!
//! This crate owns everything between a port identifier and a usable,
//! handshaken connection to the DDS microcontroller.
//!
//! # Architecture
//!
//! - [`PortOpener`] is the transport capability. [`SerialOpener`] opens real
//!   serial ports; the simulation crate provides an opener backed by an
//!   in-memory virtual device. The choice is made once when the registry is
//!   built.
//! - [`perform_handshake`] runs the bounded-retry greeting exchange on a
//!   freshly opened [`DeviceLink`].
//! - Each handshaken link is moved into its own task. Callers talk to it via
//!   a cloneable [`ConnectionHandle`]; the task processes one request at a
//!   time, so frames from different writers never interleave on the wire.
//! - [`ConnectionRegistry`] maps port identifiers to handles so a port is
//!   opened and handshaken at most once.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dds_link::{ConnectionRegistry, LinkConfig, SerialOpener};
//!
//! # async fn demo() -> Result<(), dds_link::LinkError> {
//! let registry = ConnectionRegistry::new(Arc::new(SerialOpener::new()), LinkConfig::default());
//! let link = registry.resolve("/dev/ttyACM0").await?;
//! let same = registry.resolve("/dev/ttyACM0").await?;
//! assert!(link.same_link(&same));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handshake;
pub mod link;
pub mod registry;
pub mod scanner;
pub mod transport;

pub use error::{HandshakeError, HandshakePhase, LinkError};
pub use handshake::{perform_handshake, HandshakeConfig};
pub use link::{spawn_link, AckPolicy, ConnectionHandle, DeviceLink};
pub use registry::ConnectionRegistry;
pub use scanner::{resolve_port_name, PortScanner, SerialPortInfo};
pub use transport::{BoxedIo, DeviceIo, LinkConfig, PortOpener, SerialOpener};
