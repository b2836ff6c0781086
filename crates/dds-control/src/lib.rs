//! DDS control layer
//!
//! Operator-facing pieces built on the protocol and link crates:
//!
//! - **ChannelWriter**: one channel's write/write_full/upload/download/EXIT
//!   calls over a shared, handshaken link
//! - **Sweeper**: background worker stepping a phase sink through a range
//! - **CalibrationStore**: per-device starting values kept as JSON
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dds_control::{CalibrationStore, ChannelWriter};
//! use dds_link::{ConnectionRegistry, LinkConfig, SerialOpener};
//!
//! # async fn example() -> Result<(), dds_control::DdsError> {
//! let store = CalibrationStore::load()?;
//! let registry = ConnectionRegistry::new(Arc::new(SerialOpener::new()), LinkConfig::default());
//!
//! let mut writer = ChannelWriter::connect(&registry, store.find("master_689")?, 3, &[0]).await?;
//! writer.write(45.0).await?;
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod error;
pub mod sweep;
pub mod writer;

pub use calibration::{CalibrationStore, DeviceCalibration};
pub use error::DdsError;
pub use sweep::{PhaseSink, SweepConfig, SweepEvent, SweepRange, Sweeper};
pub use writer::ChannelWriter;
