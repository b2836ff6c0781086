//! DDS Simulation Library
//!
//! This crate stands in for the microcontroller and DDS chip so the rest of
//! the workspace can run without hardware:
//!
//! - **VirtualDds**: firmware model (greeting handshake, frame parsing,
//!   live registers, EEPROM persistence, DOWNLOAD replies)
//! - **run_virtual_dds_task**: drives a `VirtualDds` over an async byte stream
//! - **SimulatedOpener**: a `PortOpener` that connects every opened port to
//!   its own virtual device through `tokio::io::duplex()`
//!
//! # Example
//!
//! ```rust
//! use dds_protocol::{ChannelGroup, CommandTable, Opcode, RegisterState};
//! use dds_sim::VirtualDds;
//!
//! let mut dds = VirtualDds::new("bench");
//! dds.power_on();
//! let greeting = dds.take_output().unwrap();
//! assert!(String::from_utf8_lossy(&greeting).contains("Arduino"));
//!
//! dds.process_bytes(b"hello");
//! assert!(dds.is_ready());
//!
//! let table = CommandTable::new(0, &ChannelGroup::new(&[0]).unwrap()).unwrap();
//! let mut state = RegisterState::default();
//! state.set_phase(0, 90.0).unwrap();
//! dds.process_bytes(state.frame(&table, Opcode::Update).as_bytes());
//! assert_eq!(dds.live().channel(0).phase, 4096);
//! ```

pub mod device;
pub mod device_task;
pub mod opener;

pub use device::{VirtualDds, VirtualDdsConfig, FRAME_LOG_LIMIT};
pub use device_task::{run_virtual_dds_task, VirtualDdsCommand, VirtualDdsEvent};
pub use opener::SimulatedOpener;
