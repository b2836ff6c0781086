//! DDS Protocol Library
//!
//! This crate provides the host-side encoding for a four-channel Direct
//! Digital Synthesizer driven through a microcontroller over a serial line:
//!
//! - **Value codec**: physical frequency/phase to fixed-point registers and back
//! - **Channel addressing**: the per-writer command byte table that packs the
//!   channel-enable mask and the opcode into a single header byte
//! - **Framing**: the fixed 25-byte command frame and the 24-byte reply frame
//!
//! Nothing in this crate performs I/O. Range validation happens here so that
//! an out-of-range value is rejected before a single byte reaches the wire.
//!
//! # Wire layout
//!
//! ```text
//! byte 0      command byte (bits 4-7 channel-enable mask, bits 0-1 opcode)
//! bytes 1-24  4 x (u32 frequency register BE, u16 phase register BE), channel 0..3
//! ```
//!
//! # Example
//!
//! ```rust
//! use dds_protocol::{ChannelGroup, CommandTable, Opcode, RegisterState};
//!
//! let group = ChannelGroup::new(&[0, 1, 2, 3]).unwrap();
//! let table = CommandTable::new(3, &group).unwrap();
//! assert_eq!(table.byte(Opcode::Update), 0xF0);
//!
//! let mut state = RegisterState::default();
//! state.set_phase(3, 90.0).unwrap();
//! let frame = state.frame(&table, Opcode::Update);
//! assert_eq!(frame.as_bytes().len(), 25);
//! ```

pub mod addressing;
pub mod codec;
pub mod error;
pub mod frame;

pub use addressing::{ChannelGroup, CommandTable, Opcode, CHANNEL_COUNT};
pub use codec::{
    decode_frequency, decode_phase, encode_frequency, encode_phase, FCLK, FREQUENCY_MAX,
    FREQUENCY_STEP, PHASE_MAX, PHASE_STEP,
};
pub use error::{ConfigurationError, ValueRangeError};
pub use frame::{
    ChannelRegisters, Frame, RegisterPatch, RegisterState, FRAME_LEN, PAYLOAD_LEN, REPLY_LEN,
};
