//! Command and reply frames
//!
//! Every command frame is full width: one header byte followed by the
//! registers of all four channels, whether or not a channel is enabled in the
//! header. The firmware ignores the slots of disabled channels. A DOWNLOAD
//! reply is the same 24-byte payload without the header.

use crate::addressing::{CommandTable, Opcode, CHANNEL_COUNT};
use crate::codec::{decode_frequency, decode_phase, encode_frequency, encode_phase};
use crate::error::ValueRangeError;

/// Bytes per channel slot: u32 frequency + u16 phase
const SLOT_LEN: usize = 6;

/// Register payload length
pub const PAYLOAD_LEN: usize = CHANNEL_COUNT * SLOT_LEN;

/// Command frame length (header + payload)
pub const FRAME_LEN: usize = 1 + PAYLOAD_LEN;

/// DOWNLOAD reply length
pub const REPLY_LEN: usize = PAYLOAD_LEN;

/// Register pair for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelRegisters {
    /// 32-bit frequency tuning word
    pub frequency: u32,
    /// 14-bit phase offset
    pub phase: u16,
}

impl ChannelRegisters {
    /// Encode a channel's registers from physical values
    pub fn from_physical(frequency_khz: f64, phase_deg: f64) -> Result<Self, ValueRangeError> {
        Ok(Self {
            frequency: encode_frequency(frequency_khz)?,
            phase: encode_phase(phase_deg)?,
        })
    }

    /// Frequency in kHz
    pub fn frequency_khz(&self) -> f64 {
        decode_frequency(self.frequency)
    }

    /// Phase in degrees
    pub fn phase_deg(&self) -> f64 {
        decode_phase(self.phase)
    }

    fn write_slot(&self, slot: &mut [u8]) {
        slot[..4].copy_from_slice(&self.frequency.to_be_bytes());
        slot[4..SLOT_LEN].copy_from_slice(&self.phase.to_be_bytes());
    }

    fn read_slot(slot: &[u8]) -> Self {
        Self {
            frequency: u32::from_be_bytes([slot[0], slot[1], slot[2], slot[3]]),
            phase: u16::from_be_bytes([slot[4], slot[5]]),
        }
    }
}

/// Register state of all four channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterState {
    channels: [ChannelRegisters; CHANNEL_COUNT],
}

impl RegisterState {
    /// Encode a full state from physical values
    ///
    /// Nothing is produced unless every value is in range.
    pub fn from_physical(
        frequency_khz: &[f64; CHANNEL_COUNT],
        phase_deg: &[f64; CHANNEL_COUNT],
    ) -> Result<Self, ValueRangeError> {
        let mut channels = [ChannelRegisters::default(); CHANNEL_COUNT];
        for (slot, (&f, &phi)) in channels
            .iter_mut()
            .zip(frequency_khz.iter().zip(phase_deg.iter()))
        {
            *slot = ChannelRegisters::from_physical(f, phi)?;
        }
        Ok(Self { channels })
    }

    /// Decode a DOWNLOAD reply
    pub fn from_reply(reply: &[u8; REPLY_LEN]) -> Self {
        let mut channels = [ChannelRegisters::default(); CHANNEL_COUNT];
        for (ch, slot) in channels.iter_mut().zip(reply.chunks_exact(SLOT_LEN)) {
            *ch = ChannelRegisters::read_slot(slot);
        }
        Self { channels }
    }

    /// Registers of one channel
    ///
    /// # Panics
    /// Panics if `channel` is not in `0..4`.
    pub fn channel(&self, channel: u8) -> &ChannelRegisters {
        &self.channels[channel as usize]
    }

    /// All channel registers in order
    pub fn channels(&self) -> &[ChannelRegisters; CHANNEL_COUNT] {
        &self.channels
    }

    /// Replace the registers of one channel
    ///
    /// # Panics
    /// Panics if `channel` is not in `0..4`.
    pub fn set_channel(&mut self, channel: u8, registers: ChannelRegisters) {
        self.channels[channel as usize] = registers;
    }

    /// Validate and store a phase for one channel
    ///
    /// # Panics
    /// Panics if `channel` is not in `0..4`.
    pub fn set_phase(&mut self, channel: u8, phase_deg: f64) -> Result<(), ValueRangeError> {
        let register = encode_phase(phase_deg)?;
        self.set_phase_register(channel, register);
        Ok(())
    }

    /// Validate a frequency and store it in every channel slot
    pub fn set_frequency_all(&mut self, frequency_khz: f64) -> Result<(), ValueRangeError> {
        let register = encode_frequency(frequency_khz)?;
        self.set_frequency_register_all(register);
        Ok(())
    }

    /// Store an already-encoded phase register
    ///
    /// # Panics
    /// Panics if `channel` is not in `0..4`.
    pub fn set_phase_register(&mut self, channel: u8, register: u16) {
        self.channels[channel as usize].phase = register;
    }

    /// Store an already-encoded frequency register in every slot
    pub fn set_frequency_register_all(&mut self, register: u32) {
        for ch in &mut self.channels {
            ch.frequency = register;
        }
    }

    /// Frequencies of all channels in kHz
    pub fn frequencies_khz(&self) -> [f64; CHANNEL_COUNT] {
        self.channels.map(|ch| ch.frequency_khz())
    }

    /// Phases of all channels in degrees
    pub fn phases_deg(&self) -> [f64; CHANNEL_COUNT] {
        self.channels.map(|ch| ch.phase_deg())
    }

    /// Serialize the registers as a 24-byte payload
    pub fn payload(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        for (ch, slot) in self.channels.iter().zip(out.chunks_exact_mut(SLOT_LEN)) {
            ch.write_slot(slot);
        }
        out
    }

    /// Assemble a command frame for `op`
    ///
    /// DOWNLOAD and EXIT frames carry an all-zero payload.
    pub fn frame(&self, table: &CommandTable, op: Opcode) -> Frame {
        let payload = if op.carries_payload() {
            self.payload()
        } else {
            [0u8; PAYLOAD_LEN]
        };
        Frame::new(table.byte(op), &payload)
    }
}

/// Already-encoded register changes from one writer
///
/// Applied to the state shared by every writer on a port, so only the
/// fields a writer actually changed are touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterPatch {
    /// Frequency register for every channel
    pub frequency: Option<u32>,
    /// Phase register for one channel
    pub phase: Option<(u8, u16)>,
}

impl RegisterPatch {
    /// A patch that changes nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Set one channel's phase register
    pub fn phase(channel: u8, register: u16) -> Self {
        Self {
            frequency: None,
            phase: Some((channel, register)),
        }
    }

    /// Set the shared frequency and one channel's phase
    pub fn full(frequency: u32, channel: u8, phase: u16) -> Self {
        Self {
            frequency: Some(frequency),
            phase: Some((channel, phase)),
        }
    }

    /// Whether the patch changes anything
    pub fn is_empty(&self) -> bool {
        self.frequency.is_none() && self.phase.is_none()
    }

    /// Apply to `state`
    ///
    /// # Panics
    /// Panics if the phase channel is not in `0..4`.
    pub fn apply(&self, state: &mut RegisterState) {
        if let Some(frequency) = self.frequency {
            state.set_frequency_register_all(frequency);
        }
        if let Some((channel, register)) = self.phase {
            state.set_phase_register(channel, register);
        }
    }
}

/// A 25-byte command frame
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Assemble a frame from a header byte and payload
    pub fn new(command_byte: u8, payload: &[u8; PAYLOAD_LEN]) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = command_byte;
        bytes[1..].copy_from_slice(payload);
        Self(bytes)
    }

    /// Parse raw bytes as a frame
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Wire bytes
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Header byte
    pub fn command_byte(&self) -> u8 {
        self.0[0]
    }

    /// Opcode carried in the header
    pub fn opcode(&self) -> Opcode {
        Opcode::from_command_byte(self.0[0])
    }

    /// Register payload
    pub fn payload(&self) -> &[u8] {
        &self.0[1..]
    }

    /// Payload decoded as register state
    pub fn registers(&self) -> RegisterState {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(self.payload());
        RegisterState::from_reply(&payload)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("command", &format_args!("0x{:02X}", self.command_byte()))
            .field("opcode", &self.opcode())
            .field("payload", &format_args!("{:02X?}", self.payload()))
            .finish()
    }
}
