//! Channel addressing on a shared bus
//!
//! Several logical writers (one per DDS channel) may share one microcontroller
//! link. Each frame's header byte tells the firmware which channel slots of the
//! payload to apply and what to do with them:
//!
//! ```text
//!  bit   7    6    5    4    3    2    1    0
//!      [ch3][ch2][ch1][ch0][ 0 ][ 0 ][ opcode  ]
//! ```
//!
//! The enable mask lives in the high nibble and the opcode in the low two
//! bits. Because the mask's low nibble is always zero, `mask ^ opcode` sets
//! the opcode bits without touching the mask. The four possible header bytes
//! are computed once per writer in a [`CommandTable`].

use crate::error::ConfigurationError;

/// Number of DDS channels on the chip
pub const CHANNEL_COUNT: usize = 4;

/// Bit position of channel 0's enable flag
const ENABLE_SHIFT: u8 = 4;

/// Low-nibble mask that carries the opcode
const OPCODE_MASK: u8 = 0x03;

/// Frame opcodes understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// Apply the payload to the live DDS registers
    Update = 0,
    /// Apply the payload and persist it to EEPROM
    Upload = 1,
    /// Reply with the persisted registers
    Download = 2,
    /// Leave the interactive loop
    Exit = 3,
}

impl Opcode {
    /// All opcodes in wire order
    pub const ALL: [Opcode; 4] = [Opcode::Update, Opcode::Upload, Opcode::Download, Opcode::Exit];

    /// Returns a human-readable name for the opcode
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Update => "UPDATE",
            Opcode::Upload => "UPLOAD",
            Opcode::Download => "DNLOAD",
            Opcode::Exit => "EXIT",
        }
    }

    /// Whether frames with this opcode carry register data
    pub fn carries_payload(&self) -> bool {
        matches!(self, Opcode::Update | Opcode::Upload)
    }

    /// Recover the opcode from a command byte
    pub fn from_command_byte(byte: u8) -> Self {
        match byte & OPCODE_MASK {
            0 => Opcode::Update,
            1 => Opcode::Upload,
            2 => Opcode::Download,
            _ => Opcode::Exit,
        }
    }
}

/// Set of channels one writer may address in a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelGroup {
    /// Bit n set when channel n is a member
    members: u8,
}

impl ChannelGroup {
    /// Build a group from explicit channel indices
    pub fn new(channels: &[u8]) -> Result<Self, ConfigurationError> {
        let mut members = 0u8;
        for &ch in channels {
            if ch as usize >= CHANNEL_COUNT {
                return Err(ConfigurationError::ChannelOutOfRange(ch));
            }
            members |= 1 << ch;
        }
        if members == 0 {
            return Err(ConfigurationError::EmptyGroup);
        }
        Ok(Self { members })
    }

    /// Build the group for a writer on `channel` that shares the bus with `shared`
    pub fn with_shared(channel: u8, shared: &[u8]) -> Result<Self, ConfigurationError> {
        let mut channels = Vec::with_capacity(shared.len() + 1);
        channels.push(channel);
        channels.extend_from_slice(shared);
        Self::new(&channels)
    }

    /// Whether `channel` is a member
    pub fn contains(&self, channel: u8) -> bool {
        (channel as usize) < CHANNEL_COUNT && self.members & (1 << channel) != 0
    }

    /// Member channels in ascending order
    pub fn channels(&self) -> impl Iterator<Item = u8> + '_ {
        (0..CHANNEL_COUNT as u8).filter(|&ch| self.contains(ch))
    }

    /// Number of member channels
    pub fn len(&self) -> usize {
        self.members.count_ones() as usize
    }

    /// Always false for a constructed group
    pub fn is_empty(&self) -> bool {
        self.members == 0
    }

    /// Channel-enable flags positioned in the high nibble
    pub fn enable_mask(&self) -> u8 {
        self.channels()
            .fold(0u8, |mask, ch| mask | (1 << (ENABLE_SHIFT + ch)))
    }

    /// Decode the enable mask of a command byte back into a group
    ///
    /// Returns `None` when no enable flag is set.
    pub fn from_command_byte(byte: u8) -> Option<Self> {
        let members = byte >> ENABLE_SHIFT;
        (members != 0).then_some(Self { members })
    }
}

/// Precomputed header bytes for one writer, indexed by opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTable {
    channel: u8,
    group: ChannelGroup,
    bytes: [u8; 4],
}

impl CommandTable {
    /// Compute the table for a writer owning `channel` within `group`
    pub fn new(channel: u8, group: &ChannelGroup) -> Result<Self, ConfigurationError> {
        if channel as usize >= CHANNEL_COUNT {
            return Err(ConfigurationError::ChannelOutOfRange(channel));
        }
        let mask = group.enable_mask();
        if !group.contains(channel) {
            return Err(ConfigurationError::ChannelNotInGroup { channel, mask });
        }

        let mut bytes = [0u8; 4];
        for op in Opcode::ALL {
            bytes[op as usize] = mask ^ op as u8;
        }

        tracing::debug!(
            "Command table for channel {}: {:02X?} (mask 0x{:02X})",
            channel,
            bytes,
            mask
        );

        Ok(Self {
            channel,
            group: *group,
            bytes,
        })
    }

    /// Header byte for `op`
    pub fn byte(&self, op: Opcode) -> u8 {
        self.bytes[op as usize]
    }

    /// The writer's own channel
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// The channels this table addresses
    pub fn group(&self) -> &ChannelGroup {
        &self.group
    }
}
