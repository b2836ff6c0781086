//! Virtual DDS firmware
//!
//! Models what the microcontroller does with the bytes it receives. Output
//! is queued and collected with [`VirtualDds::take_output`], which keeps the
//! model free of I/O.

use std::collections::VecDeque;

use dds_protocol::{ChannelGroup, Frame, Opcode, RegisterState, FRAME_LEN};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Number of most recent frames kept for inspection
pub const FRAME_LOG_LIMIT: usize = 256;

/// Configuration for creating a virtual DDS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualDdsConfig {
    /// Display name/identifier
    pub id: String,
    /// Line printed when setup finishes after power-up
    ///
    /// An empty greeting models a board that never announces itself.
    pub greeting: String,
    /// Line printed after the hello token arrives
    pub confirmation: String,
    /// Token that completes the handshake
    pub hello: String,
    /// Print an acknowledgement line after UPDATE/UPLOAD frames
    pub ack_frames: bool,
    /// Register contents of the EEPROM at first power-up
    pub eeprom: RegisterState,
}

impl Default for VirtualDdsConfig {
    fn default() -> Self {
        Self {
            id: "Virtual DDS".to_string(),
            greeting: "Arduino setup finished!".to_string(),
            confirmation: "Arduino handshake complete".to_string(),
            hello: "hello".to_string(),
            ack_frames: false,
            eeprom: RegisterState::default(),
        }
    }
}

/// Firmware state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FirmwareState {
    /// Not powered
    Off,
    /// Greeting sent, waiting for the hello token
    AwaitHello,
    /// Accepting command frames
    Interactive,
    /// Left the interactive loop after EXIT
    Exited,
}

/// A simulated microcontroller driving a four-channel DDS
#[derive(Debug)]
pub struct VirtualDds {
    config: VirtualDdsConfig,
    state: FirmwareState,
    /// Registers currently driving the DDS outputs
    live: RegisterState,
    /// Persisted registers
    eeprom: RegisterState,
    eeprom_writes: u32,
    power_cycles: u32,
    hellos_received: u32,
    /// Most recent frames, oldest first
    frames: VecDeque<Frame>,
    frames_received: u64,
    input: Vec<u8>,
    pending_output: VecDeque<Vec<u8>>,
}

impl VirtualDds {
    /// Create a virtual DDS with default settings
    pub fn new(id: impl Into<String>) -> Self {
        Self::from_config(VirtualDdsConfig {
            id: id.into(),
            ..VirtualDdsConfig::default()
        })
    }

    /// Create a virtual DDS from configuration
    pub fn from_config(config: VirtualDdsConfig) -> Self {
        let eeprom = config.eeprom;
        Self {
            config,
            state: FirmwareState::Off,
            live: eeprom,
            eeprom,
            eeprom_writes: 0,
            power_cycles: 0,
            hellos_received: 0,
            frames: VecDeque::new(),
            frames_received: 0,
            input: Vec::new(),
            pending_output: VecDeque::new(),
        }
    }

    /// Get the device's identifier
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Power up (or reset): reload registers from EEPROM and print the greeting
    ///
    /// Opening the serial port resets the board, so this runs on every open.
    pub fn power_on(&mut self) {
        self.power_cycles += 1;
        self.live = self.eeprom;
        self.input.clear();
        self.pending_output.clear();
        self.state = FirmwareState::AwaitHello;
        if !self.config.greeting.is_empty() {
            let greeting = self.config.greeting.clone();
            self.queue_line(&greeting);
        }
        info!("{} powered on (cycle {})", self.config.id, self.power_cycles);
    }

    /// Feed bytes received from the host
    pub fn process_bytes(&mut self, data: &[u8]) {
        match self.state {
            FirmwareState::Off | FirmwareState::Exited => {
                debug!("{} ignoring {} byte(s)", self.config.id, data.len());
                return;
            }
            FirmwareState::AwaitHello | FirmwareState::Interactive => {}
        }
        self.input.extend_from_slice(data);

        if self.state == FirmwareState::AwaitHello {
            let hello = self.config.hello.as_bytes();
            let found = if hello.is_empty() {
                Some(0)
            } else {
                self.input.windows(hello.len()).position(|w| w == hello)
            };
            let Some(pos) = found else {
                // Keep only a tail that could still start the token
                let keep = hello.len() - 1;
                if self.input.len() > keep {
                    self.input.drain(..self.input.len() - keep);
                }
                return;
            };
            self.input.drain(..pos + hello.len());
            self.hellos_received += 1;
            self.state = FirmwareState::Interactive;
            let confirmation = self.config.confirmation.clone();
            self.queue_line(&confirmation);
        }

        while self.state == FirmwareState::Interactive && self.input.len() >= FRAME_LEN {
            let mut bytes = [0u8; FRAME_LEN];
            bytes.copy_from_slice(&self.input[..FRAME_LEN]);
            self.input.drain(..FRAME_LEN);
            self.apply_frame(Frame::from_bytes(bytes));
        }
    }

    fn apply_frame(&mut self, frame: Frame) {
        let op = frame.opcode();
        if self.frames.len() == FRAME_LOG_LIMIT {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
        self.frames_received += 1;

        let Some(group) = ChannelGroup::from_command_byte(frame.command_byte()) else {
            warn!(
                "{} got {} with no channel enabled",
                self.config.id,
                op.name()
            );
            return;
        };
        debug!(
            "{} applying {} to channels {:?}",
            self.config.id,
            op.name(),
            group.channels().collect::<Vec<_>>()
        );

        match op {
            Opcode::Update | Opcode::Upload => {
                let incoming = frame.registers();
                for ch in group.channels() {
                    self.live.set_channel(ch, *incoming.channel(ch));
                    if op == Opcode::Upload {
                        self.eeprom.set_channel(ch, *incoming.channel(ch));
                    }
                }
                if op == Opcode::Upload {
                    self.eeprom_writes += 1;
                }
                if self.config.ack_frames {
                    self.queue_line(&format!("ack {}", op.name()));
                }
            }
            Opcode::Download => {
                self.pending_output.push_back(self.eeprom.payload().to_vec());
            }
            Opcode::Exit => {
                info!("{} leaving interactive loop", self.config.id);
                self.state = FirmwareState::Exited;
            }
        }
    }

    fn queue_line(&mut self, text: &str) {
        let mut line = text.as_bytes().to_vec();
        line.extend_from_slice(b"\r\n");
        self.pending_output.push_back(line);
    }

    /// Enable or disable acknowledgement lines
    pub fn set_ack_frames(&mut self, enabled: bool) {
        self.config.ack_frames = enabled;
    }

    /// Get the next pending output chunk
    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.pending_output.pop_front()
    }

    /// Check if there's pending output
    pub fn has_output(&self) -> bool {
        !self.pending_output.is_empty()
    }

    /// Whether the handshake has completed and frames are accepted
    pub fn is_ready(&self) -> bool {
        self.state == FirmwareState::Interactive
    }

    /// Whether an EXIT frame was received
    pub fn has_exited(&self) -> bool {
        self.state == FirmwareState::Exited
    }

    /// Registers currently driving the outputs
    pub fn live(&self) -> &RegisterState {
        &self.live
    }

    /// Persisted registers
    pub fn eeprom(&self) -> &RegisterState {
        &self.eeprom
    }

    /// Number of UPLOAD frames that wrote the EEPROM
    pub fn eeprom_writes(&self) -> u32 {
        self.eeprom_writes
    }

    /// Number of times the device was powered on
    pub fn power_cycles(&self) -> u32 {
        self.power_cycles
    }

    /// Number of hello tokens accepted
    pub fn hellos_received(&self) -> u32 {
        self.hellos_received
    }

    /// The last [`FRAME_LOG_LIMIT`] frames received, oldest first
    pub fn frames(&self) -> &VecDeque<Frame> {
        &self.frames
    }

    /// Number of frames received since creation
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Bytes buffered but not yet consumed as a token or frame
    pub fn buffered_input(&self) -> usize {
        self.input.len()
    }

    /// One-line state summary for logs
    pub fn state_summary(&self) -> String {
        let f = self.live.frequencies_khz();
        let p = self.live.phases_deg();
        format!(
            "{}: f=[{:.3}, {:.3}, {:.3}, {:.3}] kHz phi=[{:.1}, {:.1}, {:.1}, {:.1}] deg",
            self.config.id, f[0], f[1], f[2], f[3], p[0], p[1], p[2], p[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dds_protocol::{CommandTable, REPLY_LEN};

    fn ready_device(config: VirtualDdsConfig) -> VirtualDds {
        let mut dds = VirtualDds::from_config(config);
        dds.power_on();
        dds.process_bytes(b"hello");
        while dds.take_output().is_some() {}
        dds
    }

    fn table(channel: u8, group: &[u8]) -> CommandTable {
        CommandTable::new(channel, &ChannelGroup::new(group).unwrap()).unwrap()
    }

    #[test]
    fn test_greeting_and_confirmation() {
        let mut dds = VirtualDds::new("bench");
        assert!(!dds.has_output());

        dds.power_on();
        assert_eq!(dds.take_output().unwrap(), b"Arduino setup finished!\r\n");
        assert!(!dds.is_ready());

        dds.process_bytes(b"hel");
        assert!(!dds.is_ready());
        dds.process_bytes(b"lo");
        assert!(dds.is_ready());
        assert_eq!(dds.hellos_received(), 1);
        assert_eq!(dds.take_output().unwrap(), b"Arduino handshake complete\r\n");
    }

    #[test]
    fn test_mute_device_prints_nothing() {
        let mut dds = VirtualDds::from_config(VirtualDdsConfig {
            greeting: String::new(),
            ..VirtualDdsConfig::default()
        });
        dds.power_on();
        assert!(!dds.has_output());
    }

    #[test]
    fn test_frames_ignored_before_power_on() {
        let mut dds = VirtualDds::new("off");
        dds.process_bytes(b"hello");
        assert!(!dds.is_ready());
        assert_eq!(dds.hellos_received(), 0);
    }

    #[test]
    fn test_update_applies_enabled_channels_only() {
        let mut dds = ready_device(VirtualDdsConfig::default());

        let mut state = RegisterState::default();
        state.set_frequency_all(80_000.0).unwrap();
        state.set_phase(0, 45.0).unwrap();
        state.set_phase(3, 90.0).unwrap();

        dds.process_bytes(state.frame(&table(3, &[0, 3]), Opcode::Update).as_bytes());

        assert_eq!(dds.live().channel(0), state.channel(0));
        assert_eq!(dds.live().channel(3), state.channel(3));
        assert_eq!(dds.live().channel(1).frequency, 0);
        assert_eq!(dds.live().channel(2).frequency, 0);
        assert_eq!(dds.eeprom_writes(), 0);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut dds = ready_device(VirtualDdsConfig::default());
        let mut state = RegisterState::default();
        state.set_phase(1, 180.0).unwrap();
        let frame = state.frame(&table(1, &[1]), Opcode::Update);

        dds.process_bytes(&frame.as_bytes()[..10]);
        assert!(dds.frames().is_empty());
        dds.process_bytes(&frame.as_bytes()[10..]);
        assert_eq!(dds.frames().len(), 1);
        assert_eq!(dds.live().channel(1).phase, 8192);
    }

    #[test]
    fn test_upload_persists_and_download_replies() {
        let mut dds = ready_device(VirtualDdsConfig::default());
        let t = table(2, &[0, 1, 2, 3]);

        let mut state = RegisterState::default();
        state.set_frequency_all(10_000.0).unwrap();
        state.set_phase(2, 270.0).unwrap();
        dds.process_bytes(state.frame(&t, Opcode::Upload).as_bytes());
        assert_eq!(dds.eeprom_writes(), 1);
        assert_eq!(dds.eeprom(), &state);

        dds.process_bytes(state.frame(&t, Opcode::Download).as_bytes());
        let reply = dds.take_output().unwrap();
        assert_eq!(reply.len(), REPLY_LEN);
        assert_eq!(reply, state.payload().to_vec());
    }

    #[test]
    fn test_power_cycle_restores_eeprom() {
        let mut dds = ready_device(VirtualDdsConfig::default());
        let t = table(0, &[0]);

        let mut persisted = RegisterState::default();
        persisted.set_phase(0, 30.0).unwrap();
        dds.process_bytes(persisted.frame(&t, Opcode::Upload).as_bytes());

        let mut transient = RegisterState::default();
        transient.set_phase(0, 60.0).unwrap();
        dds.process_bytes(transient.frame(&t, Opcode::Update).as_bytes());
        assert_eq!(dds.live().channel(0), transient.channel(0));

        dds.power_on();
        assert_eq!(dds.power_cycles(), 2);
        assert_eq!(dds.live().channel(0), persisted.channel(0));
        assert!(!dds.is_ready());
    }

    #[test]
    fn test_acks_when_enabled() {
        let mut dds = ready_device(VirtualDdsConfig {
            ack_frames: true,
            ..VirtualDdsConfig::default()
        });
        let state = RegisterState::default();
        dds.process_bytes(state.frame(&table(0, &[0]), Opcode::Update).as_bytes());
        assert_eq!(dds.take_output().unwrap(), b"ack UPDATE\r\n");
    }

    #[test]
    fn test_exit_stops_processing() {
        let mut dds = ready_device(VirtualDdsConfig::default());
        let t = table(0, &[0]);
        let state = RegisterState::default();

        dds.process_bytes(state.frame(&t, Opcode::Exit).as_bytes());
        assert!(dds.has_exited());
        assert!(!dds.has_output());

        let mut later = RegisterState::default();
        later.set_phase(0, 10.0).unwrap();
        dds.process_bytes(later.frame(&t, Opcode::Update).as_bytes());
        assert_eq!(dds.frames().len(), 1);
        assert_eq!(dds.live().channel(0).phase, 0);
    }

    #[test]
    fn test_frame_log_keeps_most_recent() {
        let mut dds = ready_device(VirtualDdsConfig::default());
        let t = table(0, &[0]);

        for i in 0..FRAME_LOG_LIMIT + 10 {
            let mut state = RegisterState::default();
            state.set_phase_register(0, i as u16);
            dds.process_bytes(state.frame(&t, Opcode::Update).as_bytes());
        }

        assert_eq!(dds.frames().len(), FRAME_LOG_LIMIT);
        assert_eq!(dds.frames_received(), (FRAME_LOG_LIMIT + 10) as u64);
        assert_eq!(dds.frames()[0].registers().channel(0).phase, 10);
        let last = dds.frames().back().unwrap();
        assert_eq!(last.registers().channel(0).phase, (FRAME_LOG_LIMIT + 9) as u16);
    }

    #[test]
    fn test_noise_before_hello_is_not_retained() {
        let mut dds = VirtualDds::new("bench");
        dds.power_on();

        for _ in 0..1000 {
            dds.process_bytes(b"garbage without the token ");
        }
        assert!(!dds.is_ready());
        assert!(dds.buffered_input() < "hello".len());

        // A token split across the trimmed boundary is still found
        dds.process_bytes(b"xxhel");
        dds.process_bytes(b"lo");
        assert!(dds.is_ready());
        assert_eq!(dds.buffered_input(), 0);
    }

    #[test]
    fn test_state_summary() {
        let dds = VirtualDds::new("bench");
        assert!(dds.state_summary().starts_with("bench: f=[0.000"));
    }
}
