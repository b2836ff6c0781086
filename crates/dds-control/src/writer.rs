//! Per-channel writer
//!
//! A [`ChannelWriter`] owns write authority over one DDS channel but frames
//! are always full-width. The registers of all four channels live with the
//! link task of the port and are shared by every writer on it: a writer only
//! patches its own phase (and the shared frequency), and the frame is built
//! from the shared state. Writers on one bus therefore neither interleave
//! bytes nor overwrite each other's channels.

use dds_link::{AckPolicy, ConnectionHandle, ConnectionRegistry};
use dds_protocol::{
    encode_frequency, encode_phase, ChannelGroup, CommandTable, Opcode, RegisterPatch,
    RegisterState, CHANNEL_COUNT,
};
use tracing::{debug, info, warn};

use crate::calibration::DeviceCalibration;
use crate::error::DdsError;

/// Controller for one channel of a DDS device
#[derive(Debug)]
pub struct ChannelWriter {
    device: String,
    table: CommandTable,
    link: ConnectionHandle,
    calls: u64,
}

impl ChannelWriter {
    /// Build a writer for `channel`, sharing the bus with `shared` channels
    ///
    /// Validates the channel group, encodes the calibration, resolves the
    /// port through `registry` (opening and handshaking it if needed). The
    /// first writer on a port seeds it with the calibrated state and pushes
    /// that state to the device; later writers adopt the port's current
    /// state. Any failure leaves no writer behind.
    pub async fn connect(
        registry: &ConnectionRegistry,
        calibration: &DeviceCalibration,
        channel: u8,
        shared: &[u8],
    ) -> Result<Self, DdsError> {
        let group = ChannelGroup::with_shared(channel, shared)?;
        let table = CommandTable::new(channel, &group)?;
        let state = calibration.registers()?;

        let link = registry.resolve(&calibration.port).await?;
        if link.seed_registers(state) {
            link.apply(table, RegisterPatch::none(), Opcode::Update, AckPolicy::Optional)
                .await?;
            debug!("Pushed calibration of {} to {}", calibration.name, link.port());
        }

        info!(
            "Writer for {} channel {} ready on {} (group mask 0x{:02X})",
            calibration.name,
            channel,
            link.port(),
            group.enable_mask()
        );

        Ok(Self {
            device: calibration.name.clone(),
            table,
            link,
            calls: 0,
        })
    }

    /// Set this writer's phase in degrees
    pub async fn write(&mut self, phase_deg: f64) -> Result<(), DdsError> {
        let patch = RegisterPatch::phase(self.channel(), encode_phase(phase_deg)?);

        self.calls += 1;
        debug!(
            "{} ch{} write #{}: {} deg",
            self.device,
            self.channel(),
            self.calls,
            phase_deg
        );
        self.send(patch, Opcode::Update).await
    }

    /// Set the shared frequency (kHz) of every channel and this writer's phase
    pub async fn write_full(&mut self, frequency_khz: f64, phase_deg: f64) -> Result<(), DdsError> {
        let frequency = encode_frequency(frequency_khz)?;
        let phase = encode_phase(phase_deg)?;
        let patch = RegisterPatch::full(frequency, self.channel(), phase);

        self.calls += 1;
        debug!(
            "{} ch{} write_full #{}: {} kHz, {} deg",
            self.device,
            self.channel(),
            self.calls,
            frequency_khz,
            phase_deg
        );
        self.send(patch, Opcode::Update).await
    }

    async fn send(&self, patch: RegisterPatch, op: Opcode) -> Result<(), DdsError> {
        let (_, ack) = self
            .link
            .apply(self.table, patch, op, AckPolicy::Optional)
            .await?;
        if let Some(line) = ack {
            debug!("{} ack: {:?}", self.device, line);
        }
        Ok(())
    }

    /// Persist the current registers to the device EEPROM
    ///
    /// The EEPROM has limited write endurance; call this on operator request,
    /// not on every change.
    pub async fn upload(&self) -> Result<(), DdsError> {
        warn!(
            "Writing {} registers to EEPROM (limited write endurance)",
            self.device
        );
        self.send(RegisterPatch::none(), Opcode::Upload).await
    }

    /// Read back the registers stored in the device EEPROM
    ///
    /// The shared register state is left untouched.
    pub async fn download(&self) -> Result<RegisterState, DdsError> {
        let reply = self
            .link
            .exchange(RegisterState::default().frame(&self.table, Opcode::Download))
            .await?;
        let stored = RegisterState::from_reply(&reply);

        for (ch, (f, p)) in stored
            .frequencies_khz()
            .iter()
            .zip(stored.phases_deg().iter())
            .enumerate()
        {
            info!("{} EEPROM ch{}: {:.4} kHz, {:.2} deg", self.device, ch, f, p);
        }
        Ok(stored)
    }

    /// Tell the firmware to leave its interactive loop
    pub async fn send_self_check(&self) -> Result<(), DdsError> {
        self.link
            .send_frame(
                RegisterState::default().frame(&self.table, Opcode::Exit),
                AckPolicy::None,
            )
            .await?;
        info!("{} sent EXIT", self.device);
        Ok(())
    }

    /// Frequencies of all channels in kHz
    pub fn frequency(&self) -> [f64; CHANNEL_COUNT] {
        self.registers().frequencies_khz()
    }

    /// Phases of all channels in degrees
    pub fn phase(&self) -> [f64; CHANNEL_COUNT] {
        self.registers().phases_deg()
    }

    /// Channel this writer controls
    pub fn channel(&self) -> u8 {
        self.table.channel()
    }

    /// Channels addressed by this writer's frames
    pub fn group(&self) -> &ChannelGroup {
        self.table.group()
    }

    /// Device name from the calibration record
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Register values last sent on this writer's port, by any writer
    pub fn registers(&self) -> RegisterState {
        self.link.registers().unwrap_or_default()
    }

    /// Number of write/write_full calls so far
    pub fn call_count(&self) -> u64 {
        self.calls
    }

    /// Snapshot the current state as a calibration record
    pub fn calibration(&self, name: &str, port: &str) -> DeviceCalibration {
        DeviceCalibration::from_registers(name, port, &self.registers())
    }
}
