//! Integration tests for the DDS control layer
//!
//! These tests drive writers against the simulated microcontroller:
//! - Construction (handshake, initial state push, configuration errors)
//! - write / write_full / upload / download / EXIT on the wire
//! - Several writers sharing one port
//! - Range sweeps applied through a writer

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dds_control::{ChannelWriter, DdsError, DeviceCalibration, SweepConfig, SweepEvent, Sweeper};
use dds_link::{ConnectionRegistry, HandshakeConfig, LinkConfig};
use dds_protocol::{ConfigurationError, Opcode, ValueRangeError};
use dds_sim::{SimulatedOpener, VirtualDds, VirtualDdsConfig};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    pub const PORT: &str = "sim-dds";

    pub fn fast_config() -> LinkConfig {
        LinkConfig {
            handshake: HandshakeConfig {
                max_attempts: 3,
                read_timeout: Duration::from_millis(50),
                backoff: Duration::from_millis(1),
                ..HandshakeConfig::default()
            },
            ack_window: Duration::from_millis(50),
            reply_timeout: Duration::from_millis(500),
            ..LinkConfig::default()
        }
    }

    pub fn calibration() -> DeviceCalibration {
        DeviceCalibration {
            name: "local".to_string(),
            port: PORT.to_string(),
            frequency_khz: [80_000.0; 4],
            phase_deg: [0.0, 45.0, 90.0, 180.0],
        }
    }

    pub fn setup() -> (Arc<SimulatedOpener>, ConnectionRegistry) {
        let opener = Arc::new(SimulatedOpener::default());
        let registry = ConnectionRegistry::new(opener.clone(), fast_config());
        (opener, registry)
    }

    pub fn device(opener: &SimulatedOpener) -> Arc<Mutex<VirtualDds>> {
        opener.device(PORT).expect("device was opened")
    }

    /// Wait until the virtual device has received `count` frames
    pub async fn wait_for_frames(dds: &Mutex<VirtualDds>, count: usize) {
        for _ in 0..200 {
            if dds.lock().unwrap().frames_received() >= count as u64 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "device saw {} frame(s), expected {}",
            dds.lock().unwrap().frames_received(),
            count
        );
    }

    pub fn opcodes(dds: &Mutex<VirtualDds>) -> Vec<Opcode> {
        dds.lock().unwrap().frames().iter().map(|f| f.opcode()).collect()
    }
}

use helpers::*;

// ============================================================================
// Construction
// ============================================================================

#[tokio::test]
async fn test_connect_pushes_calibration() {
    let (opener, registry) = setup();
    let writer = ChannelWriter::connect(&registry, &calibration(), 3, &[0])
        .await
        .unwrap();

    assert_eq!(writer.channel(), 3);
    assert_eq!(writer.call_count(), 0);
    assert_eq!(writer.phase(), [0.0, 45.0, 90.0, 180.0]);

    let dds = device(&opener);
    wait_for_frames(&dds, 1).await;
    let frame = dds.lock().unwrap().frames()[0];
    assert_eq!(frame.command_byte(), 0x90);
    assert_eq!(frame.opcode(), Opcode::Update);
    assert_eq!(dds.lock().unwrap().live().channel(3), writer.registers().channel(3));
}

#[tokio::test]
async fn test_invalid_channel_opens_nothing() {
    let (opener, registry) = setup();

    let err = ChannelWriter::connect(&registry, &calibration(), 4, &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DdsError::Configuration(ConfigurationError::ChannelOutOfRange(4))
    ));
    assert!(opener.device(PORT).is_none());
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_out_of_range_calibration_opens_nothing() {
    let (opener, registry) = setup();
    let mut bad = calibration();
    bad.phase_deg[2] = 400.0;

    let err = ChannelWriter::connect(&registry, &bad, 0, &[]).await.unwrap_err();
    assert!(matches!(err, DdsError::ValueRange(ValueRangeError::Phase { .. })));
    assert!(opener.device(PORT).is_none());
}

#[tokio::test]
async fn test_handshake_failure_aborts_construction() {
    let (opener, registry) = setup();
    opener.configure(
        PORT,
        VirtualDdsConfig {
            greeting: String::new(),
            ..VirtualDdsConfig::default()
        },
    );

    let err = ChannelWriter::connect(&registry, &calibration(), 0, &[])
        .await
        .unwrap_err();
    match err {
        DdsError::Handshake(e) => {
            assert_eq!(e.port, PORT);
            assert_eq!(e.attempts, 3);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!registry.contains(PORT).await);
    assert!(device(&opener).lock().unwrap().frames().is_empty());
}

// ============================================================================
// Writer operations
// ============================================================================

#[tokio::test]
async fn test_write_updates_own_channel() {
    let (opener, registry) = setup();
    let mut writer = ChannelWriter::connect(&registry, &calibration(), 1, &[])
        .await
        .unwrap();

    writer.write(90.0).await.unwrap();
    assert_eq!(writer.call_count(), 1);
    assert_eq!(writer.phase(), [0.0, 90.0, 90.0, 180.0]);

    let dds = device(&opener);
    wait_for_frames(&dds, 2).await;
    let dds = dds.lock().unwrap();
    assert_eq!(dds.live().channel(1).phase, 4096);
    assert_eq!(dds.frames()[1].command_byte(), 0x20);
}

#[tokio::test]
async fn test_write_full_broadcasts_frequency() {
    let (opener, registry) = setup();
    let mut writer = ChannelWriter::connect(&registry, &calibration(), 2, &[0, 1, 3])
        .await
        .unwrap();

    writer.write_full(10_000.0, 45.0).await.unwrap();
    let f = writer.frequency();
    assert!(f.iter().all(|&khz| (khz - 10_000.0).abs() < 1e-3));
    assert_eq!(writer.phase()[2], 45.0);
    assert_eq!(writer.phase()[0], 0.0);

    let dds = device(&opener);
    wait_for_frames(&dds, 2).await;
    assert_eq!(*dds.lock().unwrap().live(), writer.registers());
}

#[tokio::test]
async fn test_value_range_error_sends_nothing() {
    let (opener, registry) = setup();
    let mut writer = ChannelWriter::connect(&registry, &calibration(), 0, &[])
        .await
        .unwrap();
    let dds = device(&opener);
    wait_for_frames(&dds, 1).await;
    let before = writer.registers();

    assert!(matches!(
        writer.write(360.1).await,
        Err(DdsError::ValueRange(_))
    ));
    assert!(matches!(
        writer.write(-0.1).await,
        Err(DdsError::ValueRange(_))
    ));
    assert!(matches!(
        writer.write_full(250_001.0, 10.0).await,
        Err(DdsError::ValueRange(ValueRangeError::Frequency { .. }))
    ));
    // Valid frequency, bad phase: neither is applied
    assert!(writer.write_full(1_000.0, 361.0).await.is_err());

    assert_eq!(writer.registers(), before);
    assert_eq!(writer.call_count(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dds.lock().unwrap().frames().len(), 1);
}

#[tokio::test]
async fn test_upload_then_download_reads_back() {
    let (opener, registry) = setup();
    let mut writer = ChannelWriter::connect(&registry, &calibration(), 0, &[1, 2, 3])
        .await
        .unwrap();

    writer.write(123.0).await.unwrap();
    writer.upload().await.unwrap();
    let stored = writer.download().await.unwrap();

    assert_eq!(stored, writer.registers());
    let dds = device(&opener);
    assert_eq!(dds.lock().unwrap().eeprom_writes(), 1);
    assert_eq!(
        opcodes(&dds),
        vec![Opcode::Update, Opcode::Update, Opcode::Upload, Opcode::Download]
    );
}

#[tokio::test]
async fn test_download_leaves_local_state() {
    let (_opener, registry) = setup();
    let mut writer = ChannelWriter::connect(&registry, &calibration(), 0, &[])
        .await
        .unwrap();

    writer.write(45.0).await.unwrap();
    let stored = writer.download().await.unwrap();

    // Nothing was uploaded, the EEPROM still holds power-on defaults
    assert_eq!(stored.channel(0).phase, 0);
    assert_eq!(writer.phase()[0], 45.0);
}

#[tokio::test]
async fn test_download_survives_acknowledgements() {
    let opener = Arc::new(SimulatedOpener::new(VirtualDdsConfig {
        ack_frames: true,
        ..VirtualDdsConfig::default()
    }));
    let config = LinkConfig {
        ack_window: Duration::ZERO,
        ..fast_config()
    };
    let registry = ConnectionRegistry::new(opener.clone(), config);
    let mut writer = ChannelWriter::connect(&registry, &calibration(), 0, &[1, 2, 3])
        .await
        .unwrap();

    for phase in [10.0, 20.0, 30.0] {
        writer.write(phase).await.unwrap();
    }
    writer.upload().await.unwrap();
    let stored = writer.download().await.unwrap();
    assert_eq!(stored, writer.registers());
}

#[tokio::test]
async fn test_self_check_exits_firmware() {
    let (opener, registry) = setup();
    let writer = ChannelWriter::connect(&registry, &calibration(), 0, &[])
        .await
        .unwrap();

    writer.send_self_check().await.unwrap();
    let dds = device(&opener);
    wait_for_frames(&dds, 2).await;
    assert!(dds.lock().unwrap().has_exited());
    assert_eq!(dds.lock().unwrap().frames()[1].payload(), &[0u8; 24][..]);
}

#[tokio::test]
async fn test_calibration_snapshot() {
    let (_opener, registry) = setup();
    let mut writer = ChannelWriter::connect(&registry, &calibration(), 3, &[])
        .await
        .unwrap();
    writer.write(90.0).await.unwrap();

    let record = writer.calibration("local", PORT);
    assert_eq!(record.phase_deg, [0.0, 45.0, 90.0, 90.0]);
    assert_eq!(record.registers().unwrap(), writer.registers());
}

// ============================================================================
// Shared connections
// ============================================================================

#[tokio::test]
async fn test_writers_share_one_connection() {
    let (opener, registry) = setup();
    let mut a = ChannelWriter::connect(&registry, &calibration(), 3, &[0])
        .await
        .unwrap();
    let mut b = ChannelWriter::connect(&registry, &calibration(), 0, &[3])
        .await
        .unwrap();

    assert_eq!(registry.len().await, 1);
    let dds = device(&opener);
    assert_eq!(dds.lock().unwrap().hellos_received(), 1);
    assert_eq!(dds.lock().unwrap().power_cycles(), 1);

    b.write(135.0).await.unwrap();
    a.write(45.0).await.unwrap();

    // One calibration push (the second writer adopts the port state) plus two writes
    wait_for_frames(&dds, 3).await;
    {
        let dds = dds.lock().unwrap();
        assert!(dds
            .frames()
            .iter()
            .all(|f| f.opcode() == Opcode::Update && f.command_byte() == 0x90));
        assert_eq!(dds.frames().len(), 3);
        assert_eq!(dds.live().channel(0).phase, 6144);
        assert_eq!(dds.live().channel(3).phase, 2048);
    }
    assert_eq!(a.registers(), b.registers());
    assert_eq!(a.phase(), [135.0, 45.0, 90.0, 45.0]);
}

#[tokio::test]
async fn test_concurrent_writers_keep_each_others_channels() {
    let (opener, registry) = setup();
    let mut a = ChannelWriter::connect(&registry, &calibration(), 3, &[0])
        .await
        .unwrap();
    let mut b = ChannelWriter::connect(&registry, &calibration(), 0, &[3])
        .await
        .unwrap();

    let (ra, rb) = tokio::join!(a.write(45.0), b.write(135.0));
    ra.unwrap();
    rb.unwrap();

    let dds = device(&opener);
    wait_for_frames(&dds, 3).await;
    let dds = dds.lock().unwrap();
    assert_eq!(dds.live().channel(0).phase, 6144);
    assert_eq!(dds.live().channel(3).phase, 2048);
    assert_eq!(*dds.live(), a.registers());
}

#[tokio::test]
async fn test_later_writer_adopts_port_state() {
    let (opener, registry) = setup();
    let mut a = ChannelWriter::connect(&registry, &calibration(), 1, &[])
        .await
        .unwrap();
    a.write(10.0).await.unwrap();

    let mut other = calibration();
    other.phase_deg = [90.0; 4];
    let b = ChannelWriter::connect(&registry, &other, 2, &[])
        .await
        .unwrap();

    // The port keeps what was written, not the second calibration
    assert_eq!(b.phase(), a.phase());
    let dds = device(&opener);
    wait_for_frames(&dds, 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(opcodes(&dds).len(), 2);
}

#[tokio::test]
async fn test_close_all_then_reconnect() {
    let (opener, registry) = setup();
    let mut writer = ChannelWriter::connect(&registry, &calibration(), 0, &[])
        .await
        .unwrap();
    registry.close_all().await;

    let err = writer.write(10.0).await.unwrap_err();
    assert!(matches!(err, DdsError::Transport(_)));

    let mut again = ChannelWriter::connect(&registry, &calibration(), 0, &[])
        .await
        .unwrap();
    again.write(10.0).await.unwrap();
    assert_eq!(device(&opener).lock().unwrap().power_cycles(), 2);
}

// ============================================================================
// Sweeps
// ============================================================================

#[tokio::test]
async fn test_sweep_through_writer() {
    let (opener, registry) = setup();
    let writer = ChannelWriter::connect(&registry, &calibration(), 2, &[])
        .await
        .unwrap();

    let config = SweepConfig {
        tick: Duration::from_millis(5),
        ..SweepConfig::default()
    };
    let mut sweeper = Sweeper::spawn(writer, config);
    sweeper.run(0.0, 180.0, 10.0).unwrap();

    let mut values = Vec::new();
    loop {
        match sweeper.next_event().await {
            Some(SweepEvent::Value(v)) => values.push(v),
            Some(SweepEvent::Done) => break,
            other => panic!("unexpected event {:?}", other),
        }
    }
    let expected: Vec<f64> = (0..18).map(|i| i as f64 * 10.0).collect();
    assert_eq!(values, expected);

    let writer = sweeper.join().await.unwrap();
    assert_eq!(writer.call_count(), 18);
    let half_step = 180.0 / 16384.0;
    assert!((writer.phase()[2] - 170.0).abs() <= half_step);

    let dds = device(&opener);
    wait_for_frames(&dds, 19).await;
    let live = dds.lock().unwrap().live().channel(2).phase_deg();
    assert!((live - 170.0).abs() <= half_step);
}
