//! Virtual DDS actor task
//!
//! Owns the byte stream connected to the host side of a simulated port and
//! feeds it through a shared [`VirtualDds`]. The device sits behind a
//! `std::sync::Mutex` so tests and the console can inspect it while the
//! task runs; the lock is never held across an await point.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use dds_protocol::RegisterState;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::VirtualDds;

/// Commands that can be sent to a virtual DDS actor
#[derive(Debug, Clone)]
pub enum VirtualDdsCommand {
    /// Toggle acknowledgement lines after UPDATE/UPLOAD frames
    SetAckFrames(bool),
    /// Shutdown the virtual DDS actor
    Shutdown,
}

/// Event emitted when the virtual device changes state
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualDdsEvent {
    /// The hello token was accepted
    HandshakeComplete,
    /// Live or persisted registers changed
    Registers {
        live: RegisterState,
        eeprom: RegisterState,
        eeprom_writes: u32,
    },
    /// An EXIT frame was received
    Exited,
}

#[derive(PartialEq)]
struct Snapshot {
    ready: bool,
    exited: bool,
    live: RegisterState,
    eeprom: RegisterState,
    eeprom_writes: u32,
}

impl Snapshot {
    fn of(dds: &VirtualDds) -> Self {
        Self {
            ready: dds.is_ready(),
            exited: dds.has_exited(),
            live: *dds.live(),
            eeprom: *dds.eeprom(),
            eeprom_writes: dds.eeprom_writes(),
        }
    }
}

fn lock(dds: &Mutex<VirtualDds>) -> std::sync::MutexGuard<'_, VirtualDds> {
    dds.lock().unwrap_or_else(PoisonError::into_inner)
}

fn drain_output(dds: &Mutex<VirtualDds>) -> Vec<u8> {
    let mut device = lock(dds);
    let mut out = Vec::new();
    while let Some(chunk) = device.take_output() {
        out.extend_from_slice(&chunk);
    }
    out
}

/// Run the virtual DDS actor task
///
/// Returns when the host closes its end of the stream or a
/// [`VirtualDdsCommand::Shutdown`] arrives.
pub async fn run_virtual_dds_task<S>(
    mut stream: S,
    dds: Arc<Mutex<VirtualDds>>,
    mut cmd_rx: mpsc::Receiver<VirtualDdsCommand>,
    event_tx: broadcast::Sender<VirtualDdsEvent>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 256];
    let id = lock(&dds).id().to_string();
    info!("Starting virtual DDS task for {}", id);

    // Greeting queued by power-on
    let pending = drain_output(&dds);
    if !pending.is_empty() {
        stream.write_all(&pending).await?;
        stream.flush().await?;
    }

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Virtual DDS stream closed for {}", id);
                        break;
                    }
                    Ok(n) => {
                        debug!("Virtual DDS {} received {} bytes", id, n);
                        let (events, out) = {
                            let mut device = lock(&dds);
                            let before = Snapshot::of(&device);
                            device.process_bytes(&buf[..n]);
                            let after = Snapshot::of(&device);
                            let mut out = Vec::new();
                            while let Some(chunk) = device.take_output() {
                                out.extend_from_slice(&chunk);
                            }
                            (changes(&before, &after), out)
                        };

                        if !out.is_empty() {
                            stream.write_all(&out).await?;
                            stream.flush().await?;
                        }
                        for event in events {
                            let _ = event_tx.send(event);
                        }
                    }
                    Err(e) => {
                        warn!("Virtual DDS {} stream error: {}", id, e);
                        return Err(e);
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(VirtualDdsCommand::SetAckFrames(enabled)) => {
                        debug!("Virtual DDS {} ack frames: {}", id, enabled);
                        lock(&dds).set_ack_frames(enabled);
                    }
                    Some(VirtualDdsCommand::Shutdown) | None => {
                        info!("Virtual DDS {} shutting down", id);
                        break;
                    }
                }
            }
        }
    }

    info!("Virtual DDS task stopped: {}", lock(&dds).state_summary());
    Ok(())
}

fn changes(before: &Snapshot, after: &Snapshot) -> Vec<VirtualDdsEvent> {
    let mut events = Vec::new();
    if before == after {
        return events;
    }
    if !before.ready && after.ready {
        events.push(VirtualDdsEvent::HandshakeComplete);
    }
    if before.live != after.live
        || before.eeprom != after.eeprom
        || before.eeprom_writes != after.eeprom_writes
    {
        events.push(VirtualDdsEvent::Registers {
            live: after.live,
            eeprom: after.eeprom,
            eeprom_writes: after.eeprom_writes,
        });
    }
    if !before.exited && after.exited {
        events.push(VirtualDdsEvent::Exited);
    }
    events
}
