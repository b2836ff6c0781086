use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use dds_control::{CalibrationStore, ChannelWriter, DeviceCalibration, SweepConfig, SweepEvent, Sweeper};
use dds_link::{ConnectionRegistry, LinkConfig, PortOpener, SerialOpener};
use dds_protocol::RegisterState;
use dds_sim::SimulatedOpener;
use tracing::{info, warn};

use crate::{Cli, Command};

/// Port identifier used for simulated devices without a calibration record
const SIMULATED_PORT: &str = "simulated";

fn load_store(cli: &Cli) -> anyhow::Result<CalibrationStore> {
    let store = match &cli.calibration {
        Some(path) => CalibrationStore::load_from(path)?,
        None => CalibrationStore::load()?,
    };
    Ok(store)
}

fn calibration_for(cli: &Cli, store: &CalibrationStore) -> anyhow::Result<DeviceCalibration> {
    match store.find(&cli.device) {
        Ok(record) => Ok(record.clone()),
        Err(_) if cli.simulate => {
            warn!(
                "No calibration for {}, simulating with zeroed registers",
                cli.device
            );
            Ok(DeviceCalibration::new(&cli.device, SIMULATED_PORT))
        }
        Err(e) => Err(e).context("look up calibration record"),
    }
}

fn print_registers(label: &str, registers: &RegisterState) {
    println!("{label}");
    for (ch, (f, p)) in registers
        .frequencies_khz()
        .iter()
        .zip(registers.phases_deg().iter())
        .enumerate()
    {
        println!("  ch{ch}: {f:>12.4} kHz  {p:>8.3} deg");
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut store = load_store(&cli)?;
    let calibration = calibration_for(&cli, &store)?;

    let opener: Arc<dyn PortOpener> = if cli.simulate {
        Arc::new(SimulatedOpener::default())
    } else {
        Arc::new(SerialOpener::new())
    };
    let registry = ConnectionRegistry::new(opener, LinkConfig::default());

    let writer = ChannelWriter::connect(&registry, &calibration, cli.channel, &cli.share)
        .await
        .with_context(|| format!("connect to {} on {}", calibration.name, calibration.port))?;

    let result = execute(&cli, writer, &calibration, &mut store).await;
    registry.close_all().await;
    result
}

async fn execute(
    cli: &Cli,
    mut writer: ChannelWriter,
    calibration: &DeviceCalibration,
    store: &mut CalibrationStore,
) -> anyhow::Result<()> {
    match cli.command.clone() {
        Command::Write { phase } => {
            writer.write(phase).await?;
            let ch = writer.channel();
            println!("ch{} phase {:.3} deg", ch, writer.phase()[usize::from(ch)]);
        }
        Command::WriteFull { frequency, phase } => {
            writer.write_full(frequency, phase).await?;
            print_registers("Current registers", &writer.registers());
        }
        Command::Sweep {
            start,
            stop,
            step,
            delay_ms,
        } => {
            let config = SweepConfig {
                step_delay: Duration::from_millis(delay_ms),
                ..SweepConfig::default()
            };
            sweep(writer, config, start, stop, step).await?;
        }
        Command::Download => {
            let stored = writer.download().await?;
            print_registers("EEPROM registers", &stored);
        }
        Command::Upload => {
            writer.upload().await?;
            println!("Uploaded registers of {} to EEPROM", calibration.name);
        }
        Command::SelfCheck => {
            writer.send_self_check().await?;
            println!("EXIT sent to {}", calibration.name);
        }
        Command::Snapshot { from_device } => {
            let record = if from_device {
                let stored = writer.download().await?;
                DeviceCalibration::from_registers(&calibration.name, &calibration.port, &stored)
            } else {
                writer.calibration(&calibration.name, &calibration.port)
            };
            store.upsert(record);
            let path = match &cli.calibration {
                Some(path) => {
                    store.save_to(path)?;
                    path.clone()
                }
                None => store.save()?,
            };
            println!("Saved {} to {}", calibration.name, path.display());
        }
    }
    Ok(())
}

/// Run one sweep to completion, stopping early on Ctrl-C
async fn sweep(
    writer: ChannelWriter,
    config: SweepConfig,
    start: f64,
    stop: f64,
    step: f64,
) -> anyhow::Result<()> {
    let mut sweeper = Sweeper::spawn(writer, config);
    sweeper.run(start, stop, step)?;
    info!("Sweeping {} -> {} by {} (Ctrl-C to stop)", start, stop, step);

    let mut failure = None;
    loop {
        tokio::select! {
            event = sweeper.next_event() => match event {
                Some(SweepEvent::Value(phase)) => println!("{phase:.3}"),
                Some(SweepEvent::Failed { phase, message }) => {
                    failure = Some(format!("sweep failed at {phase} deg: {message}"));
                }
                Some(SweepEvent::Done) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping sweep");
                let _ = sweeper.quit();
            }
        }
    }

    let writer = sweeper.join().await?;
    info!(
        "Sweep finished after {} write(s), ch{} at {:.3} deg",
        writer.call_count(),
        writer.channel(),
        writer.phase()[usize::from(writer.channel())]
    );
    if let Some(message) = failure {
        bail!(message);
    }
    Ok(())
}
