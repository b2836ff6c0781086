//! Range-sweep worker
//!
//! A [`Sweeper`] runs in its own task and steps a phase sink through a range
//! on request. Commands arrive on one channel and results leave on another;
//! both sides poll, so a new command (including quit) is honored within one
//! tick even in the middle of a sweep.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use dds_protocol::ConfigurationError;

use crate::error::DdsError;
use crate::writer::ChannelWriter;

/// Something the sweep can apply each phase to
pub trait PhaseSink: Send + 'static {
    /// Apply one phase value in degrees
    fn write_phase(&mut self, phase_deg: f64) -> impl Future<Output = Result<(), DdsError>> + Send;
}

impl PhaseSink for ChannelWriter {
    async fn write_phase(&mut self, phase_deg: f64) -> Result<(), DdsError> {
        self.write(phase_deg).await
    }
}

/// Records every value; useful for dry runs
impl PhaseSink for Vec<f64> {
    async fn write_phase(&mut self, phase_deg: f64) -> Result<(), DdsError> {
        self.push(phase_deg);
        Ok(())
    }
}

/// Relative slack on the step count, so a `stop` that is a whole number of
/// steps away is excluded despite float error in the quotient
const SPAN_EPSILON: f64 = 1e-9;

/// Half-open range `start, start + step, ...` stopping before `stop`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepRange {
    start: f64,
    stop: f64,
    step: f64,
}

impl SweepRange {
    /// Create a range; a zero (or non-finite) step is rejected
    pub fn new(start: f64, stop: f64, step: f64) -> Result<Self, ConfigurationError> {
        if step == 0.0 || !step.is_finite() {
            return Err(ConfigurationError::ZeroStep);
        }
        Ok(Self { start, stop, step })
    }

    /// Number of values in the range
    pub fn len(&self) -> usize {
        let span = (self.stop - self.start) / self.step;
        if span.is_finite() && span > 0.0 {
            (span * (1.0 - SPAN_EPSILON)).ceil() as usize
        } else {
            0
        }
    }

    /// Whether the range yields nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The values in order
    pub fn values(&self) -> impl Iterator<Item = f64> {
        let Self { start, step, .. } = *self;
        (0..self.len()).map(move |i| start + step * i as f64)
    }
}

/// Sweep worker timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Poll period while idle
    pub tick: Duration,
    /// Pause between steps of a running sweep
    pub step_delay: Duration,
    /// Depth of the command queue
    pub command_buffer: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            step_delay: Duration::ZERO,
            command_buffer: 8,
        }
    }
}

/// Results reported by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum SweepEvent {
    /// A value was applied
    Value(f64),
    /// Applying a value failed; the sweep stops
    Failed { phase: f64, message: String },
    /// The sweep finished or was interrupted
    Done,
}

#[derive(Debug)]
enum SweepCommand {
    Run(SweepRange),
    Quit,
}

/// Handle to a running sweep worker
#[derive(Debug)]
pub struct Sweeper<S> {
    cmd_tx: mpsc::Sender<SweepCommand>,
    event_rx: mpsc::UnboundedReceiver<SweepEvent>,
    task: JoinHandle<S>,
}

impl<S: PhaseSink> Sweeper<S> {
    /// Start the worker; it owns `sink` until [`Sweeper::join`]
    pub fn spawn(sink: S, config: SweepConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_sweep_task(sink, config, cmd_rx, event_tx));
        Self {
            cmd_tx,
            event_rx,
            task,
        }
    }

    /// Request a sweep over `start..stop` by `step`
    ///
    /// A sweep already running is interrupted (it reports [`SweepEvent::Done`]).
    pub fn run(&self, start: f64, stop: f64, step: f64) -> Result<(), DdsError> {
        let range = SweepRange::new(start, stop, step)?;
        self.send(SweepCommand::Run(range))
    }

    /// Ask the worker to stop
    pub fn quit(&self) -> Result<(), DdsError> {
        self.send(SweepCommand::Quit)
    }

    fn send(&self, cmd: SweepCommand) -> Result<(), DdsError> {
        self.cmd_tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => DdsError::SweepBusy,
            TrySendError::Closed(_) => DdsError::SweepStopped,
        })
    }

    /// Next result if one is ready
    pub fn poll(&mut self) -> Option<SweepEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Wait for the next result; `None` once the worker has exited
    pub async fn next_event(&mut self) -> Option<SweepEvent> {
        self.event_rx.recv().await
    }

    /// Whether the worker task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the worker and take the sink back
    pub async fn join(self) -> Result<S, DdsError> {
        let _ = self.cmd_tx.try_send(SweepCommand::Quit);
        drop(self.cmd_tx);
        Ok(self.task.await?)
    }
}

async fn run_sweep_task<S: PhaseSink>(
    mut sink: S,
    config: SweepConfig,
    mut cmd_rx: mpsc::Receiver<SweepCommand>,
    event_tx: mpsc::UnboundedSender<SweepEvent>,
) -> S {
    let mut tick = interval(config.tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next: Option<SweepCommand> = None;

    info!("Sweep worker started (tick {:?})", config.tick);

    loop {
        let cmd = match next.take() {
            Some(cmd) => cmd,
            None => {
                tick.tick().await;
                match cmd_rx.try_recv() {
                    Ok(cmd) => cmd,
                    Err(TryRecvError::Empty) => continue,
                    Err(TryRecvError::Disconnected) => break,
                }
            }
        };

        match cmd {
            SweepCommand::Quit => break,
            SweepCommand::Run(range) => {
                info!(
                    "Sweeping {} -> {} by {} ({} steps)",
                    range.start,
                    range.stop,
                    range.step,
                    range.len()
                );
                next = sweep(&mut sink, range, &config, &mut cmd_rx, &event_tx).await;
                let _ = event_tx.send(SweepEvent::Done);
            }
        }
    }

    info!("Sweep worker stopped");
    sink
}

/// Step through `range`; returns a command that interrupted it
async fn sweep<S: PhaseSink>(
    sink: &mut S,
    range: SweepRange,
    config: &SweepConfig,
    cmd_rx: &mut mpsc::Receiver<SweepCommand>,
    event_tx: &mpsc::UnboundedSender<SweepEvent>,
) -> Option<SweepCommand> {
    for phase in range.values() {
        if let Err(e) = sink.write_phase(phase).await {
            warn!("Sweep stopped at {} deg: {}", phase, e);
            let _ = event_tx.send(SweepEvent::Failed {
                phase,
                message: e.to_string(),
            });
            return None;
        }
        let _ = event_tx.send(SweepEvent::Value(phase));

        if !config.step_delay.is_zero() {
            tokio::time::sleep(config.step_delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        match cmd_rx.try_recv() {
            Ok(cmd) => {
                debug!("Sweep interrupted at {} deg by {:?}", phase, cmd);
                return Some(cmd);
            }
            Err(TryRecvError::Disconnected) => return Some(SweepCommand::Quit),
            Err(TryRecvError::Empty) => {}
        }
    }
    None
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn positive_step_stays_below_stop(
            start in -1000.0f64..1000.0,
            step in 0.01f64..100.0,
            steps in 0.0f64..200.0,
        ) {
            let stop = start + step * steps;
            let range = SweepRange::new(start, stop, step).unwrap();
            let values: Vec<f64> = range.values().collect();

            prop_assert_eq!(values.len(), range.len());
            prop_assert!(values.iter().all(|&v| v < stop), "{:?} reaches {}", values, stop);
            prop_assert!(values.windows(2).all(|w| w[0] < w[1]));
            // Nothing short of stop is skipped
            let next = start + step * values.len() as f64;
            prop_assert!(next >= stop - step * 1e-6);
        }

        #[test]
        fn reversed_range_is_empty(
            start in -1000.0f64..1000.0,
            step in 0.01f64..100.0,
            back in 0.0f64..1000.0,
        ) {
            let range = SweepRange::new(start, start - back, step).unwrap();
            prop_assert!(range.is_empty());
            prop_assert_eq!(range.values().count(), 0);
        }
    }
}
