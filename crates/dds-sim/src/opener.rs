//! Simulated ports
//!
//! [`SimulatedOpener`] plugs virtual devices in behind the same
//! [`PortOpener`] seam the serial transport uses. Each port identifier gets
//! one persistent [`VirtualDds`]; every open power-cycles it (like the DTR
//! reset of a real board) and wires it to a fresh in-memory stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dds_link::{BoxedIo, LinkConfig, LinkError, PortOpener};
use tokio::io::duplex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::device_task::{run_virtual_dds_task, VirtualDdsCommand, VirtualDdsEvent};
use crate::{VirtualDds, VirtualDdsConfig};

/// Buffer size of the in-memory stream between host and device
const STREAM_BUFFER: usize = 4096;

struct SimulatedPort {
    device: Arc<Mutex<VirtualDds>>,
    cmd_tx: Option<mpsc::Sender<VirtualDdsCommand>>,
    events: broadcast::Sender<VirtualDdsEvent>,
}

/// A [`PortOpener`] backed by virtual devices
pub struct SimulatedOpener {
    template: VirtualDdsConfig,
    overrides: Mutex<HashMap<String, VirtualDdsConfig>>,
    ports: Mutex<HashMap<String, SimulatedPort>>,
}

impl std::fmt::Debug for SimulatedOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedOpener")
            .field("template", &self.template)
            .finish()
    }
}

impl Default for SimulatedOpener {
    fn default() -> Self {
        Self::new(VirtualDdsConfig::default())
    }
}

impl SimulatedOpener {
    /// Create an opener whose devices start from `template`
    ///
    /// The template's `id` is replaced by the port identifier.
    pub fn new(template: VirtualDdsConfig) -> Self {
        Self {
            template,
            overrides: Mutex::new(HashMap::new()),
            ports: Mutex::new(HashMap::new()),
        }
    }

    /// Use `config` for the device behind `port_id` instead of the template
    ///
    /// Only takes effect if the device has not been created yet.
    pub fn configure(&self, port_id: &str, config: VirtualDdsConfig) {
        lock(&self.overrides).insert(port_id.to_string(), config);
    }

    /// The virtual device behind `port_id`, if it was ever opened
    pub fn device(&self, port_id: &str) -> Option<Arc<Mutex<VirtualDds>>> {
        lock(&self.ports).get(port_id).map(|p| p.device.clone())
    }

    /// Subscribe to state events of the device behind `port_id`
    pub fn subscribe(&self, port_id: &str) -> broadcast::Receiver<VirtualDdsEvent> {
        let mut ports = lock(&self.ports);
        self.port_entry(&mut ports, port_id).events.subscribe()
    }

    /// Ask the device task behind `port_id` to stop
    ///
    /// The host side then sees end of stream, as if the cable was pulled.
    pub async fn disconnect(&self, port_id: &str) {
        let cmd_tx = lock(&self.ports)
            .get_mut(port_id)
            .and_then(|p| p.cmd_tx.take());
        if let Some(cmd_tx) = cmd_tx {
            let _ = cmd_tx.send(VirtualDdsCommand::Shutdown).await;
        }
    }

    fn port_entry<'a>(
        &self,
        ports: &'a mut HashMap<String, SimulatedPort>,
        port_id: &str,
    ) -> &'a mut SimulatedPort {
        ports.entry(port_id.to_string()).or_insert_with(|| {
            let config = lock(&self.overrides)
                .remove(port_id)
                .unwrap_or_else(|| VirtualDdsConfig {
                    id: port_id.to_string(),
                    ..self.template.clone()
                });
            debug!("Creating virtual DDS {} for {}", config.id, port_id);
            let (events, _) = broadcast::channel(64);
            SimulatedPort {
                device: Arc::new(Mutex::new(VirtualDds::from_config(config))),
                cmd_tx: None,
                events,
            }
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PortOpener for SimulatedOpener {
    fn open(&self, port_id: &str, _config: &LinkConfig) -> Result<BoxedIo, LinkError> {
        let mut ports = lock(&self.ports);
        let port = self.port_entry(&mut ports, port_id);

        if port.cmd_tx.take().is_some() {
            warn!("Reopening {} while a previous stream is attached", port_id);
        }

        lock(&port.device).power_on();

        let (host, device_side) = duplex(STREAM_BUFFER);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        port.cmd_tx = Some(cmd_tx);

        let device = port.device.clone();
        let events = port.events.clone();
        let name = port_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = run_virtual_dds_task(device_side, device, cmd_rx, events).await {
                warn!("Virtual DDS {} stopped with error: {}", name, e);
            }
        });

        info!("Opened simulated port {}", port_id);
        Ok(Box::new(host))
    }
}
