//! Connection registry
//!
//! Re-opening a serial device resets the microcontroller, and two handshakes
//! on one line would corrupt each other, so every port identifier maps to at
//! most one live link. The registry is an ordinary value: build one per
//! process (or per test) and hand it to every writer that needs a link.
//!
//! Opening is serialized per port, not registry-wide: a silent device only
//! delays callers asking for that same port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::handshake::perform_handshake;
use crate::link::{spawn_link, ConnectionHandle, DeviceLink};
use crate::transport::{LinkConfig, PortOpener};

/// Held while a port is being opened and handshaken
type OpenGuard = Arc<tokio::sync::Mutex<()>>;

/// Open-once cache of handshaken links keyed by port identifier
pub struct ConnectionRegistry {
    opener: Arc<dyn PortOpener>,
    config: LinkConfig,
    links: Mutex<HashMap<String, ConnectionHandle>>,
    opening: Mutex<HashMap<String, OpenGuard>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("opener", &"<opener>")
            .field("config", &self.config)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionRegistry {
    /// Create an empty registry using `opener` for every new port
    pub fn new(opener: Arc<dyn PortOpener>, config: LinkConfig) -> Self {
        Self {
            opener,
            config,
            links: Mutex::new(HashMap::new()),
            opening: Mutex::new(HashMap::new()),
        }
    }

    /// Link configuration applied to new connections
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn live_link(&self, port_id: &str) -> Option<ConnectionHandle> {
        lock(&self.links)
            .get(port_id)
            .filter(|h| !h.is_closed())
            .cloned()
    }

    /// Return the link for `port_id`, opening and handshaking it on first use
    ///
    /// Concurrent first resolutions of one port wait on that port's guard and
    /// share a single handshake. Other ports are not held up. A failed
    /// handshake caches nothing.
    pub async fn resolve(&self, port_id: &str) -> Result<ConnectionHandle, LinkError> {
        if let Some(handle) = self.live_link(port_id) {
            debug!("Reusing link for {}", port_id);
            return Ok(handle);
        }

        let guard = lock(&self.opening)
            .entry(port_id.to_string())
            .or_default()
            .clone();
        let _opening = guard.lock().await;

        // Someone else may have finished opening while we waited
        if let Some(handle) = self.live_link(port_id) {
            debug!("Reusing link for {}", port_id);
            return Ok(handle);
        }
        if lock(&self.links).remove(port_id).is_some() {
            warn!("Cached link for {} has stopped, reopening", port_id);
        }

        let io = self.opener.open(port_id, &self.config)?;
        let mut link = DeviceLink::new(port_id, io);
        perform_handshake(&mut link, &self.config.handshake).await?;

        let handle = spawn_link(link, self.config.clone());
        let open = {
            let mut links = lock(&self.links);
            links.insert(port_id.to_string(), handle.clone());
            links.len()
        };
        info!("Registered link for {} ({} open)", port_id, open);
        Ok(handle)
    }

    /// Whether a live link exists for `port_id`
    pub async fn contains(&self, port_id: &str) -> bool {
        self.live_link(port_id).is_some()
    }

    /// Number of cached links
    pub async fn len(&self) -> usize {
        lock(&self.links).len()
    }

    /// Whether no link is cached
    pub async fn is_empty(&self) -> bool {
        lock(&self.links).is_empty()
    }

    /// Stop every link task and forget all ports
    pub async fn close_all(&self) {
        let drained: Vec<_> = lock(&self.links).drain().collect();
        for (port, handle) in drained {
            debug!("Closing link for {}", port);
            handle.close().await;
        }
    }
}
