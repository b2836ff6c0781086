//! Device link and its owning task
//!
//! A [`DeviceLink`] wraps a buffered device stream with the handful of reads
//! the protocol needs: a bounded wait for a text line, an exact-length
//! binary reply, and a drain of stale input. After the handshake the link is
//! moved into a task ([`spawn_link`]) and is only reachable through a
//! [`ConnectionHandle`]. The task serves one request at a time, which is what
//! keeps frames from different writers sharing a port from interleaving.
//!
//! The task also owns the register state every writer on the port shares.
//! Writers submit a [`RegisterPatch`] and the task assembles the frame from
//! the shared state, so one writer never resends another's stale channels.

use std::io::{self, ErrorKind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dds_protocol::{CommandTable, Frame, Opcode, RegisterPatch, RegisterState, REPLY_LEN};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::transport::{BoxedIo, LinkConfig};

/// Buffered stream to one microcontroller
pub struct DeviceLink {
    port: String,
    io: BufReader<BoxedIo>,
    /// Bytes of a line that has not been terminated yet
    line: Vec<u8>,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("port", &self.port)
            .field("io", &"<stream>")
            .field("partial_line", &self.line.len())
            .finish()
    }
}

impl DeviceLink {
    /// Wrap an opened device stream
    pub fn new(port: impl Into<String>, io: BoxedIo) -> Self {
        Self {
            port: port.into(),
            io: BufReader::new(io),
            line: Vec::with_capacity(64),
        }
    }

    /// Port identifier this link was opened for
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Write all bytes and flush
    pub async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        trace!("{} <- {:02X?}", self.port, data);
        self.io.write_all(data).await?;
        self.io.flush().await
    }

    /// Read one newline-terminated line, waiting at most `wait`
    ///
    /// Returns `Ok(None)` when no complete line arrived in time or the stream
    /// is at end-of-file. A partially received line is kept and completed by
    /// the next call.
    pub async fn read_line(&mut self, wait: Duration) -> io::Result<Option<String>> {
        match timeout(wait, self.io.read_until(b'\n', &mut self.line)).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(e),
            Ok(Ok(_)) if self.line.is_empty() => Ok(None),
            Ok(Ok(_)) => {
                let text = String::from_utf8_lossy(&self.line).into_owned();
                self.line.clear();
                trace!("{} -> {:?}", self.port, text);
                Ok(Some(text))
            }
        }
    }

    /// Read an exact-length DOWNLOAD reply
    pub async fn read_reply(&mut self, wait: Duration) -> io::Result<[u8; REPLY_LEN]> {
        let mut reply = [0u8; REPLY_LEN];
        match timeout(wait, self.io.read_exact(&mut reply)).await {
            Ok(Ok(_)) => {
                trace!("{} -> {:02X?}", self.port, reply);
                Ok(reply)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                ErrorKind::TimedOut,
                format!("no {}-byte reply from {} within {:?}", REPLY_LEN, self.port, wait),
            )),
        }
    }

    /// Discard input until the line has been quiet for `window`
    ///
    /// Returns the number of bytes dropped.
    pub async fn discard_pending(&mut self, window: Duration) -> io::Result<usize> {
        let mut dropped = std::mem::take(&mut self.line).len();
        loop {
            let available = match timeout(window, self.io.fill_buf()).await {
                Ok(Ok(buf)) => buf.len(),
                Ok(Err(e)) => return Err(e),
                Err(_) => 0,
            };
            if available == 0 {
                break;
            }
            self.io.consume(available);
            dropped += available;
        }
        if dropped > 0 {
            debug!("Discarded {} stale byte(s) from {}", dropped, self.port);
        }
        Ok(dropped)
    }
}

/// Whether a frame may be followed by an acknowledgement line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Fire and forget
    None,
    /// Consume one line if it is available within the ack window
    Optional,
}

/// Requests served by a link task
#[derive(Debug)]
enum LinkRequest {
    /// Send a frame, optionally consuming an acknowledgement
    Send {
        frame: Frame,
        ack: AckPolicy,
        response: oneshot::Sender<io::Result<Option<String>>>,
    },
    /// Patch the shared registers and send them as one frame
    Apply {
        table: CommandTable,
        patch: RegisterPatch,
        op: Opcode,
        ack: AckPolicy,
        response: oneshot::Sender<io::Result<(RegisterState, Option<String>)>>,
    },
    /// Send a frame and read a fixed-length reply
    Exchange {
        frame: Frame,
        response: oneshot::Sender<io::Result<[u8; REPLY_LEN]>>,
    },
    /// Stop the task and drop the port
    Shutdown,
}

/// Cloneable handle to a running link task
#[derive(Clone)]
pub struct ConnectionHandle {
    port: Arc<str>,
    tx: mpsc::Sender<LinkRequest>,
    /// Last register state sent on this link; `None` until seeded
    registers: Arc<Mutex<Option<RegisterState>>>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("port", &self.port)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl ConnectionHandle {
    /// Port identifier of the underlying link
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether both handles drive the same link task
    pub fn same_link(&self, other: &ConnectionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Whether the link task has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Register state shared by every writer on this link
    pub fn registers(&self) -> Option<RegisterState> {
        *lock(&self.registers)
    }

    /// Install `state` as the shared registers unless already seeded
    ///
    /// Returns `true` if this call seeded the link.
    pub fn seed_registers(&self, state: RegisterState) -> bool {
        let mut registers = lock(&self.registers);
        if registers.is_some() {
            return false;
        }
        *registers = Some(state);
        true
    }

    /// Apply `patch` to the shared registers and send them with `op`
    ///
    /// The shared state is only updated once the frame has been written.
    /// Returns the resulting state and the acknowledgement line, if any.
    pub async fn apply(
        &self,
        table: CommandTable,
        patch: RegisterPatch,
        op: Opcode,
        ack: AckPolicy,
    ) -> io::Result<(RegisterState, Option<String>)> {
        let (response, rx) = oneshot::channel();
        self.request(LinkRequest::Apply {
            table,
            patch,
            op,
            ack,
            response,
        })
        .await?;
        rx.await.map_err(|_| self.closed_error())?
    }

    /// Send a frame; returns the acknowledgement line if one was consumed
    pub async fn send_frame(&self, frame: Frame, ack: AckPolicy) -> io::Result<Option<String>> {
        let (response, rx) = oneshot::channel();
        self.request(LinkRequest::Send {
            frame,
            ack,
            response,
        })
        .await?;
        rx.await.map_err(|_| self.closed_error())?
    }

    /// Send a frame and wait for the 24-byte reply
    pub async fn exchange(&self, frame: Frame) -> io::Result<[u8; REPLY_LEN]> {
        let (response, rx) = oneshot::channel();
        self.request(LinkRequest::Exchange { frame, response })
            .await?;
        rx.await.map_err(|_| self.closed_error())?
    }

    /// Ask the link task to stop
    pub async fn close(&self) {
        let _ = self.tx.send(LinkRequest::Shutdown).await;
    }

    async fn request(&self, request: LinkRequest) -> io::Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> io::Error {
        io::Error::new(
            ErrorKind::BrokenPipe,
            format!("link to {} is closed", self.port),
        )
    }
}

/// Move a handshaken link into its own task
pub fn spawn_link(link: DeviceLink, config: LinkConfig) -> ConnectionHandle {
    let (tx, rx) = mpsc::channel(config.request_buffer.max(1));
    let port: Arc<str> = Arc::from(link.port());
    let registers = Arc::new(Mutex::new(None));
    tokio::spawn(run_link_task(link, config, rx, registers.clone()));
    ConnectionHandle {
        port,
        tx,
        registers,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_link_task(
    mut link: DeviceLink,
    config: LinkConfig,
    mut rx: mpsc::Receiver<LinkRequest>,
    registers: Arc<Mutex<Option<RegisterState>>>,
) {
    info!("Link task started for {}", link.port());
    let mut frames_sent: u64 = 0;

    while let Some(request) = rx.recv().await {
        match request {
            LinkRequest::Send {
                frame,
                ack,
                response,
            } => {
                let result = send_with_ack(&mut link, &config, &frame, ack).await;
                if result.is_ok() {
                    frames_sent += 1;
                }
                debug!(
                    "{} frame #{} on {}: {:?}",
                    frame.opcode().name(),
                    frames_sent,
                    link.port(),
                    result.as_ref().map_err(|e| e.kind())
                );
                let lost = result.as_ref().is_err_and(is_disconnect);
                let _ = response.send(result);
                if lost {
                    warn!("Device on {} disconnected", link.port());
                    break;
                }
            }
            LinkRequest::Apply {
                table,
                patch,
                op,
                ack,
                response,
            } => {
                let mut next = lock(&registers).unwrap_or_default();
                patch.apply(&mut next);
                let frame = next.frame(&table, op);
                let result = send_with_ack(&mut link, &config, &frame, ack).await;
                if result.is_ok() {
                    frames_sent += 1;
                    *lock(&registers) = Some(next);
                }
                debug!(
                    "{} frame #{} on {} (patch {:?}): {:?}",
                    op.name(),
                    frames_sent,
                    link.port(),
                    patch,
                    result.as_ref().map_err(|e| e.kind())
                );
                let lost = result.as_ref().is_err_and(is_disconnect);
                let _ = response.send(result.map(|ack| (next, ack)));
                if lost {
                    warn!("Device on {} disconnected", link.port());
                    break;
                }
            }
            LinkRequest::Exchange { frame, response } => {
                let result = exchange(&mut link, &config, &frame).await;
                if result.is_ok() {
                    frames_sent += 1;
                }
                let lost = result.as_ref().is_err_and(is_disconnect);
                let _ = response.send(result);
                if lost {
                    warn!("Device on {} disconnected", link.port());
                    break;
                }
            }
            LinkRequest::Shutdown => {
                info!("Shutdown requested for link {}", link.port());
                break;
            }
        }
    }

    info!(
        "Link task ended for {} after {} frame(s)",
        link.port(),
        frames_sent
    );
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset
    )
}

async fn send_with_ack(
    link: &mut DeviceLink,
    config: &LinkConfig,
    frame: &Frame,
    ack: AckPolicy,
) -> io::Result<Option<String>> {
    link.send(frame.as_bytes()).await?;
    match ack {
        AckPolicy::None => Ok(None),
        AckPolicy::Optional => Ok(link
            .read_line(config.ack_window)
            .await?
            .map(|line| line.trim_end().to_string())),
    }
}

async fn exchange(
    link: &mut DeviceLink,
    config: &LinkConfig,
    frame: &Frame,
) -> io::Result<[u8; REPLY_LEN]> {
    let dropped = link.discard_pending(config.drain_window).await?;
    if dropped > 0 {
        warn!(
            "Dropped {} unread byte(s) before {} on {}",
            dropped,
            frame.opcode().name(),
            link.port()
        );
    }
    link.send(frame.as_bytes()).await?;
    link.read_reply(config.reply_timeout).await
}
