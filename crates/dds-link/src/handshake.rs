//! Greeting exchange run once on every freshly opened port
//!
//! ```text
//! WaitFirstGreeting --marker--> SendHello --> WaitSecondGreeting --marker--> Ready
//!        |                                            |
//!        +------ max_attempts exhausted --------------+--> HandshakeError
//! ```
//!
//! Opening the port resets the microcontroller, which prints a greeting once
//! its setup finishes. The host answers with a fixed token and waits for a
//! second greeting. Each phase has its own budget of `max_attempts` reads.
//! An empty read is followed by a fixed backoff; a non-empty line without the
//! marker also uses up an attempt, so the budget bounds the exchange even on
//! a chatty line.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::{HandshakeError, HandshakePhase, LinkError};
use crate::link::DeviceLink;

/// Handshake parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Read attempts allowed per greeting phase
    pub max_attempts: u32,
    /// Upper bound on a single read attempt
    pub read_timeout: Duration,
    /// Pause after an empty read
    pub backoff: Duration,
    /// Substring every greeting line contains
    pub marker: String,
    /// Token sent after the first greeting
    pub hello: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            read_timeout: Duration::from_millis(300),
            backoff: Duration::from_millis(500),
            marker: "Arduino".to_string(),
            hello: "hello".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    WaitFirstGreeting,
    SendHello,
    WaitSecondGreeting,
    Ready,
}

/// Run the greeting exchange on `link`
///
/// On error the link must be dropped; it is never handed out half-initialised.
pub async fn perform_handshake(
    link: &mut DeviceLink,
    config: &HandshakeConfig,
) -> Result<(), LinkError> {
    let mut state = HandshakeState::WaitFirstGreeting;

    loop {
        trace!("Handshake on {} in state {:?}", link.port(), state);
        state = match state {
            HandshakeState::WaitFirstGreeting => {
                await_greeting(link, config, HandshakePhase::FirstGreeting).await?;
                HandshakeState::SendHello
            }
            HandshakeState::SendHello => {
                link.send(config.hello.as_bytes()).await?;
                HandshakeState::WaitSecondGreeting
            }
            HandshakeState::WaitSecondGreeting => {
                await_greeting(link, config, HandshakePhase::SecondGreeting).await?;
                HandshakeState::Ready
            }
            HandshakeState::Ready => {
                info!("Handshake complete on {}", link.port());
                return Ok(());
            }
        };
    }
}

async fn await_greeting(
    link: &mut DeviceLink,
    config: &HandshakeConfig,
    phase: HandshakePhase,
) -> Result<String, LinkError> {
    let mut attempts = 0;
    while attempts < config.max_attempts {
        attempts += 1;
        match link.read_line(config.read_timeout).await? {
            Some(line) if line.contains(&config.marker) => {
                debug!(
                    "Got {} on {} (attempt {}): {}",
                    phase,
                    link.port(),
                    attempts,
                    line.trim_end()
                );
                return Ok(line);
            }
            Some(line) if !line.trim().is_empty() => {
                debug!(
                    "Ignoring line without greeting marker on {}: {}",
                    link.port(),
                    line.trim_end()
                );
            }
            _ => {
                trace!(
                    "No {} on {} (attempt {}/{})",
                    phase,
                    link.port(),
                    attempts,
                    config.max_attempts
                );
                if attempts < config.max_attempts {
                    tokio::time::sleep(config.backoff).await;
                }
            }
        }
    }

    Err(HandshakeError {
        port: link.port().to_string(),
        phase,
        attempts,
    }
    .into())
}
