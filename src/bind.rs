//! Binding handshake: trades the generic key for a device-scoped session key.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::codec::{Envelope, Key, SessionKey, decode};
use crate::error::BindError;
use crate::protocol::{BindReply, DEFAULT_CLIENT_ID, bind_message, parse_bind_reply};
use crate::transport::Channel;
use crate::types::DeviceDescriptor;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// One initial request plus one retry.
const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    Idle,
    RequestSent,
    Bound,
    TimedOut,
    Unresponsive,
    Rejected,
}

impl BindState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BindState::Idle | BindState::RequestSent)
    }
}

pub struct HandshakeBuilder {
    descriptor: DeviceDescriptor,
    generic_key: Key,
    timeout: Duration,
    retry_backoff: Duration,
    client_id: String,
}

impl HandshakeBuilder {
    pub fn new(descriptor: DeviceDescriptor, generic_key: Key) -> Self {
        Self {
            descriptor,
            generic_key,
            timeout: DEFAULT_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }

    /// How long each attempt waits for the device.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    pub fn build(self) -> Handshake {
        Handshake {
            descriptor: self.descriptor,
            generic_key: self.generic_key,
            timeout: self.timeout,
            retry_backoff: self.retry_backoff,
            client_id: self.client_id,
            state: BindState::Idle,
        }
    }
}

/// Single-use bind exchange with one device.
///
/// Units only accept a bind shortly after answering a scan, so a handshake
/// that reached a terminal state cannot be run again; rediscover and start a
/// new one.
pub struct Handshake {
    descriptor: DeviceDescriptor,
    generic_key: Key,
    timeout: Duration,
    retry_backoff: Duration,
    client_id: String,
    state: BindState,
}

impl Handshake {
    pub fn new(descriptor: DeviceDescriptor, generic_key: Key) -> Self {
        HandshakeBuilder::new(descriptor, generic_key).build()
    }

    pub fn builder(descriptor: DeviceDescriptor, generic_key: Key) -> HandshakeBuilder {
        HandshakeBuilder::new(descriptor, generic_key)
    }

    pub fn state(&self) -> BindState {
        self.state
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub async fn run(&mut self) -> Result<SessionKey, BindError> {
        if self.state != BindState::Idle {
            return Err(BindError::Spent);
        }

        let mut attempt = 1;
        loop {
            self.state = BindState::RequestSent;
            // new socket each attempt; a queued refusal would fail the retry at once
            let outcome = match Channel::connect(self.descriptor.addr).await {
                Ok(channel) => self.attempt(&channel).await,
                Err(e) => Err(BindError::Unresponsive {
                    device: self.descriptor.id.clone(),
                    reason: e.to_string(),
                }),
            };
            match outcome {
                Ok(key) => {
                    self.state = BindState::Bound;
                    info!(device = %self.descriptor.id, attempt, "device bound");
                    return Ok(key);
                }
                Err(e @ BindError::Rejected { .. }) => return Err(self.fail(e)),
                Err(e) if attempt < MAX_ATTEMPTS => {
                    debug!(device = %self.descriptor.id, attempt, error = %e, "bind attempt failed, retrying");
                    tokio::time::sleep(self.retry_backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    async fn attempt(&self, channel: &Channel) -> Result<SessionKey, BindError> {
        let device = self.descriptor.id.as_str();
        let unresponsive = |reason: String| BindError::Unresponsive {
            device: device.to_string(),
            reason,
        };

        channel.drain();
        let request = bind_message(&self.client_id, device, &self.generic_key);
        debug!(device, addr = %channel.peer(), "sending bind request");
        channel
            .send(&request)
            .await
            .map_err(|e| unresponsive(e.to_string()))?;

        let deadline = Instant::now() + self.timeout;
        let mut noise = None;
        loop {
            let datagram = match channel.recv_until(deadline).await {
                Ok(Some(datagram)) => datagram,
                Ok(None) => break,
                Err(e) => return Err(unresponsive(e.to_string())),
            };

            let pack = match Envelope::from_slice(&datagram).and_then(|env| decode(&self.generic_key, &env)) {
                Ok(pack) => pack,
                Err(e) => {
                    trace!(device, error = %e, "undecodable bind reply");
                    noise = Some(e.to_string());
                    continue;
                }
            };

            match parse_bind_reply(&pack, device) {
                Some(BindReply::Bound(text)) => {
                    return SessionKey::from_text(&text).map_err(|e| BindError::Rejected {
                        device: device.to_string(),
                        code: None,
                        reason: e.to_string(),
                    });
                }
                Some(BindReply::Rejected { code, reason }) => {
                    return Err(BindError::Rejected {
                        device: device.to_string(),
                        code,
                        reason,
                    });
                }
                None => {
                    trace!(device, "ignoring unrelated reply during bind");
                    noise = Some("no bind result among replies".to_string());
                }
            }
        }

        Err(match noise {
            None => BindError::Timeout {
                device: device.to_string(),
            },
            Some(reason) => unresponsive(reason),
        })
    }

    fn fail(&mut self, err: BindError) -> BindError {
        self.state = match err {
            BindError::Timeout { .. } => BindState::TimedOut,
            BindError::Unresponsive { .. } => BindState::Unresponsive,
            BindError::Rejected { .. } => BindState::Rejected,
            BindError::Spent => self.state,
        };
        warn!(device = %self.descriptor.id, error = %err, "bind failed");
        err
    }
}

/// Runs a fresh handshake with default settings.
pub async fn bind(descriptor: &DeviceDescriptor, generic_key: &Key) -> Result<SessionKey, BindError> {
    Handshake::new(descriptor.clone(), *generic_key).run().await
}
