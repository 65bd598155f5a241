//! UDP broadcast discovery.
//!
//! A scan sends `{"t":"scan"}` to each target and listens on the same socket for
//! `dev` announcements sealed with the generic key, until the scan timeout elapses.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::Stream;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, trace, warn};

use crate::codec::{Envelope, GENERIC_KEY, Key, decode};
use crate::error::{Result, TransportError};
use crate::protocol::{SCAN_PROBE, parse_device_info};
use crate::transport::{MAX_DATAGRAM, broadcast_socket};
use crate::types::DeviceDescriptor;

pub const DISCOVERY_PORT: u16 = 7000;

/// Used when a scan is given no targets.
pub const LIMITED_BROADCAST: IpAddr = IpAddr::V4(Ipv4Addr::BROADCAST);

pub struct DiscoveryBuilder {
    port: u16,
    generic_key: Key,
    allow_loopback: bool,
}

impl DiscoveryBuilder {
    pub fn new() -> Self {
        Self {
            port: DISCOVERY_PORT,
            generic_key: GENERIC_KEY,
            allow_loopback: false,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn generic_key(mut self, key: Key) -> Self {
        self.generic_key = key;
        self
    }

    /// Accept announcements from loopback sources even when no loopback target was probed.
    pub fn allow_loopback(mut self, allow: bool) -> Self {
        self.allow_loopback = allow;
        self
    }

    pub fn build(self) -> Discovery {
        Discovery {
            port: self.port,
            generic_key: self.generic_key,
            allow_loopback: self.allow_loopback,
        }
    }
}

impl Default for DiscoveryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Discovery {
    port: u16,
    generic_key: Key,
    allow_loopback: bool,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery {
    pub fn new() -> Self {
        DiscoveryBuilder::new().build()
    }

    pub fn builder() -> DiscoveryBuilder {
        DiscoveryBuilder::new()
    }

    /// Probes each broadcast address on the discovery port.
    pub async fn scan(&self, targets: &[IpAddr], timeout: Duration) -> Result<Scan> {
        let targets: Vec<SocketAddr> = if targets.is_empty() {
            vec![SocketAddr::new(LIMITED_BROADCAST, self.port)]
        } else {
            targets.iter().map(|ip| SocketAddr::new(*ip, self.port)).collect()
        };
        self.scan_endpoints(&targets, timeout).await
    }

    /// Probes explicit `ip:port` endpoints.
    pub async fn scan_endpoints(&self, targets: &[SocketAddr], timeout: Duration) -> Result<Scan> {
        let deadline = Instant::now() + timeout;
        let socket = broadcast_socket()?;
        info!(targets = targets.len(), ?timeout, "scanning for devices");

        let mut sent = 0;
        for target in targets {
            match socket.send_to(SCAN_PROBE, target).await {
                Ok(_) => {
                    debug!(%target, "scan request sent");
                    sent += 1;
                }
                Err(e) => warn!(%target, error = %e, "failed to send probe"),
            }
        }
        if sent == 0 {
            return Err(TransportError::NoTargets.into());
        }

        Ok(Scan {
            socket: Some(socket),
            deadline,
            generic_key: self.generic_key,
            accept_loopback: self.allow_loopback || targets.iter().any(|t| t.ip().is_loopback()),
            seen: HashSet::new(),
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }
}

/// One in-flight scan. Yields each device once, in arrival order, and ends when
/// the scan timeout elapses; the socket is closed at that point.
pub struct Scan {
    socket: Option<UdpSocket>,
    deadline: Instant,
    generic_key: Key,
    accept_loopback: bool,
    seen: HashSet<String>,
    buf: Vec<u8>,
}

impl Scan {
    pub async fn next(&mut self) -> Result<Option<DeviceDescriptor>> {
        loop {
            let received = {
                let Some(socket) = self.socket.as_ref() else {
                    return Ok(None);
                };
                timeout_at(self.deadline, socket.recv_from(&mut self.buf)).await
            };

            let (len, addr) = match received {
                Err(_) => {
                    self.finish();
                    return Ok(None);
                }
                Ok(Err(e)) => {
                    self.finish();
                    return Err(e.into());
                }
                Ok(Ok(received)) => received,
            };

            if len == 0 || (addr.ip().is_loopback() && !self.accept_loopback) {
                continue;
            }

            let descriptor = match announcement(&self.buf[..len], addr, &self.generic_key) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    trace!(%addr, error = %e, "ignoring undecodable datagram");
                    continue;
                }
            };

            if !self.seen.insert(descriptor.id.clone()) {
                trace!(%addr, device = %descriptor.id, "duplicate announcement");
                continue;
            }
            debug!(device = %descriptor, "found device");
            return Ok(Some(descriptor));
        }
    }

    /// Waits out the full scan and returns every unique device.
    pub async fn collect(mut self) -> Result<Vec<DeviceDescriptor>> {
        let mut devices = Vec::new();
        while let Some(device) = self.next().await? {
            devices.push(device);
        }
        Ok(devices)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<DeviceDescriptor>> {
        futures::stream::unfold(self, |mut scan| async move {
            match scan.next().await {
                Ok(Some(device)) => Some((Ok(device), scan)),
                Ok(None) => None,
                Err(e) => Some((Err(e), scan)),
            }
        })
    }

    fn finish(&mut self) {
        if self.socket.take().is_some() {
            info!(found = self.seen.len(), "scan finished");
        }
    }
}

fn announcement(datagram: &[u8], addr: SocketAddr, key: &Key) -> Result<DeviceDescriptor> {
    let envelope = Envelope::from_slice(datagram)?;
    let pack = decode(key, &envelope)?;
    Ok(parse_device_info(addr, &pack)?)
}
