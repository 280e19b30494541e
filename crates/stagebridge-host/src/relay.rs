/// OSC relay engine: the handler behind the OSC listener.
///
/// Per inbound message:
///   RECEIVED → DEDUP_CHECK → DROPPED_DUPLICATE
///                          → MAPPED_DISPATCH   (MIDI action, or OSC action re-emitted locally)
///                          → UNMAPPED_RELAY    (peers via discovery, or a broadcast address)
///
/// Loop prevention relies on the dedup cache twice: inbound messages are
/// keyed by sender, forwarded copies by destination. Peers never receive a
/// message back from us if they sent it, and we never address ourselves.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use rosc::{OscMessage, OscPacket};
use tracing::{debug, info, warn};

use stagebridge_protocol::config::RelayMode;
use stagebridge_protocol::error::BridgeError;
use stagebridge_protocol::mapping::{Action, MappingType, OscStep};

use crate::context::BridgeContext;
use crate::dedup::Fingerprint;
use crate::netif::{loops_back_to_self, LocalAddresses};

/// Where relayed and re-emitted datagrams are written.
pub trait DatagramSink: Send + Sync {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> std::io::Result<usize>;
}

impl DatagramSink for std::net::UdpSocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> std::io::Result<usize> {
        std::net::UdpSocket::send_to(self, buf, target)
    }
}

/// Create the outbound relay socket (broadcast enabled for broadcast mode).
pub fn create_relay_socket() -> std::io::Result<std::net::UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    DroppedDuplicate,
    MappedDispatch(MappingType),
    UnmappedRelay { sent: usize },
}

pub struct RelayEngine {
    ctx: Arc<BridgeContext>,
    sink: Arc<dyn DatagramSink>,
    local: Arc<dyn LocalAddresses>,
}

impl RelayEngine {
    pub fn new(
        ctx: Arc<BridgeContext>,
        sink: Arc<dyn DatagramSink>,
        local: Arc<dyn LocalAddresses>,
    ) -> Self {
        Self { ctx, sink, local }
    }

    pub async fn handle(&self, msg: &OscMessage, sender: IpAddr) -> Outcome {
        let fingerprint = Fingerprint::new(sender, &msg.addr, &msg.args);

        if self.ctx.dedup.check_and_mark(fingerprint.clone()) {
            debug!(addr = %msg.addr, from = %sender, "Dropping duplicate OSC message");
            return Outcome::DroppedDuplicate;
        }

        match self.ctx.mappings.find_by_address(&msg.addr).await {
            Some(mapping) => {
                let kind = mapping.mapping_type();
                match &mapping.action {
                    Action::Midi(steps) => {
                        info!(addr = %msg.addr, steps = steps.len(), "Found MIDI mapping");
                        match self.ctx.midi.send(&msg.addr, steps).await {
                            Ok(report) => debug!(
                                addr = %msg.addr,
                                sent = report.sent,
                                failed = report.failed,
                                "MIDI action complete"
                            ),
                            Err(e) => debug!(addr = %msg.addr, error = %e, "MIDI action not run"),
                        }
                    }
                    Action::Osc(steps) => {
                        info!(addr = %msg.addr, steps = steps.len(), "Found OSC mapping");
                        self.emit_local(steps).await;
                    }
                }
                Outcome::MappedDispatch(kind)
            }
            None => {
                let sent = self.relay_unmapped(msg, sender, &fingerprint).await;
                Outcome::UnmappedRelay { sent }
            }
        }
    }

    /// Re-emit each step of an OSC action to our own listener, paced.
    async fn emit_local(&self, steps: &[OscStep]) {
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.ctx.osc_listen_port);

        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.ctx.step_delay).await;
            }
            let msg = step.to_message();
            debug!(addr = %msg.addr, args = ?msg.args, "Sending local OSC");
            if let Err(e) = self.send(&msg, target) {
                warn!(addr = %msg.addr, error = %e, "Local OSC send failed");
            }
        }
    }

    async fn relay_unmapped(&self, msg: &OscMessage, sender: IpAddr, fingerprint: &Fingerprint) -> usize {
        let (mode, broadcast_target, fallback_port) = {
            let config = self.ctx.config.read().await;
            (config.relay_mode(), config.broadcast_target(), self.ctx.osc_listen_port)
        };

        match mode {
            RelayMode::PeerDiscovery => {
                self.relay_to_peers(msg, sender, fingerprint, fallback_port).await
            }
            RelayMode::Broadcast => self.relay_to_broadcast(msg, broadcast_target),
            RelayMode::Disabled(other) => {
                info!(addr = %msg.addr, mode = %other, "No mapping and relay disabled, dropping");
                0
            }
        }
    }

    async fn relay_to_peers(
        &self,
        msg: &OscMessage,
        sender: IpAddr,
        fingerprint: &Fingerprint,
        fallback_port: u16,
    ) -> usize {
        let peers = self.ctx.registry.snapshot().await;
        if peers.is_empty() {
            debug!(addr = %msg.addr, "No mapping and no discovered devices to relay to");
            return 0;
        }

        let local = self.local.addresses();
        let mut sent = 0;

        for peer in &peers {
            if local.contains(&peer.ip) {
                debug!(device = %peer.name, ip = %peer.ip, "Skipping local device");
                continue;
            }
            if peer.ip == sender {
                debug!(device = %peer.name, ip = %peer.ip, "Skipping original sender");
                continue;
            }
            if self.ctx.dedup.check_and_mark(fingerprint.with_ip(peer.ip)) {
                debug!(device = %peer.name, addr = %msg.addr, "Already relayed to device");
                continue;
            }

            let target = SocketAddr::new(peer.ip, peer.osc_port.unwrap_or(fallback_port));
            match self.send(msg, target) {
                Ok(()) => {
                    debug!(device = %peer.name, target = %target, addr = %msg.addr, "Relayed");
                    sent += 1;
                }
                Err(e) => warn!(device = %peer.name, error = %e, "Relay to device failed"),
            }
        }

        info!(addr = %msg.addr, relayed = sent, known = peers.len(), "Relayed unmapped OSC message");
        sent
    }

    fn relay_to_broadcast(&self, msg: &OscMessage, target: Option<SocketAddr>) -> usize {
        let Some(target) = target else {
            warn!(addr = %msg.addr, "Broadcast relay target not configured or invalid, dropping");
            return 0;
        };

        if loops_back_to_self(target.ip(), &self.local.addresses()) {
            info!(
                addr = %msg.addr,
                target = %target,
                "Skipping broadcast: target would include this machine"
            );
            return 0;
        }

        match self.send(msg, target) {
            Ok(()) => {
                info!(addr = %msg.addr, target = %target, "Relayed unmapped OSC message to broadcast");
                1
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Broadcast relay failed (broadcast may be blocked)");
                0
            }
        }
    }

    fn send(&self, msg: &OscMessage, target: SocketAddr) -> Result<(), BridgeError> {
        let bytes = rosc::encoder::encode(&OscPacket::Message(msg.clone()))
            .map_err(|e| BridgeError::NetworkUnreachable {
                target: target.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{:?}", e)),
            })?;
        self.sink
            .send_to(&bytes, target)
            .map(|_| ())
            .map_err(|source| BridgeError::NetworkUnreachable {
                target: target.to_string(),
                source,
            })
    }
}
