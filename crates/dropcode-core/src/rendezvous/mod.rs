//! Peer ID rendezvous over UDP.
//!
//! The TCP transport needs an address for a 4-character peer ID. Instead of a
//! directory server, the dialing side asks the local network:
//!
//! 1. Dialer broadcasts a `lookup` packet naming the peer ID on the
//!    discovery port (52525 UDP), and also sends it to loopback so two
//!    sessions on one machine can find each other
//! 2. The endpoint owning that ID answers with a unicast `announce` packet
//!    carrying its TCP transfer port
//! 3. The dialer connects to the announcing address
//!
//! No answer before the timeout means the peer is unavailable.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::code::PeerId;
use crate::error::{Error, Result};

/// Default discovery port (UDP)
pub const DEFAULT_DISCOVERY_PORT: u16 = 52525;

/// Protocol identifier carried in every packet
pub const PROTOCOL_NAME: &str = "dropcode";

/// Rendezvous packet version
pub const PACKET_VERSION: &str = "1.0";

/// How often an unanswered lookup is repeated.
const LOOKUP_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Kind of rendezvous packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    /// "Who holds this peer ID?"
    Lookup,
    /// "I do, connect to this port."
    Announce,
}

/// A rendezvous datagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendezvousPacket {
    /// Protocol identifier
    pub protocol: String,
    /// Packet version
    pub version: String,
    /// Packet kind
    pub kind: PacketKind,
    /// Peer ID being looked up or announced
    pub peer_id: PeerId,
    /// TCP port of the announcing endpoint
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transfer_port: Option<u16>,
}

impl RendezvousPacket {
    /// Create a lookup packet.
    #[must_use]
    pub fn lookup(peer_id: PeerId) -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PACKET_VERSION.to_string(),
            kind: PacketKind::Lookup,
            peer_id,
            transfer_port: None,
        }
    }

    /// Create an announce packet.
    #[must_use]
    pub fn announce(peer_id: PeerId, transfer_port: u16) -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PACKET_VERSION.to_string(),
            kind: PacketKind::Announce,
            peer_id,
            transfer_port: Some(transfer_port),
        }
    }

    /// Check if this is a packet we understand.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.protocol == PROTOCOL_NAME && self.version == PACKET_VERSION
    }

    /// Parse a datagram, returning `None` for anything foreign.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(data)
            .ok()
            .filter(Self::is_valid)
    }
}

fn bind_udp(port: u16, broadcast: bool) -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_reuse_address(true)?;
    if broadcast {
        socket.set_broadcast(true)?;
    }

    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into())?;

    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Answers lookups for one local peer ID until cancelled.
#[derive(Debug)]
pub struct RendezvousResponder {
    local_port: u16,
    shutdown: CancellationToken,
}

impl RendezvousResponder {
    /// Start answering lookups for `peer_id` on `discovery_port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the UDP socket cannot be bound.
    pub fn start(
        peer_id: PeerId,
        discovery_port: u16,
        transfer_port: u16,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let socket = Arc::new(bind_udp(discovery_port, false)?);
        let local_port = socket.local_addr()?.port();

        let token = shutdown.clone();
        tokio::spawn(async move {
            let announce = match serde_json::to_vec(&RendezvousPacket::announce(
                peer_id.clone(),
                transfer_port,
            )) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Failed to serialize announce packet: {}", e);
                    return;
                }
            };

            let mut buf = [0u8; 1024];
            loop {
                let (len, source) = tokio::select! {
                    () = token.cancelled() => break,
                    received = socket.recv_from(&mut buf) => match received {
                        Ok(received) => received,
                        Err(e) => {
                            tracing::warn!("Rendezvous receive failed: {}", e);
                            continue;
                        }
                    },
                };

                let Some(packet) = RendezvousPacket::parse(&buf[..len]) else {
                    continue;
                };

                if packet.kind == PacketKind::Lookup && packet.peer_id == peer_id {
                    tracing::debug!(from = %source, "Answering lookup for {}", peer_id);
                    if let Err(e) = socket.send_to(&announce, source).await {
                        tracing::warn!("Failed to answer lookup from {}: {}", source, e);
                    }
                }
            }

            tracing::debug!("Rendezvous responder for {} stopped", peer_id);
        });

        Ok(Self {
            local_port,
            shutdown,
        })
    }

    /// UDP port the responder listens on.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stop answering lookups.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

/// Resolve `peer_id` to a TCP address by asking the local network.
///
/// The address is the announce's source IP with the advertised port, so the
/// answering peer must listen on the interface it answered from.
///
/// # Errors
///
/// Returns [`Error::PeerUnavailable`] if nobody answers within `timeout`.
pub async fn lookup(peer_id: &PeerId, discovery_port: u16, timeout: Duration) -> Result<SocketAddr> {
    let socket = bind_udp(0, true)?;
    let request = serde_json::to_vec(&RendezvousPacket::lookup(peer_id.clone()))
        .map_err(|e| Error::Serialization(e.to_string()))?;

    let targets = [
        SocketAddrV4::new(Ipv4Addr::BROADCAST, discovery_port),
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, discovery_port),
    ];

    let search = async {
        let mut buf = [0u8; 1024];
        loop {
            for target in targets {
                if let Err(e) = socket.send_to(&request, target).await {
                    tracing::debug!("Lookup to {} failed: {}", target, e);
                }
            }

            let deadline = tokio::time::sleep(LOOKUP_RETRY_INTERVAL);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    () = &mut deadline => break,
                    received = socket.recv_from(&mut buf) => {
                        let Ok((len, source)) = received else { continue };
                        let Some(packet) = RendezvousPacket::parse(&buf[..len]) else {
                            continue;
                        };
                        if packet.kind != PacketKind::Announce || &packet.peer_id != peer_id {
                            continue;
                        }
                        if let Some(port) = packet.transfer_port {
                            return SocketAddr::new(source.ip(), port);
                        }
                    }
                }
            }
        }
    };

    tokio::time::timeout(timeout, search)
        .await
        .map_err(|_| Error::PeerUnavailable(peer_id.to_string()))
}
