//! TCP transport for peers on the same network.
//!
//! Each endpoint listens on a TCP port and answers rendezvous lookups for its
//! peer ID. Dialing resolves the ID over UDP, connects, and exchanges a
//! `Hello`/`HelloAck` frame pair so both sides learn the ID the other side
//! advertises. After the handshake every [`TransferMessage`] travels as one
//! frame (see [`crate::protocol`]); a TCP stream keeps them in order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{Link, LinkHandle, Transport};
use crate::code::PeerId;
use crate::error::{Error, Result};
use crate::protocol::{self, ErrorPayload, HelloPayload, MessageType, TransferMessage};
use crate::rendezvous::{self, RendezvousResponder, DEFAULT_DISCOVERY_PORT};

/// How long either side waits for the other's handshake frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for a [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Address the transfer listener binds to
    pub listen_addr: SocketAddr,
    /// UDP port used for rendezvous lookups
    pub discovery_port: u16,
    /// How long to wait for a lookup answer and the TCP connect
    pub connect_timeout: Duration,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Configure TCP keep-alive on a socket.
///
/// Start probing after 10 seconds of idle time, then every 5 seconds.
fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let socket_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    stream.set_nodelay(true)?;
    Ok(())
}

/// A TCP endpoint registered under one local peer ID.
#[derive(Debug)]
pub struct TcpTransport {
    local: PeerId,
    local_addr: SocketAddr,
    config: TcpTransportConfig,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Link>>,
    responder: Option<RendezvousResponder>,
    shutdown: CancellationToken,
    writers: TaskTracker,
}

impl TcpTransport {
    /// Bind the transfer listener and start answering lookups for `local`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener or the UDP responder cannot be
    /// bound.
    pub async fn bind(local: PeerId, config: TcpTransportConfig) -> Result<Self> {
        let mut transport = Self::bind_without_rendezvous(local, config).await?;

        let responder = RendezvousResponder::start(
            transport.local.clone(),
            transport.config.discovery_port,
            transport.local_addr.port(),
            transport.shutdown.child_token(),
        )?;
        transport.responder = Some(responder);

        Ok(transport)
    }

    /// Bind the transfer listener only; peers must dial with
    /// [`TcpTransport::connect_addr`].
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn bind_without_rendezvous(local: PeerId, config: TcpTransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let writers = TaskTracker::new();

        let (incoming_tx, incoming_rx) = mpsc::channel(16);
        tokio::spawn(accept_loop(
            listener,
            local.clone(),
            incoming_tx,
            shutdown.clone(),
            writers.clone(),
        ));

        tracing::info!(peer_id = %local, addr = %local_addr, "TCP transport listening");

        Ok(Self {
            local,
            local_addr,
            config,
            incoming: tokio::sync::Mutex::new(incoming_rx),
            responder: None,
            shutdown,
            writers,
        })
    }

    /// Address the transfer listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Dial a known address, skipping rendezvous.
    ///
    /// The remote must advertise `target` in its handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerUnavailable`] if nothing listens at `addr` and
    /// [`Error::ConnectionFailed`] if the handshake fails.
    pub async fn connect_addr(&self, target: &PeerId, addr: SocketAddr) -> Result<Link> {
        let stream =
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    tracing::debug!("Nothing listening for {} at {}", target, addr);
                    return Err(Error::PeerUnavailable(target.to_string()));
                }
                Ok(Err(e)) => {
                    return Err(Error::ConnectionFailed {
                        peer: target.to_string(),
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(Error::ConnectionFailed {
                        peer: target.to_string(),
                        reason: format!("connect to {addr} timed out"),
                    })
                }
            };

        configure_tcp_keepalive(&stream)?;

        let (mut reader, mut writer) = stream.into_split();
        let remote = dial_handshake(&self.local, &mut reader, &mut writer)
            .await
            .map_err(|e| Error::ConnectionFailed {
                peer: target.to_string(),
                reason: e.to_string(),
            })?;

        if &remote != target {
            return Err(Error::ConnectionFailed {
                peer: target.to_string(),
                reason: format!("endpoint at {addr} identifies as {remote}"),
            });
        }

        tracing::info!(peer_id = %remote, addr = %addr, "Connected");
        Ok(spawn_link(
            remote,
            reader,
            writer,
            self.shutdown.child_token(),
            &self.writers,
        ))
    }

    /// Stop listening and close every link opened by this endpoint.
    pub fn shutdown(&self) {
        if let Some(responder) = &self.responder {
            responder.stop();
        }
        self.shutdown.cancel();
    }

    /// Shut down, letting every link write out the messages already queued
    /// on it first.
    pub async fn close(&self) {
        self.shutdown();
        self.writers.close();
        self.writers.wait().await;
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Transport for TcpTransport {
    fn local_id(&self) -> &PeerId {
        &self.local
    }

    async fn connect(&self, target: &PeerId) -> Result<Link> {
        if target == &self.local {
            return Err(Error::ConnectionFailed {
                peer: target.to_string(),
                reason: "cannot connect to yourself".to_string(),
            });
        }

        let addr =
            rendezvous::lookup(target, self.config.discovery_port, self.config.connect_timeout)
                .await?;
        tracing::debug!("Resolved {} to {}", target, addr);

        self.connect_addr(target, addr).await
    }

    async fn accept(&self) -> Option<Link> {
        self.incoming.lock().await.recv().await
    }
}

async fn accept_loop(
    listener: TcpListener,
    local: PeerId,
    incoming: mpsc::Sender<Link>,
    shutdown: CancellationToken,
    writers: TaskTracker,
) {
    loop {
        let (stream, peer_addr) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        tracing::debug!("Incoming connection from {}", peer_addr);

        let local = local.clone();
        let incoming = incoming.clone();
        let link_shutdown = shutdown.child_token();
        let writers = writers.clone();
        tokio::spawn(async move {
            if let Err(e) = configure_tcp_keepalive(&stream) {
                tracing::debug!("Keep-alive not enabled for {}: {}", peer_addr, e);
            }

            let (mut reader, mut writer) = stream.into_split();
            match accept_handshake(&local, &mut reader, &mut writer).await {
                Ok(remote) => {
                    tracing::info!(peer_id = %remote, addr = %peer_addr, "Incoming connection");
                    let link = spawn_link(remote, reader, writer, link_shutdown, &writers);
                    if incoming.send(link).await.is_err() {
                        tracing::debug!("Endpoint closed, dropping link from {}", peer_addr);
                    }
                }
                Err(e) => tracing::warn!("Handshake with {} failed: {}", peer_addr, e),
            }
        });
    }

    tracing::debug!("Accept loop for {} stopped", local);
}

async fn dial_handshake(
    local: &PeerId,
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
) -> Result<PeerId> {
    let hello = protocol::encode_payload(&HelloPayload::new(local.clone()))?;
    protocol::write_frame(writer, MessageType::Hello, &hello).await?;

    let (header, payload) = protocol::read_frame_with_timeout(reader, HANDSHAKE_TIMEOUT).await?;
    match header.message_type {
        MessageType::HelloAck => {}
        MessageType::Error => {
            let rejection: ErrorPayload = protocol::decode_payload(&payload)?;
            return Err(rejection.into());
        }
        other => {
            return Err(Error::UnexpectedMessage {
                expected: "HelloAck".to_string(),
                actual: format!("{other:?}"),
            })
        }
    }

    let ack: HelloPayload = protocol::decode_payload(&payload)?;
    Ok(ack.peer_id)
}

async fn accept_handshake(
    local: &PeerId,
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
) -> Result<PeerId> {
    let (header, payload) = protocol::read_frame_with_timeout(reader, HANDSHAKE_TIMEOUT).await?;
    if header.message_type != MessageType::Hello {
        return Err(Error::UnexpectedMessage {
            expected: "Hello".to_string(),
            actual: format!("{:?}", header.message_type),
        });
    }

    let hello: HelloPayload = protocol::decode_payload(&payload)?;
    if let Err(e) = check_hello(local, &hello) {
        let rejection = protocol::encode_payload(&ErrorPayload::from(&e))?;
        protocol::write_frame(writer, MessageType::Error, &rejection).await?;
        return Err(e);
    }

    let ack = protocol::encode_payload(&HelloPayload::new(local.clone()))?;
    protocol::write_frame(writer, MessageType::HelloAck, &ack).await?;

    Ok(hello.peer_id)
}

/// Refuse a dialer claiming our own ID or speaking another major version.
fn check_hello(local: &PeerId, hello: &HelloPayload) -> Result<()> {
    if &hello.peer_id == local {
        return Err(Error::IdentifierTaken(local.to_string()));
    }
    hello.check_version()
}

/// Spawn the reader and writer tasks of an established connection.
///
/// The link closes when either direction fails or `shutdown` fires; closing
/// drops the outbound queue so [`LinkHandle::is_closed`] turns true. The
/// writer empties its queue before it honors `shutdown`.
fn spawn_link(
    remote: PeerId,
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    shutdown: CancellationToken,
    writers: &TaskTracker,
) -> Link {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<TransferMessage>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<TransferMessage>();
    let remote_name = Arc::<str>::from(remote.as_str());

    let writer_shutdown = shutdown.clone();
    let writer_name = Arc::clone(&remote_name);
    writers.spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                message = out_rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                () = writer_shutdown.cancelled() => break,
            };

            if let Err(e) = protocol::write_message(&mut writer, &message).await {
                tracing::warn!("Send to {} failed: {}", writer_name, e);
                break;
            }
        }
        writer_shutdown.cancel();
        tracing::debug!("Writer for {} stopped", writer_name);
    });

    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                () = shutdown.cancelled() => break,
                frame = protocol::read_frame(&mut reader) => frame,
            };

            let (header, payload) = match frame {
                Ok(frame) => frame,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::debug!("{} closed the connection", remote_name);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Dropping link to {}: {}", remote_name, e);
                    break;
                }
            };

            if header.message_type == MessageType::Error {
                match protocol::decode_payload::<ErrorPayload>(&payload) {
                    Ok(error) => tracing::warn!(
                        "{} closed the link with {}: {}",
                        remote_name,
                        error.code,
                        error.message
                    ),
                    Err(e) => tracing::warn!("Dropping link to {}: {}", remote_name, e),
                }
                break;
            }

            let message = match protocol::decode_message(&header, payload) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Dropping link to {}: {}", remote_name, e);
                    break;
                }
            };

            if in_tx.send(message).is_err() {
                break;
            }
        }
        shutdown.cancel();
    });

    Link {
        handle: LinkHandle::new(remote, out_tx),
        inbound: in_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::parse(s).expect("valid id")
    }

    fn loopback_config() -> TcpTransportConfig {
        TcpTransportConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_loopback_link_exchanges_messages() {
        let alice = TcpTransport::bind_without_rendezvous(id("AAAA"), loopback_config())
            .await
            .expect("bind");
        let bob = TcpTransport::bind_without_rendezvous(id("BBBB"), loopback_config())
            .await
            .expect("bind");

        let mut outbound = alice
            .connect_addr(&id("BBBB"), bob.local_addr())
            .await
            .expect("connect");
        let mut inbound = bob.accept().await.expect("incoming");
        assert_eq!(inbound.remote(), &id("AAAA"));

        let messages = vec![
            TransferMessage::Start {
                file_name: "x.bin".to_string(),
                total_chunks: 1,
            },
            TransferMessage::Chunk {
                chunk: vec![7; 64_000],
                total_chunks: 1,
            },
            TransferMessage::End {
                file_name: "x.bin".to_string(),
            },
        ];
        for message in &messages {
            outbound.handle.send(message.clone()).expect("send");
        }
        for expected in &messages {
            assert_eq!(inbound.inbound.recv().await.as_ref(), Some(expected));
        }

        inbound
            .handle
            .send(TransferMessage::End {
                file_name: "back".to_string(),
            })
            .expect("send back");
        assert!(matches!(
            outbound.inbound.recv().await,
            Some(TransferMessage::End { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_identity_fails_connection() {
        let alice = TcpTransport::bind_without_rendezvous(id("AAAA"), loopback_config())
            .await
            .expect("bind");
        let bob = TcpTransport::bind_without_rendezvous(id("BBBB"), loopback_config())
            .await
            .expect("bind");

        let err = alice
            .connect_addr(&id("CCCC"), bob.local_addr())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        let alice = TcpTransport::bind_without_rendezvous(id("AAAA"), loopback_config())
            .await
            .expect("bind");

        let closed_addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            listener.local_addr().expect("addr")
        };

        let err = alice
            .connect_addr(&id("BBBB"), closed_addr)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PeerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_link_closes_when_remote_shuts_down() {
        let alice = TcpTransport::bind_without_rendezvous(id("AAAA"), loopback_config())
            .await
            .expect("bind");
        let bob = TcpTransport::bind_without_rendezvous(id("BBBB"), loopback_config())
            .await
            .expect("bind");

        let mut outbound = alice
            .connect_addr(&id("BBBB"), bob.local_addr())
            .await
            .expect("connect");
        let inbound = bob.accept().await.expect("incoming");

        bob.shutdown();
        drop(inbound);

        assert!(outbound.inbound.recv().await.is_none());
        tokio::time::timeout(Duration::from_secs(2), async {
            while !outbound.handle.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("link should close");
    }

    async fn send_hello(addr: SocketAddr, hello: &HelloPayload) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let payload = protocol::encode_payload(hello).expect("encode");
        protocol::write_frame(&mut stream, MessageType::Hello, &payload)
            .await
            .expect("write hello");
        stream
    }

    #[tokio::test]
    async fn test_dialer_with_same_id_is_rejected() {
        let alice = TcpTransport::bind_without_rendezvous(id("AAAA"), loopback_config())
            .await
            .expect("bind");
        let twin = TcpTransport::bind_without_rendezvous(id("AAAA"), loopback_config())
            .await
            .expect("bind");

        let err = twin
            .connect_addr(&id("AAAA"), alice.local_addr())
            .await
            .unwrap_err();
        match err {
            Error::ConnectionFailed { peer, reason } => {
                assert_eq!(peer, "AAAA");
                assert!(reason.contains("E005"), "reason: {reason}");
            }
            e => panic!("Expected ConnectionFailed, got: {e:?}"),
        }
    }

    #[tokio::test]
    async fn test_incompatible_hello_gets_error_frame() {
        let alice = TcpTransport::bind_without_rendezvous(id("AAAA"), loopback_config())
            .await
            .expect("bind");

        let mut hello = HelloPayload::new(id("BBBB"));
        hello.protocol_version = "2.0".to_string();
        let mut stream = send_hello(alice.local_addr(), &hello).await;

        let (header, payload) = protocol::read_frame_with_timeout(&mut stream, Duration::from_secs(2))
            .await
            .expect("read reply");
        assert_eq!(header.message_type, MessageType::Error);
        let rejection: ErrorPayload = protocol::decode_payload(&payload).expect("decode");
        assert_eq!(rejection.code, "E006");
    }

    #[tokio::test]
    async fn test_error_frame_closes_link() {
        let alice = TcpTransport::bind_without_rendezvous(id("AAAA"), loopback_config())
            .await
            .expect("bind");

        let mut stream = send_hello(alice.local_addr(), &HelloPayload::new(id("BBBB"))).await;
        let (header, _) = protocol::read_frame_with_timeout(&mut stream, Duration::from_secs(2))
            .await
            .expect("read ack");
        assert_eq!(header.message_type, MessageType::HelloAck);

        let mut inbound = alice.accept().await.expect("incoming");
        assert_eq!(inbound.remote(), &id("BBBB"));

        let error = ErrorPayload {
            code: "E000".to_string(),
            message: "going away".to_string(),
        };
        protocol::write_frame(
            &mut stream,
            MessageType::Error,
            &protocol::encode_payload(&error).expect("encode"),
        )
        .await
        .expect("write error");

        let next = tokio::time::timeout(Duration::from_secs(2), inbound.inbound.recv())
            .await
            .expect("link should close");
        assert!(next.is_none());
    }
}
