//! TCP transport: framing codec, listener and per-connection tasks
//!
//! Every connection runs two tasks: a reader that decodes frames and feeds
//! them to the node's dispatch loop, and a writer that drains the peer's
//! outgoing queue. Teardown always passes through a bounded draining phase
//! so queued replies get a chance to flush before the socket closes.

use crate::network::message::{Message, NetworkAddress, MAGIC, MAX_MESSAGE_SIZE};
use crate::network::peer::{PeerError, PeerHandle, PeerManager};
use bytes::{Buf, BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Outbound TCP connect deadline
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a closing connection may spend flushing queued writes
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Outgoing queue depth per connection
const SEND_QUEUE_DEPTH: usize = 100;

/// Events a connection task reports to the node's dispatch loop
#[derive(Debug)]
pub(crate) enum NetEvent {
    Message { from: SocketAddr, message: Message },
    Disconnected { from: SocketAddr },
}

// =============================================================================
// Codec
// =============================================================================

/// Length-prefixed message framing: magic (4) + length (4, big endian) +
/// bincode payload
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item
            .to_bytes()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        if data.len() > MAX_MESSAGE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Outgoing message exceeds size limit",
            ));
        }

        dst.reserve(8 + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 8 {
            return Ok(None);
        }

        if src[..4] != MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid magic bytes",
            ));
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Oversized message",
            ));
        }

        if src.len() < 8 + len {
            src.reserve(8 + len - src.len());
            return Ok(None);
        }

        src.advance(8);
        let data = src.split_to(len);

        let msg = Message::from_bytes(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        Ok(Some(msg))
    }
}

// =============================================================================
// Listener and dialing
// =============================================================================

/// TCP server for accepting peer connections
pub struct Listener {
    listener: TcpListener,
    port: u16,
}

impl Listener {
    /// Bind to a port and create the listener
    pub async fn bind(port: u16) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;
        log::info!("Listening on {}", addr);

        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), std::io::Error> {
        self.listener.accept().await
    }
}

/// Dial a peer with a bounded connect timeout
pub async fn connect_to_peer(addr: SocketAddr) -> Result<TcpStream, PeerError> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| PeerError::ConnectionFailed(format!("{}: connect timed out", addr)))?
        .map_err(|e| PeerError::ConnectionFailed(format!("{}: {}", addr, e)))?;
    Ok(stream)
}

// =============================================================================
// Connection task
// =============================================================================

/// Drive one peer connection until it closes
///
/// Registers the peer, optionally sends an opening message (the handshake
/// request on outbound connections), then pumps frames in both directions.
/// All protocol interpretation happens in the node's dispatch loop; this
/// task only moves messages and reports the eventual teardown.
pub(crate) async fn run_connection(
    stream: TcpStream,
    addr: SocketAddr,
    outbound: bool,
    listed_address: Option<NetworkAddress>,
    peer_manager: Arc<PeerManager>,
    events_tx: mpsc::Sender<NetEvent>,
    greeting: Option<Message>,
    mut shutdown: watch::Receiver<bool>,
) {
    let framed = Framed::new(stream, MessageCodec);
    let (mut writer, mut reader) = framed.split();

    let (tx, mut rx) = mpsc::channel::<Message>(SEND_QUEUE_DEPTH);
    let close = Arc::new(Notify::new());
    let handle = PeerHandle {
        addr,
        tx,
        close: close.clone(),
    };

    if let Err(e) = peer_manager
        .add_peer(addr, handle, outbound, listed_address)
        .await
    {
        log::debug!("Rejecting connection from {}: {}", addr, e);
        return;
    }

    if let Some(msg) = greeting {
        if let Err(e) = writer.send(msg).await {
            log::warn!("Failed to greet {}: {}", addr, e);
            let _ = events_tx.send(NetEvent::Disconnected { from: addr }).await;
            return;
        }
    }

    // Writer task: drains the queue, then flushes on close (draining state)
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if writer.send(msg).await.is_err() {
                return;
            }
        }
        let _ = writer.close().await;
    });

    // Reader loop
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    log::debug!("Connection {} unwinding for shutdown", addr);
                    break;
                }
            }
            _ = close.notified() => {
                log::debug!("Connection {} closed by request", addr);
                break;
            }
            next = reader.next() => {
                match next {
                    Some(Ok(message)) => {
                        if events_tx
                            .send(NetEvent::Message { from: addr, message })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("Error reading from {}: {}", addr, e);
                        break;
                    }
                    None => {
                        log::info!("Peer {} disconnected", addr);
                        break;
                    }
                }
            }
        }
    }

    // Draining: drop the handle so the writer flushes and exits, bounded
    peer_manager.begin_drain(&addr).await;
    if tokio::time::timeout(DRAIN_TIMEOUT, write_handle).await.is_err() {
        log::debug!("Drain timed out for {}", addr);
    }

    // The dispatch loop removes the peer and settles reputation
    let _ = events_tx.send(NetEvent::Disconnected { from: addr }).await;
}
