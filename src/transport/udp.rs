//! UDP transport for DNS packets.
//!
//! The [`Listener`] owns the receive side of the socket: it decodes each
//! datagram and pushes it onto a bounded queue without ever blocking on it.
//! [`Worker`]s pull packets off the queue, ask the [`Resolver`] what to do,
//! and perform the sends. Since UDP is stateless, upstream answers come back
//! on the same socket and are routed by their transaction ID.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, trace, warn};

use crate::dns::decode;
use crate::resolver::{Disposition, QueryAction, Resolver};
use crate::stats::Stats;

use super::{MAX_PACKET_SIZE, Packet, send_with_retry};

/// Receiving half of the work queue, shared by all workers.
pub type SharedQueue = Arc<Mutex<mpsc::Receiver<Packet>>>;

/// Receives datagrams and feeds decoded packets to the work queue.
pub struct Listener {
    socket: Arc<UdpSocket>,
    queue: mpsc::Sender<Packet>,
    stats: Arc<Stats>,
}

impl Listener {
    pub fn new(socket: Arc<UdpSocket>, queue: mpsc::Sender<Packet>, stats: Arc<Stats>) -> Self {
        Self {
            socket,
            queue,
            stats,
        }
    }

    /// Receive loop. Bad packets and a full queue are logged and skipped;
    /// only closing the queue ends the loop.
    pub async fn run(self) {
        // One spare byte to tell an oversize datagram from a full one.
        let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];
        debug!("listening...");

        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("UDP recv error: {}", e);
                    continue;
                }
            };

            if let Some(packet) = self.accept(&buf[..len], src) {
                if !self.enqueue(packet) {
                    return;
                }
            }
        }
    }

    fn accept(&self, datagram: &[u8], src: SocketAddr) -> Option<Packet> {
        if datagram.is_empty() {
            warn!(%src, "received empty datagram");
            return None;
        }
        if datagram.len() > MAX_PACKET_SIZE {
            warn!(%src, "dropping oversize datagram");
            self.stats.record_dropped();
            return None;
        }
        trace!(%src, len = datagram.len(), "received packet");

        match decode(datagram) {
            Ok(message) => Some(Packet::new(message, src)),
            Err(e) => {
                debug!(%src, "dropping malformed packet: {}", e);
                self.stats.record_dropped();
                None
            }
        }
    }

    /// Returns false once the workers are gone.
    fn enqueue(&self, packet: Packet) -> bool {
        match self.queue.try_send(packet) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(packet)) => {
                warn!(id = packet.message.id(), src = %packet.src, "queue full, could not add packet");
                self.stats.record_dropped();
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("work queue closed, listener stopping");
                false
            }
        }
    }
}

/// Classifies queued packets and sends the results.
#[derive(Clone)]
pub struct Worker {
    socket: Arc<UdpSocket>,
    resolver: Arc<Resolver>,
    stats: Arc<Stats>,
}

impl Worker {
    pub fn new(socket: Arc<UdpSocket>, resolver: Arc<Resolver>, stats: Arc<Stats>) -> Self {
        Self {
            socket,
            resolver,
            stats,
        }
    }

    /// Pull packets off the shared queue until it closes.
    pub async fn run(self, queue: SharedQueue) {
        loop {
            let packet = queue.lock().await.recv().await;
            let Some(packet) = packet else {
                debug!("work queue closed, worker stopping");
                return;
            };
            self.handle(packet).await;
        }
    }

    /// Classify one packet and perform the resulting send.
    ///
    /// Classification reads the blacklist file and may wait on the
    /// correlation table lock, so it runs on the blocking pool.
    pub async fn handle(&self, packet: Packet) {
        let resolver = Arc::clone(&self.resolver);
        let action = match tokio::task::spawn_blocking(move || resolver.process(packet)).await {
            Ok(action) => action,
            Err(e) => {
                error!("classification task failed: {}", e);
                self.stats.record_dropped();
                return;
            }
        };

        match action {
            QueryAction::Relay {
                response,
                client,
                latency,
            } => {
                if self.send(&response, client, "answer").await.is_ok() {
                    self.stats.record_relayed(latency);
                }
            }
            QueryAction::Answer {
                response,
                client,
                disposition,
                ..
            } => {
                if self.send(&response, client, "local answer").await.is_ok() {
                    match disposition {
                        Disposition::Captured => self.stats.record_captured(),
                        Disposition::Blocked => self.stats.record_blocked(),
                    }
                }
            }
            QueryAction::Forward {
                query, upstream, ..
            } => {
                if self.send(&query, upstream, "query").await.is_ok() {
                    self.stats.record_forwarded();
                }
            }
            QueryAction::Drop(reason) => {
                trace!(?reason, "packet dropped");
                self.stats.record_dropped();
            }
        }
    }

    async fn send(&self, data: &[u8], target: SocketAddr, what: &str) -> io::Result<()> {
        match send_with_retry(&self.socket, data, target).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(%target, "failed to send {}: {}", what, e);
                self.stats.record_dropped();
                Err(e)
            }
        }
    }
}
