//! Transport layer for the resolver.
//!
//! A single UDP socket bound to the DNS port carries everything: client
//! queries in, queries out to the upstream server, upstream answers back in,
//! and answers out to clients. [`udp`] holds the listener and the workers.

pub mod udp;

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::debug;

use crate::dns::Message;

pub use crate::dns::MAX_PACKET_SIZE;

/// Retries after a transient send failure.
pub const SEND_RETRIES: usize = 3;

/// Pause between send retries.
pub const RETRY_DELAY: Duration = Duration::from_millis(25);

/// A decoded datagram on its way from the listener to a worker.
#[derive(Debug)]
pub struct Packet {
    pub message: Message,
    pub src: SocketAddr,
    pub received_at: Instant,
}

impl Packet {
    pub fn new(message: Message, src: SocketAddr) -> Self {
        Self {
            message,
            src,
            received_at: Instant::now(),
        }
    }
}

/// Errors worth retrying: the stack is briefly out of buffers.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::OutOfMemory | io::ErrorKind::WouldBlock
    )
}

/// Send a datagram, retrying a few times on transient resource exhaustion.
pub async fn send_with_retry(
    socket: &UdpSocket,
    data: &[u8],
    target: SocketAddr,
) -> io::Result<usize> {
    retry_send(target, || socket.send_to(data, target)).await
}

async fn retry_send<F, Fut>(target: SocketAddr, mut send: F) -> io::Result<usize>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<usize>>,
{
    let mut attempt = 0;
    loop {
        match send().await {
            Ok(n) => return Ok(n),
            Err(e) if is_transient(&e) && attempt < SEND_RETRIES => {
                attempt += 1;
                debug!(%target, attempt, "transient send failure: {}", e);
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}
