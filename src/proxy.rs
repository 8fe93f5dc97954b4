//! Server lifecycle.
//!
//! Binds the DNS socket, wires the listener and workers together around a
//! bounded queue, and runs them. Binding is the only fatal step; once the
//! tasks are started the server runs indefinitely.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::correlation::{CorrelationTable, DEFAULT_CAPACITY};
use crate::error::{Error, Result};
use crate::filter::Blacklist;
use crate::querylog::QueryLog;
use crate::resolver::Resolver;
use crate::settings::{Key, Settings, upstream_addr};
use crate::stats::Stats;
use crate::transport::udp::{Listener, Worker};

/// Default depth of the work queue between listener and workers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Configuration for the DNS server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local address to bind (e.g., 0.0.0.0:53)
    pub bind_addr: SocketAddr,
    /// Number of classifier workers
    pub workers: usize,
    /// Packets waiting for a worker before new ones are dropped
    pub queue_capacity: usize,
    /// In-flight forwarded queries remembered
    pub correlation_capacity: usize,
    /// How often statistics are logged; `None` disables it
    pub stats_interval: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], crate::dns::DNS_PORT)),
            workers: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            correlation_capacity: DEFAULT_CAPACITY,
            stats_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl ProxyConfig {
    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be greater than 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be greater than 0".into()));
        }
        if self.correlation_capacity == 0 {
            return Err(Error::Config(
                "correlation_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// The external collaborators the resolver consults.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn Settings>,
    pub blacklist: Arc<dyn Blacklist>,
    pub query_log: Arc<dyn QueryLog>,
}

/// A bound, not yet running server.
pub struct Server {
    config: ProxyConfig,
    socket: Arc<UdpSocket>,
    resolver: Arc<Resolver>,
    stats: Arc<Stats>,
}

impl Server {
    /// Validate the configuration and bind the DNS socket.
    pub async fn bind(config: ProxyConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        let pending = Arc::new(CorrelationTable::new(config.correlation_capacity));
        let resolver = Arc::new(Resolver::new(
            collaborators.settings,
            collaborators.blacklist,
            collaborators.query_log,
            pending,
        ));

        Ok(Self {
            config,
            socket,
            resolver,
            stats: Arc::new(Stats::new()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Spawn the listener, the workers and the stats reporter.
    pub fn start(self) -> ServerHandle {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let queue = Arc::new(Mutex::new(rx));
        let mut tasks = Vec::with_capacity(self.config.workers + 2);

        let listener = Listener::new(Arc::clone(&self.socket), tx, Arc::clone(&self.stats));
        tasks.push(tokio::spawn(listener.run()));

        let worker = Worker::new(
            Arc::clone(&self.socket),
            Arc::clone(&self.resolver),
            Arc::clone(&self.stats),
        );
        for _ in 0..self.config.workers {
            tasks.push(tokio::spawn(worker.clone().run(Arc::clone(&queue))));
        }

        if let Some(interval) = self.config.stats_interval {
            tasks.push(tokio::spawn(report_stats(
                Arc::clone(&self.stats),
                Arc::clone(&self.resolver),
                interval,
            )));
        }

        ServerHandle { tasks }
    }
}

/// Handle to a running server's tasks.
pub struct ServerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Wait for every task to finish, which in practice is never.
    pub async fn join(self) {
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!("server task ended abnormally: {}", e);
            }
        }
    }

    /// Stop all tasks.
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn report_stats(stats: Arc<Stats>, resolver: Arc<Resolver>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // Skip first immediate tick
    loop {
        ticker.tick().await;
        let snap = stats.snapshot_and_reset();
        info!(
            uptime = snap.uptime_secs,
            pending = resolver.pending().len(),
            forwarded = snap.forwarded,
            relayed = snap.relayed,
            captured = snap.captured,
            blocked = snap.blocked,
            dropped = snap.dropped,
            avg_relay_ms = snap.avg_relay_ms,
            "stats"
        );
    }
}

/// Run the DNS server with the given configuration.
///
/// Logs the effective settings, binds, and runs until the process exits.
/// Socket bind failures are returned to the caller.
pub async fn run(config: ProxyConfig, collaborators: Collaborators) -> Result<()> {
    let settings = Arc::clone(&collaborators.settings);
    let server = Server::bind(config, collaborators).await?;

    info!("DNS server listening on {}", server.local_addr()?);
    match upstream_addr(settings.as_ref()) {
        Ok(upstream) => info!("Upstream DNS: {}", upstream),
        Err(e) => warn!("Upstream DNS not configured: {}", e),
    }
    if let Ok(hostname) = settings.read_string(Key::Hostname) {
        info!("Device hostname: {}", hostname);
    }
    let blocking = settings.read_bool(Key::Block).unwrap_or(false);
    info!("Blocking {}", if blocking { "on" } else { "off" });

    server.start().join().await;

    Ok(())
}
