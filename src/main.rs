use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use esper_dns::filter::FileBlacklist;
use esper_dns::proxy::{self, Collaborators, ProxyConfig};
use esper_dns::querylog::MemoryQueryLog;
use esper_dns::settings::{Key, MemorySettings};

#[derive(Parser)]
#[command(name = "esper-dns")]
#[command(about = "Ad and tracker blocking DNS resolver", long_about = None)]
struct Args {
    /// Local port to listen on
    #[arg(short, long, default_value = "53")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Settings file (TOML: hostname, dns_server, ip, block)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Blacklist file, one glob pattern per line
    #[arg(long, default_value = "blacklist.txt")]
    blacklist: PathBuf,

    /// Upstream DNS server, overrides the settings file
    #[arg(short, long)]
    upstream: Option<String>,

    /// Device hostname to capture, overrides the settings file
    #[arg(long)]
    hostname: Option<String>,

    /// Device IP handed out for captured queries, overrides the settings file
    #[arg(long)]
    device_ip: Option<String>,

    /// Disable blacklist blocking
    #[arg(long)]
    no_block: bool,

    /// Number of classifier workers
    #[arg(short, long, default_value = "2")]
    workers: usize,

    /// Work queue depth before new packets are dropped
    #[arg(long, default_value_t = proxy::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// In-flight forwarded queries remembered
    #[arg(long, default_value_t = esper_dns::correlation::DEFAULT_CAPACITY)]
    correlation_capacity: usize,

    /// Enable verbose logging (domain, disposition, timing)
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_settings(args: &Args) -> Result<MemorySettings> {
    let settings = match &args.settings {
        Some(path) => MemorySettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => MemorySettings::new(),
    };

    if let Some(upstream) = &args.upstream {
        settings.write_string(Key::DnsServer, upstream.as_str());
    }
    if let Some(hostname) = &args.hostname {
        settings.write_string(Key::Hostname, hostname.as_str());
    }
    if let Some(ip) = &args.device_ip {
        settings.write_string(Key::Ip, ip.as_str());
    }
    if args.no_block {
        settings.write_bool(Key::Block, false);
    }
    Ok(settings)
}

async fn run(args: Args) -> Result<()> {
    let bind_addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .context("invalid bind address")?;

    let collaborators = Collaborators {
        settings: Arc::new(load_settings(&args)?),
        blacklist: Arc::new(FileBlacklist::new(&args.blacklist)),
        query_log: Arc::new(MemoryQueryLog::default()),
    };

    let config = ProxyConfig {
        bind_addr,
        workers: args.workers,
        queue_capacity: args.queue_capacity,
        correlation_capacity: args.correlation_capacity,
        ..ProxyConfig::default()
    };

    proxy::run(config, collaborators)
        .await
        .context("DNS server failed")
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(args))
}
