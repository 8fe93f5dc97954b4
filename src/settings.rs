//! Device settings consumed by the resolver.
//!
//! The resolver reads its settings on demand through the [`Settings`] trait
//! and never caches them, so edits made elsewhere (an admin UI, a test)
//! apply to the very next query. [`MemorySettings`] is the in-process store
//! used by the binary, optionally seeded from a TOML file.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::debug;

use crate::dns::DNS_PORT;
use crate::error::SettingsError;

/// Settings the resolver knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Device hostname; queries for it are captured.
    Hostname,
    /// Upstream DNS server, `ip` or `ip:port`.
    DnsServer,
    /// The device's own address, handed out for captured queries.
    Ip,
    /// Whether blacklist blocking is on.
    Block,
}

impl Key {
    pub fn name(self) -> &'static str {
        match self {
            Key::Hostname => "hostname",
            Key::DnsServer => "dns_server",
            Key::Ip => "ip",
            Key::Block => "block",
        }
    }
}

/// Read access to the settings store.
pub trait Settings: Send + Sync {
    fn read_string(&self, key: Key) -> Result<String, SettingsError>;
    fn read_bool(&self, key: Key) -> Result<bool, SettingsError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Str(String),
    Bool(bool),
}

/// On-disk layout of the settings file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    hostname: Option<String>,
    dns_server: Option<String>,
    ip: Option<String>,
    block: Option<bool>,
}

pub const DEFAULT_HOSTNAME: &str = "esper.local";
pub const DEFAULT_DNS_SERVER: &str = "1.1.1.1";
pub const DEFAULT_IP: &str = "192.168.4.1";

/// Thread-safe in-memory settings store.
pub struct MemorySettings {
    values: RwLock<FxHashMap<Key, Value>>,
}

impl MemorySettings {
    /// A store with no values set.
    pub fn empty() -> Self {
        Self {
            values: RwLock::new(FxHashMap::default()),
        }
    }

    /// A store holding the factory defaults.
    pub fn new() -> Self {
        let settings = Self::empty();
        settings.write_string(Key::Hostname, DEFAULT_HOSTNAME);
        settings.write_string(Key::DnsServer, DEFAULT_DNS_SERVER);
        settings.write_string(Key::Ip, DEFAULT_IP);
        settings.write_bool(Key::Block, true);
        settings
    }

    /// Load defaults overlaid with the values from a TOML file.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings file not found, using defaults");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let file: SettingsFile = toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let settings = Self::new();
        if let Some(hostname) = file.hostname {
            settings.write_string(Key::Hostname, hostname);
        }
        if let Some(dns_server) = file.dns_server {
            settings.write_string(Key::DnsServer, dns_server);
        }
        if let Some(ip) = file.ip {
            settings.write_string(Key::Ip, ip);
        }
        if let Some(block) = file.block {
            settings.write_bool(Key::Block, block);
        }
        Ok(settings)
    }

    pub fn write_string(&self, key: Key, value: impl Into<String>) {
        self.values.write().insert(key, Value::Str(value.into()));
    }

    pub fn write_bool(&self, key: Key, value: bool) {
        self.values.write().insert(key, Value::Bool(value));
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings for MemorySettings {
    fn read_string(&self, key: Key) -> Result<String, SettingsError> {
        match self.values.read().get(&key) {
            Some(Value::Str(s)) => Ok(s.clone()),
            Some(Value::Bool(_)) => Err(SettingsError::WrongType {
                key: key.name(),
                expected: "string",
            }),
            None => Err(SettingsError::Missing(key.name())),
        }
    }

    fn read_bool(&self, key: Key) -> Result<bool, SettingsError> {
        match self.values.read().get(&key) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Str(_)) => Err(SettingsError::WrongType {
                key: key.name(),
                expected: "bool",
            }),
            None => Err(SettingsError::Missing(key.name())),
        }
    }
}

/// Resolve the upstream server from the `dns_server` setting.
///
/// A bare IP address gets the standard DNS port.
pub fn upstream_addr(settings: &dyn Settings) -> Result<SocketAddr, SettingsError> {
    let value = settings.read_string(Key::DnsServer)?;
    let value = value.trim();

    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    value
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| SettingsError::Invalid {
            key: Key::DnsServer.name(),
            value: value.to_string(),
        })
}
