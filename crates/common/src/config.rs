use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Directory exchange constants
pub mod protocol {
    /// Path requested from a peer when its locator has none
    pub const DEFAULT_HOSTS_PATH: &str = "/hosts.txt";

    /// Marker that turns a fetched body into a failed fetch
    pub const NOT_FOUND_MARKER: &str = "404 Not Found";

    /// Maximum accepted size of a peer's hosts file (16 MB)
    pub const MAX_RESPONSE_SIZE: u64 = 16 * 1024 * 1024;

    /// Prefix of the address-helper query used by jump redirects
    pub const ADDRESS_HELPER: &str = "?i2paddresshelper=";
}

/// Peer synchronization constants
pub mod sync {
    /// Delay between the initial fetches of consecutive peers
    pub const STAGGER_SECS: u64 = 5;

    /// Quiet period between the initial fetch and the first refresh
    pub const INITIAL_QUIET_SECS: u64 = 300; // 5 minutes

    /// Spacing between refreshes of consecutive peers
    pub const INTER_PEER_DELAY_SECS: u64 = 3600;

    /// Upper bound for a single fetch, session setup included
    pub const FETCH_TIMEOUT_SECS: u64 = 180;

    /// Fetches allowed to run at once through the shared transport
    pub const MAX_CONCURRENT_FETCHES: usize = 2;
}

/// Announce constants
pub mod announce {
    /// How long an announce stays visible
    pub const TTL_SECS: u64 = 86400; // 24 hours

    /// How often stale announces are swept
    pub const SWEEP_INTERVAL_SECS: u64 = 600;

    /// Upper bound for validating an announced address
    pub const VALIDATION_TIMEOUT_SECS: u64 = 60;

    /// One announce or registration per client per interval
    pub const RATE_LIMIT_INTERVAL_SECS: u64 = 60;
}

/// Which transport strategy peers are reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Overlay network through a SAM v3 bridge
    Sam,
    /// Plain TCP, for clearnet mirrors and local testing
    Tcp,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sam" => Ok(Self::Sam),
            "tcp" => Ok(Self::Tcp),
            other => Err(ConfigError::InvalidValue(format!("unknown transport: {}", other))),
        }
    }
}

/// Timing for the peer refresh cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub stagger_secs: u64,
    pub initial_quiet_secs: u64,
    pub inter_peer_delay_secs: u64,
    pub fetch_timeout_secs: u64,
    pub max_concurrent_fetches: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stagger_secs: sync::STAGGER_SECS,
            initial_quiet_secs: sync::INITIAL_QUIET_SECS,
            inter_peer_delay_secs: sync::INTER_PEER_DELAY_SECS,
            fetch_timeout_secs: sync::FETCH_TIMEOUT_SECS,
            max_concurrent_fetches: sync::MAX_CONCURRENT_FETCHES,
        }
    }
}

impl SyncConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_secs(self.stagger_secs)
    }

    pub fn initial_quiet(&self) -> Duration {
        Duration::from_secs(self.initial_quiet_secs)
    }

    pub fn inter_peer_delay(&self) -> Duration {
        Duration::from_secs(self.inter_peer_delay_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Jump service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JumpConfig {
    /// Service name, also used to name transport sessions
    pub name: String,

    /// Transport strategy
    pub transport: TransportKind,

    /// SAM bridge address
    pub sam_addr: String,

    /// Where the long-term service keys live
    pub keys_path: String,

    /// Local hosts file served as /hosts.txt
    pub hosts_file: String,

    /// Directory for peer snapshots and the registration queue
    pub data_dir: String,

    /// Local address the HTTP surface binds to
    pub listen_addr: String,

    /// Mirrored peers as `name=url`
    pub peers: Vec<String>,

    /// Refresh cycle timing
    pub sync: SyncConfig,

    /// How long an announce stays visible
    pub announce_ttl_secs: u64,

    /// Rate limit window for announces and registrations
    pub rate_limit_interval_secs: u64,

    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            name: "jumphelp".to_string(),
            transport: TransportKind::Sam,
            sam_addr: "127.0.0.1:7656".to_string(),
            keys_path: "keys".to_string(),
            hosts_file: "hosts.txt".to_string(),
            data_dir: ".".to_string(),
            listen_addr: "127.0.0.1:7672".to_string(),
            peers: vec![
                "root=http://i2p-projekt.i2p/hosts.txt".to_string(),
                "identiguy=http://identiguy.i2p/hosts.txt".to_string(),
            ],
            sync: SyncConfig::default(),
            announce_ttl_secs: announce::TTL_SECS,
            rate_limit_interval_secs: announce::RATE_LIMIT_INTERVAL_SECS,
            verbose: false,
        }
    }
}

impl JumpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_hosts_file(mut self, path: impl Into<String>) -> Self {
        self.hosts_file = path.into();
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<String>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Location of the pending registration queue
    pub fn queue_file(&self) -> PathBuf {
        self.data_dir().join(format!("{}-queue.txt", self.name))
    }

    pub fn announce_ttl(&self) -> Duration {
        Duration::from_secs(self.announce_ttl_secs)
    }

    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_interval_secs)
    }

    /// Parse every configured peer, failing on the first malformed spec
    ///
    /// Peer names key snapshot files and sessions, so a name may appear once.
    pub fn peer_specs(&self) -> Result<Vec<PeerSpec>, ConfigError> {
        let mut specs: Vec<PeerSpec> = Vec::new();
        for raw in self.peers.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let spec = PeerSpec::parse(raw)?;
            if specs.iter().any(|known| known.name == spec.name) {
                return Err(ConfigError::InvalidPeerSpec(format!(
                    "duplicate peer name {}: {}",
                    spec.name, raw
                )));
            }
            specs.push(spec);
        }
        Ok(specs)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// A mirrored peer: `name=http://host/path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    pub name: String,
    pub url: Url,
}

impl PeerSpec {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (name, url) = spec
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidPeerSpec(spec.to_string()))?;

        let name = name.trim();
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '/') {
            return Err(ConfigError::InvalidPeerSpec(spec.to_string()));
        }

        let url = Url::parse(url.trim())
            .map_err(|e| ConfigError::InvalidPeerUrl(format!("{}: {}", spec, e)))?;
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidPeerUrl(format!("{}: missing host", spec)));
        }

        Ok(Self {
            name: name.to_string(),
            url,
        })
    }

    /// Logical host, with the port when one is given explicitly
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Request target sent to the peer
    pub fn request_path(&self) -> String {
        let path = match self.url.path() {
            "" | "/" => protocol::DEFAULT_HOSTS_PATH,
            path => path,
        };
        match self.url.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        }
    }
}

impl FromStr for PeerSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.url)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Malformed peer spec (expected name=url): {0}")]
    InvalidPeerSpec(String),

    #[error("Malformed peer url: {0}")]
    InvalidPeerUrl(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
