/// Jump service runtime
///
/// Owns the local directory, the peers we mirror and everything the HTTP
/// surface reads from, and runs the background work: peer refreshes, announce
/// expiry and the overlay listener session.
use crate::address::Destination;
use crate::aggregate;
use crate::announce::AnnounceRegistry;
use crate::directory::{self, Directory};
use crate::peer::{Peer, PeerSet};
use crate::registration::RegistrationQueue;
use crate::sync::{RefreshReport, SyncScheduler};
use crate::transport::{Session, SessionKeys, Transport};
use crate::trust::{self, TrustReport};
use anonjump_common::config::{announce, protocol};
use anonjump_common::{JumpConfig, PeerSpec, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct JumpService {
    config: JumpConfig,

    transport: Arc<dyn Transport>,

    /// Published directory, served as /hosts.txt
    local: Arc<Directory>,

    peers: Arc<PeerSet>,

    scheduler: SyncScheduler,

    announces: Arc<AnnounceRegistry>,

    registrations: RegistrationQueue,

    /// Listener session, kept open while running
    session: Mutex<Option<Box<dyn Session>>>,

    /// Our short-form address once the listener session is up
    own_address: RwLock<Option<String>>,

    background: Mutex<Vec<JoinHandle<()>>>,

    cancel: CancellationToken,

    running: Arc<RwLock<bool>>,
}

impl JumpService {
    /// Load the local directory and set up peers
    ///
    /// Fails if the local hosts file exists but cannot be read, or if the
    /// peer list is malformed.
    pub async fn new(config: JumpConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        info!("Initializing jump service {}...", config.name);

        let hosts_path = PathBuf::from(&config.hosts_file);
        let local = directory::load(&hosts_path).await?;
        info!("Serving {} records from {:?}", local.len(), hosts_path);

        if let Err(e) = directory::backup_original(&hosts_path).await {
            warn!("Could not back up {:?}: {}", hosts_path, e);
        }

        let data_dir = config.data_dir();
        let mut peers = Vec::new();
        for spec in config.peer_specs()? {
            peers.push(Arc::new(Peer::open(spec, &data_dir, transport.clone()).await));
        }
        let peers = Arc::new(PeerSet::from_peers(peers));

        let scheduler = SyncScheduler::new(peers.clone(), &config.sync);
        let announces = Arc::new(AnnounceRegistry::new(
            transport.clone(),
            config.announce_ttl(),
        ));
        let registrations = RegistrationQueue::open(config.queue_file()).await?;

        Ok(Self {
            config,
            transport,
            local: Arc::new(local),
            peers,
            scheduler,
            announces,
            registrations,
            session: Mutex::new(None),
            own_address: RwLock::new(None),
            background: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Expose `listen` through the transport and start background work
    pub async fn start(&self, listen: SocketAddr) -> Result<()> {
        info!(
            "Starting jump service {} over {} transport...",
            self.config.name,
            self.transport.kind()
        );

        let session = self
            .transport
            .open_session(&self.config.name, SessionKeys::Persistent)
            .await?;
        session.forward(listen).await?;

        let address = session.local_destination().map(short_address);
        if let Some(address) = &address {
            info!("Reachable at {}", address);
        }
        *self.own_address.write().await = address;
        *self.session.lock().await = Some(session);

        *self.running.write().await = true;
        self.scheduler.start().await;
        self.start_background_tasks().await;

        info!("Jump service started");
        Ok(())
    }

    async fn start_background_tasks(&self) {
        let announces = self.announces.clone();
        let cancel = self.cancel.clone();

        // Announce expiry
        let sweeper = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(announce::SWEEP_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        announces.sweep_expired().await;
                    }
                }
            }
        });

        self.background.lock().await.push(sweeper);
        debug!("Background tasks started");
    }

    /// Stop refreshing peers and close the listener session
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping jump service...");
        *self.running.write().await = false;

        self.cancel.cancel();
        self.scheduler.shutdown().await;
        for task in self.background.lock().await.drain(..) {
            let _ = task.await;
        }
        self.session.lock().await.take();

        info!("Jump service stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn config(&self) -> &JumpConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn transport_kind(&self) -> &'static str {
        self.transport.kind()
    }

    pub fn local(&self) -> Arc<Directory> {
        self.local.clone()
    }

    pub fn peers(&self) -> Arc<PeerSet> {
        self.peers.clone()
    }

    pub fn announces(&self) -> Arc<AnnounceRegistry> {
        self.announces.clone()
    }

    pub fn registrations(&self) -> &RegistrationQueue {
        &self.registrations
    }

    pub async fn own_address(&self) -> Option<String> {
        self.own_address.read().await.clone()
    }

    /// Every peer's hosts file, concatenated
    pub async fn aggregate(&self) -> Vec<u8> {
        aggregate::aggregate(&self.peers.snapshot().await)
    }

    pub async fn peer_hosts_file(&self, name: &str) -> Option<Vec<u8>> {
        Some(self.peers.get(name).await?.hosts_file().await)
    }

    pub async fn trust_reports(&self) -> Vec<TrustReport> {
        trust::compare_all(&self.local, &self.peers.snapshot().await)
    }

    pub async fn trust_report(&self, hostname: &str) -> TrustReport {
        trust::compare(&self.local, &self.peers.snapshot().await, hostname)
    }

    /// Mirror another peer, replacing any peer of the same name
    ///
    /// While running, the new peer joins the refresh cycle right away.
    pub async fn add_peer(&self, spec: PeerSpec) {
        let peer = Peer::open(spec, &self.config.data_dir(), self.transport.clone()).await;
        self.peers.insert(Arc::new(peer)).await;
    }

    pub async fn force_refresh(&self) -> RefreshReport {
        self.scheduler.force_refresh().await
    }

    /// Address-helper URL for a local name
    ///
    /// The name is tried as given, then with its `.i2p` suffix added or
    /// removed. Hosts file extensions after `#` are not part of the helper.
    pub fn jump(&self, name: &str) -> Option<String> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let alternate = match name.strip_suffix(".i2p") {
            Some(bare) => bare.to_string(),
            None => format!("{}.i2p", name),
        };

        for candidate in [name, alternate.as_str()] {
            if let Some(destination) = self.local.lookup(candidate) {
                let destination = destination.split('#').next().unwrap_or_default().trim();
                return Some(format!(
                    "http://{}/{}{}",
                    candidate,
                    protocol::ADDRESS_HELPER,
                    destination
                ));
            }
        }
        None
    }
}

/// Short form of our own destination, or the raw value if it doesn't decode
fn short_address(destination: &str) -> String {
    Destination::parse(destination)
        .map(|d| d.to_b32().to_hostname())
        .unwrap_or_else(|_| destination.to_string())
}
