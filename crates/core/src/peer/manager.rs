use super::remote::{Peer, PeerSnapshot};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::info;

/// The set of peers we mirror, in configuration order
///
/// Readers get a cloned list of handles, so a slow reader never blocks a
/// peer being added or replaced. Every change bumps a generation counter
/// that the sync scheduler watches.
#[derive(Debug)]
pub struct PeerSet {
    peers: RwLock<Vec<Arc<Peer>>>,
    changes: watch::Sender<u64>,
}

impl Default for PeerSet {
    fn default() -> Self {
        Self::from_peers(Vec::new())
    }
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_peers(peers: Vec<Arc<Peer>>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            peers: RwLock::new(peers),
            changes,
        }
    }

    /// Add a peer, replacing any peer with the same name
    ///
    /// Returns the replaced peer.
    pub async fn insert(&self, peer: Arc<Peer>) -> Option<Arc<Peer>> {
        let replaced = {
            let mut peers = self.peers.write().await;
            match peers.iter().position(|p| p.name() == peer.name()) {
                Some(index) => {
                    info!("Replacing peer {}", peer.name());
                    Some(std::mem::replace(&mut peers[index], peer))
                }
                None => {
                    info!("Adding peer {} ({})", peer.name(), peer.spec().url);
                    peers.push(peer);
                    None
                }
            }
        };
        self.changes.send_modify(|generation| *generation += 1);
        replaced
    }

    /// Notified after every insert
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Peer>> {
        self.peers
            .read()
            .await
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub async fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Current directory of every peer
    ///
    /// Each entry is one consistent snapshot of its peer; entries for
    /// different peers may come from different refresh cycles.
    pub async fn snapshot(&self) -> Vec<PeerSnapshot> {
        let peers = self.peers().await;
        let mut snapshots = Vec::with_capacity(peers.len());
        for peer in peers {
            snapshots.push(peer.snapshot().await);
        }
        snapshots
    }
}

/// Peer set statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerSetStats {
    pub total: usize,
    /// Peers fetched successfully at least once this run
    pub fetched: usize,
    /// Peers whose last fetch failed
    pub failing: usize,
    /// Records across all peer snapshots
    pub records: usize,
}

impl PeerSetStats {
    pub fn from_snapshots(snapshots: &[PeerSnapshot]) -> Self {
        let mut stats = Self::default();
        for snapshot in snapshots {
            stats.total += 1;
            stats.records += snapshot.directory.len();
            if snapshot.status.last_success.is_some() {
                stats.fetched += 1;
            }
            if snapshot.status.consecutive_failures > 0 {
                stats.failing += 1;
            }
        }
        stats
    }
}
