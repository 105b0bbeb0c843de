use crate::peer::{Peer, PeerSet};
use anonjump_common::{JumpError, SyncConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest delay the scheduler will wait between two steps
const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Delays driving the refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Gap between the initial fetches of consecutive peers
    pub stagger: Duration,
    /// Pause after the initial fetch before periodic refreshes begin
    pub initial_quiet: Duration,
    /// Spacing between refreshes of consecutive peers
    pub inter_peer_delay: Duration,
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
}

impl From<&SyncConfig> for Timing {
    fn from(config: &SyncConfig) -> Self {
        Self {
            stagger: config.stagger(),
            initial_quiet: config.initial_quiet(),
            inter_peer_delay: config.inter_peer_delay(),
            fetch_timeout: config.fetch_timeout(),
            max_concurrent_fetches: config.max_concurrent_fetches,
        }
    }
}

/// `delay * times`, saturating at the longest supported delay
fn scaled(delay: Duration, times: usize) -> Duration {
    let times = u32::try_from(times).unwrap_or(u32::MAX);
    delay.saturating_mul(times).min(MAX_DELAY)
}

/// Result of refreshing every peer at once
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Keeps every peer's snapshot fresh
///
/// Each peer gets its own timer task. Peer `i` first fetches after
/// `i * stagger`, then after the quiet period every
/// `inter_peer_delay * peer_count`, offset by `i * inter_peer_delay`, so
/// refreshes are spread evenly over the cycle. A shared semaphore bounds how
/// many fetches run at once.
///
/// Peers inserted into the set after `start` get a timer of their own; a
/// replaced peer's timer is stopped.
pub struct SyncScheduler {
    peers: Arc<PeerSet>,
    timing: Timing,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(peers: Arc<PeerSet>, config: &SyncConfig) -> Self {
        Self::with_timing(peers, Timing::from(config))
    }

    pub fn with_timing(peers: Arc<PeerSet>, timing: Timing) -> Self {
        let permits = Arc::new(Semaphore::new(timing.max_concurrent_fetches.max(1)));
        Self {
            peers,
            timing,
            permits,
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Spawn one refresh task per peer; calling it again is a no-op
    pub async fn start(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_some() || self.cancel.is_cancelled() {
            return;
        }

        info!(
            "Starting sync for {} peers ({} concurrent fetches)",
            self.peers.len().await,
            self.timing.max_concurrent_fetches.max(1)
        );

        let changes = self.peers.subscribe();
        let workers = Workers {
            peers: self.peers.clone(),
            timing: self.timing,
            permits: self.permits.clone(),
            cancel: self.cancel.clone(),
            running: HashMap::new(),
        };
        *supervisor = Some(tokio::spawn(workers.supervise(changes)));
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_some() && !self.cancel.is_cancelled()
    }

    /// Fetch every peer now and wait for all of them
    pub async fn force_refresh(&self) -> RefreshReport {
        let peers = self.peers.peers().await;
        info!("Forced refresh of {} peers", peers.len());

        let mut fetches = JoinSet::new();
        for (index, peer) in peers.iter().cloned().enumerate() {
            let permits = self.permits.clone();
            let cancel = self.cancel.clone();
            let timeout = self.timing.fetch_timeout;
            fetches.spawn(async move {
                let result = fetch_with_permit(&peer, &permits, timeout, &cancel).await;
                (index, result)
            });
        }

        let mut outcomes: Vec<Option<Result<usize, JumpError>>> =
            (0..peers.len()).map(|_| None).collect();
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((index, result)) => outcomes[index] = Some(result),
                Err(e) => warn!("Refresh task failed: {}", e),
            }
        }

        let mut report = RefreshReport::default();
        for (peer, outcome) in peers.iter().zip(outcomes) {
            match outcome {
                Some(Ok(_)) => report.succeeded.push(peer.name().to_string()),
                Some(Err(e)) => report.failed.push((peer.name().to_string(), e.to_string())),
                None => report
                    .failed
                    .push((peer.name().to_string(), "refresh task aborted".to_string())),
            }
        }
        report
    }

    /// Stop all timers and abort in-flight fetches
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            if let Err(e) = supervisor.await {
                warn!("Sync task ended abnormally: {}", e);
            }
        }
        info!("Sync stopped");
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Refresh tasks, one per peer currently in the set
struct Workers {
    peers: Arc<PeerSet>,
    timing: Timing,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    running: HashMap<String, WorkerHandle>,
}

struct WorkerHandle {
    peer: Arc<Peer>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Workers {
    async fn supervise(mut self, mut changes: watch::Receiver<u64>) {
        loop {
            let _ = changes.borrow_and_update();
            self.reconcile().await;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        self.cancel.cancelled().await;
                        break;
                    }
                }
            }
        }

        for (name, worker) in self.running.drain() {
            worker.cancel.cancel();
            if let Err(e) = worker.task.await {
                warn!("Refresh task for peer {} ended abnormally: {}", name, e);
            }
        }
    }

    /// Stop timers of peers no longer in the set and start missing ones
    async fn reconcile(&mut self) {
        let peers = self.peers.peers().await;

        self.running.retain(|name, worker| {
            let current = peers.iter().any(|peer| Arc::ptr_eq(peer, &worker.peer));
            if !current {
                debug!("Stopping refresh timer of replaced peer {}", name);
                worker.cancel.cancel();
            }
            current
        });

        for (index, peer) in peers.into_iter().enumerate() {
            if self.running.contains_key(peer.name()) {
                continue;
            }

            debug!("Starting refresh timer for peer {} (slot {})", peer.name(), index);
            let cancel = self.cancel.child_token();
            let worker = RefreshWorker {
                peer: peer.clone(),
                index,
                peers: self.peers.clone(),
                timing: self.timing,
                permits: self.permits.clone(),
                cancel: cancel.clone(),
            };
            self.running.insert(
                peer.name().to_string(),
                WorkerHandle {
                    peer,
                    cancel,
                    task: tokio::spawn(worker.run()),
                },
            );
        }
    }
}

struct RefreshWorker {
    peer: Arc<Peer>,
    index: usize,
    peers: Arc<PeerSet>,
    timing: Timing,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl RefreshWorker {
    async fn run(self) {
        if !self.sleep(scaled(self.timing.stagger, self.index)).await {
            return;
        }
        self.refresh().await;

        let offset = scaled(self.timing.inter_peer_delay, self.index);
        if !self
            .sleep(self.timing.initial_quiet.saturating_add(offset).min(MAX_DELAY))
            .await
        {
            return;
        }

        let mut next = Instant::now();
        loop {
            self.refresh().await;

            // The cycle stretches as peers join
            let count = self.peers.len().await.max(1);
            let period = scaled(self.timing.inter_peer_delay, count).max(Duration::from_millis(1));
            next += period;
            let now = Instant::now();
            if next < now {
                next = now + period;
            }

            if !self.sleep(next - now).await {
                break;
            }
        }
        debug!("Refresh timer for peer {} stopped", self.peer.name());
    }

    /// Returns false when cancelled first
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn refresh(&self) {
        let result =
            fetch_with_permit(&self.peer, &self.permits, self.timing.fetch_timeout, &self.cancel)
                .await;
        match result {
            Ok(_) | Err(JumpError::Cancelled) => {}
            Err(e) if e.is_transient() => {
                info!("Fetch from peer {} failed, retrying next cycle: {}", self.peer.name(), e)
            }
            Err(e) => warn!("Fetch from peer {} failed: {}", self.peer.name(), e),
        }
    }
}

async fn fetch_with_permit(
    peer: &Peer,
    permits: &Semaphore,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<usize, JumpError> {
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return Err(JumpError::Cancelled),
        permit = permits.acquire() => permit.map_err(|_| JumpError::Cancelled)?,
    };
    debug!("Fetching from peer {}", peer.name());
    peer.fetch(timeout, cancel).await
}
