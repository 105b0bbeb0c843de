use crate::directory::{self, Directory};
use crate::transport::{SessionKeys, Transport};
use anonjump_common::config::protocol;
use anonjump_common::{JumpError, PeerSpec, Result, Timestamp};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of the most recent fetches of a peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStatus {
    pub last_attempt: Option<Timestamp>,
    pub last_success: Option<Timestamp>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

/// Point-in-time view of one peer
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub name: String,
    pub url: String,
    pub directory: Arc<Directory>,
    pub status: FetchStatus,
}

/// A remote jump service whose hosts file we mirror
///
/// The directory is swapped as a whole, so readers see either the previous
/// snapshot or the new one. Fetches writing the same snapshot file are
/// serialized, even across a peer and the one replacing it.
pub struct Peer {
    spec: PeerSpec,
    snapshot_path: PathBuf,
    transport: Arc<dyn Transport>,
    directory: RwLock<Arc<Directory>>,
    status: RwLock<FetchStatus>,
    fetch_guard: Arc<Mutex<()>>,
}

impl Peer {
    pub fn new(spec: PeerSpec, data_dir: &Path, transport: Arc<dyn Transport>) -> Self {
        let snapshot_path = data_dir.join(snapshot_file_name(&spec.name));
        let fetch_guard = snapshot_guard(&snapshot_path);
        Self {
            spec,
            snapshot_path,
            transport,
            directory: RwLock::new(Arc::new(Directory::new())),
            status: RwLock::new(FetchStatus::default()),
            fetch_guard,
        }
    }

    /// Create a peer and restore the snapshot persisted by an earlier run
    pub async fn open(spec: PeerSpec, data_dir: &Path, transport: Arc<dyn Transport>) -> Self {
        let peer = Self::new(spec, data_dir, transport);
        match directory::load(&peer.snapshot_path).await {
            Ok(restored) if !restored.is_empty() => {
                info!(
                    "Restored {} records for peer {} from {:?}",
                    restored.len(),
                    peer.name(),
                    peer.snapshot_path
                );
                *peer.directory.write().await = Arc::new(restored);
            }
            Ok(_) => {}
            Err(e) => warn!(
                "Ignoring unreadable snapshot {:?} for peer {}: {}",
                peer.snapshot_path,
                peer.name(),
                e
            ),
        }
        peer
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &PeerSpec {
        &self.spec
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub async fn directory(&self) -> Arc<Directory> {
        self.directory.read().await.clone()
    }

    pub async fn hosts_file(&self) -> Vec<u8> {
        self.directory().await.serialize()
    }

    pub async fn status(&self) -> FetchStatus {
        self.status.read().await.clone()
    }

    pub async fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            name: self.spec.name.clone(),
            url: self.spec.url.to_string(),
            directory: self.directory().await,
            status: self.status().await,
        }
    }

    /// Download, persist and install the peer's hosts file
    ///
    /// Returns the number of records installed. On any error the previous
    /// snapshot stays in place.
    pub async fn fetch(&self, timeout: Duration, cancel: &CancellationToken) -> Result<usize> {
        let _guard = self.fetch_guard.lock().await;
        self.status.write().await.last_attempt = Some(Timestamp::now());

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(JumpError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.fetch_inner()) => {
                outcome.unwrap_or_else(|_| Err(JumpError::Timeout(timeout.as_secs())))
            }
        };

        let mut status = self.status.write().await;
        match &result {
            Ok(records) => {
                info!("Peer {} now mirrors {} records", self.name(), records);
                status.last_success = Some(Timestamp::now());
                status.last_error = None;
                status.consecutive_failures = 0;
            }
            Err(e) => {
                status.last_error = Some(e.to_string());
                status.consecutive_failures += 1;
            }
        }

        result
    }

    async fn fetch_inner(&self) -> Result<usize> {
        let response = self.download().await?;
        let body = extract_body(&response)?;

        let fetched = Directory::parse_bytes(body);
        debug!(
            "Writing {} records for peer {} to {:?}",
            fetched.len(),
            self.name(),
            self.snapshot_path
        );
        directory::persist(&fetched, &self.snapshot_path).await?;

        let records = fetched.len();
        *self.directory.write().await = Arc::new(fetched);
        Ok(records)
    }

    async fn download(&self) -> Result<Vec<u8>> {
        let session = self
            .transport
            .open_session(&format!("peer-{}", self.name()), SessionKeys::Transient)
            .await?;

        let host = self.spec.host();
        debug!("Looking up {} for peer {}", host, self.name());
        let address = self.transport.resolve(&host).await?;

        debug!("Dialing peer {} via {}", self.name(), self.transport.kind());
        let mut stream = session.dial(&address).await?;

        let request = format!(
            "GET {} HTTP/1.0\r\nHost: {}\r\n\r\n",
            self.spec.request_path(),
            host
        );
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let mut response = Vec::new();
        (&mut stream)
            .take(protocol::MAX_RESPONSE_SIZE + 1)
            .read_to_end(&mut response)
            .await?;

        if response.len() as u64 > protocol::MAX_RESPONSE_SIZE {
            return Err(JumpError::validation(format!(
                "peer {} sent more than {} bytes",
                self.name(),
                protocol::MAX_RESPONSE_SIZE
            )));
        }

        Ok(response)
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.spec.name)
            .field("url", &self.spec.url.as_str())
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}

/// Lock shared by every peer persisting to `path`
fn snapshot_guard(path: &Path) -> Arc<Mutex<()>> {
    static GUARDS: OnceLock<std::sync::Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>> =
        OnceLock::new();

    let mut guards = GUARDS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(guard) = guards.get(path).and_then(Weak::upgrade) {
        return guard;
    }

    guards.retain(|_, guard| guard.strong_count() > 0);
    let guard = Arc::new(Mutex::new(()));
    guards.insert(path.to_path_buf(), Arc::downgrade(&guard));
    guard
}

/// File a peer's snapshot is persisted to
pub fn snapshot_file_name(peer: &str) -> String {
    format!("peer-{}-hosts.txt", peer)
}

/// Strip an HTTP header, rejecting any non-2xx response as not found
///
/// A response without a status line is taken to be the hosts file itself.
pub fn extract_body(response: &[u8]) -> Result<&[u8]> {
    if contains(response, protocol::NOT_FOUND_MARKER.as_bytes()) {
        return Err(JumpError::not_found("peer reported 404 Not Found"));
    }

    if !response.starts_with(b"HTTP/") {
        return Ok(response);
    }

    let (header_len, separator_len) = match find(response, b"\r\n\r\n") {
        Some(position) => (position, 4),
        None => match find(response, b"\n\n") {
            Some(position) => (position, 2),
            None => (response.len(), 0),
        },
    };

    let header = String::from_utf8_lossy(&response[..header_len]);
    let status_line = header.lines().next().unwrap_or_default();
    let code = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| JumpError::transport(format!("malformed status line: {}", status_line)))?;

    match code {
        200..=299 => Ok(&response[(header_len + separator_len).min(response.len())..]),
        _ => Err(JumpError::not_found(format!("peer answered {}", status_line))),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, Reply};

    fn peer_with(transport: &MockTransport, data_dir: &Path) -> Peer {
        let spec = PeerSpec::parse("bob=http://bob.i2p/hosts.txt").unwrap();
        Peer::new(spec, data_dir, Arc::new(transport.clone()))
    }

    #[test]
    fn test_extract_body_plain() {
        assert_eq!(extract_body(b"a=1\n").unwrap(), b"a=1\n");
    }

    #[test]
    fn test_extract_body_strips_header() {
        let response = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nalice=ADDR1\n";
        assert_eq!(extract_body(response).unwrap(), b"alice=ADDR1\n");
    }

    #[test]
    fn test_extract_body_rejects_errors() {
        assert!(matches!(
            extract_body(b"HTTP/1.1 404 Not Found\r\n\r\nmissing"),
            Err(JumpError::NotFound(_))
        ));
        assert!(matches!(
            extract_body(b"<html>404 Not Found</html>"),
            Err(JumpError::NotFound(_))
        ));
        assert!(matches!(
            extract_body(b"HTTP/1.1 503 Service Unavailable\r\n\r\n"),
            Err(JumpError::NotFound(_))
        ));
        assert!(matches!(
            extract_body(b"HTTP/1.1 garbage\r\n\r\n"),
            Err(JumpError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_installs_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport.serve_body(
            "bob.i2p",
            "HTTP/1.0 200 OK\r\n\r\nalice=ADDR1\ncarol=ADDR2\n",
        );
        let peer = peer_with(&transport, dir.path());

        let records = peer
            .fetch(Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(records, 2);
        assert_eq!(peer.hosts_file().await, b"alice=ADDR1\ncarol=ADDR2\n".to_vec());

        let persisted = std::fs::read(dir.path().join("peer-bob-hosts.txt")).unwrap();
        assert_eq!(persisted, b"alice=ADDR1\ncarol=ADDR2\n".to_vec());

        let status = peer.status().await;
        assert!(status.last_success.is_some());
        assert_eq!(status.consecutive_failures, 0);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("GET /hosts.txt HTTP/1.0\r\n"));
    }

    #[tokio::test]
    async fn test_not_found_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport.serve_body("bob.i2p", "alice=ADDR1\n");
        let peer = peer_with(&transport, dir.path());
        let cancel = CancellationToken::new();

        peer.fetch(Duration::from_secs(5), &cancel).await.unwrap();
        let before = peer.directory().await;

        transport.serve_body("bob.i2p", "HTTP/1.0 404 Not Found\r\n\r\n");
        let err = peer.fetch(Duration::from_secs(5), &cancel).await.unwrap_err();
        assert!(matches!(err, JumpError::NotFound(_)));

        assert_eq!(*peer.directory().await, *before);
        let status = peer.status().await;
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport.serve_body("bob.i2p", "alice=ADDR1\n");
        let peer = peer_with(&transport, dir.path());
        let cancel = CancellationToken::new();
        peer.fetch(Duration::from_secs(5), &cancel).await.unwrap();

        transport.serve("bob.i2p", Reply::Refuse);
        assert!(matches!(
            peer.fetch(Duration::from_secs(5), &cancel).await,
            Err(JumpError::Transport(_))
        ));

        transport.refuse_sessions(true);
        assert!(peer.fetch(Duration::from_secs(5), &cancel).await.is_err());

        assert_eq!(peer.hosts_file().await, b"alice=ADDR1\n".to_vec());
        assert_eq!(peer.status().await.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        let peer = peer_with(&transport, dir.path());

        assert!(peer
            .fetch(Duration::from_secs(5), &CancellationToken::new())
            .await
            .is_err());
        assert!(peer.directory().await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport.serve("bob.i2p", Reply::Hang);
        let peer = peer_with(&transport, dir.path());

        let err = peer
            .fetch(Duration::from_millis(100), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JumpError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_fetch_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport.serve("bob.i2p", Reply::Hang);
        let peer = peer_with(&transport, dir.path());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = peer
            .fetch(Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, JumpError::Cancelled));
    }

    #[tokio::test]
    async fn test_concurrent_fetches_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport.serve_body("bob.i2p", "alice=ADDR1\n");
        transport.set_delay(Duration::from_millis(50));
        let peer = Arc::new(peer_with(&transport, dir.path()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let peer = peer.clone();
            handles.push(tokio::spawn(async move {
                peer.fetch(Duration::from_secs(5), &CancellationToken::new())
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }

        assert_eq!(peer.hosts_file().await, b"alice=ADDR1\n".to_vec());
        assert!(!dir.path().join("peer-bob-hosts.txt.tmp").exists());
    }

    #[tokio::test]
    async fn test_replacement_shares_fetch_guard() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();

        let old = peer_with(&transport, dir.path());
        let spec = PeerSpec::parse("bob=http://mirror.i2p/hosts.txt").unwrap();
        let replacement = Peer::new(spec, dir.path(), Arc::new(transport.clone()));
        assert!(Arc::ptr_eq(&old.fetch_guard, &replacement.fetch_guard));

        let elsewhere = peer_with(&transport, other.path());
        assert!(!Arc::ptr_eq(&old.fetch_guard, &elsewhere.fetch_guard));

        let _held = old.fetch_guard.lock().await;
        transport.serve_body("mirror.i2p", "alice=ADDR1\n");
        let blocked = tokio::time::timeout(
            Duration::from_millis(100),
            replacement.fetch(Duration::from_secs(5), &CancellationToken::new()),
        )
        .await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_open_restores_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("peer-bob-hosts.txt"), "alice=ADDR1\n").unwrap();

        let spec = PeerSpec::parse("bob=http://bob.i2p/hosts.txt").unwrap();
        let peer = Peer::open(spec, dir.path(), Arc::new(MockTransport::new())).await;
        assert_eq!(peer.directory().await.lookup("alice"), Some("ADDR1"));
    }
}
