use crate::transport::Transport;
use anonjump_common::config::announce;
use anonjump_common::{JumpError, Result, Timestamp};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A service that announced itself to us
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnounceEntry {
    pub address: String,
    pub name: String,
    pub last_seen: Timestamp,
}

/// Self-announcements from other services, one per address
///
/// An announce only counts if the address resolves through the transport.
/// Entries expire after the configured TTL unless renewed.
pub struct AnnounceRegistry {
    transport: Arc<dyn Transport>,
    entries: RwLock<HashMap<String, (String, Timestamp)>>,
    ttl: Duration,
    validation_timeout: Duration,
}

impl AnnounceRegistry {
    pub fn new(transport: Arc<dyn Transport>, ttl: Duration) -> Self {
        Self {
            transport,
            entries: RwLock::new(HashMap::new()),
            ttl,
            validation_timeout: Duration::from_secs(announce::VALIDATION_TIMEOUT_SECS),
        }
    }

    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record `name` for `address` if the address resolves
    ///
    /// Returns whether the announce was accepted. An unresolvable address is
    /// not an error; only a malformed request is.
    pub async fn announce(&self, name: &str, address: &str) -> Result<bool> {
        let name = name.trim();
        let host = announce_host(address);
        if name.is_empty() || host.is_empty() {
            return Err(JumpError::validation("announce needs a name and an address"));
        }

        debug!("Validating announce of {} at {}", name, host);
        match tokio::time::timeout(self.validation_timeout, self.transport.resolve(&host)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!("Rejected announce for {}: {}", host, e);
                return Ok(false);
            }
            Err(_) => {
                debug!("Rejected announce for {}: lookup timed out", host);
                return Ok(false);
            }
        }

        let previous = self
            .entries
            .write()
            .await
            .insert(host.clone(), (name.to_string(), Timestamp::now()));
        match previous {
            Some((old, _)) if old != name => info!("{} re-announced as {} (was {})", host, name, old),
            Some(_) => debug!("{} renewed its announce", host),
            None => info!("Accepted announce of {} at {}", name, host),
        }

        Ok(true)
    }

    /// Live entries, sorted by address
    pub async fn entries(&self) -> Vec<AnnounceEntry> {
        let entries = self.entries.read().await;
        let mut live: Vec<_> = entries
            .iter()
            .filter(|(_, (_, seen))| !seen.is_older_than(self.ttl))
            .map(|(address, (name, seen))| AnnounceEntry {
                address: address.clone(),
                name: name.clone(),
                last_seen: *seen,
            })
            .collect();
        live.sort_by(|a, b| a.address.cmp(&b.address));
        live
    }

    pub async fn get(&self, address: &str) -> Option<String> {
        let host = announce_host(address);
        self.entries
            .read()
            .await
            .get(&host)
            .filter(|(_, seen)| !seen.is_older_than(self.ttl))
            .map(|(name, _)| name.clone())
    }

    /// Drop entries not renewed within the TTL, returning how many went
    pub async fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, seen)| !seen.is_older_than(self.ttl));
        let removed = before - entries.len();
        if removed > 0 {
            info!("Expired {} announces", removed);
        }
        removed
    }

    #[cfg(test)]
    async fn insert_at(&self, address: &str, name: &str, seen: Timestamp) {
        self.entries
            .write()
            .await
            .insert(address.to_string(), (name.to_string(), seen));
    }
}

/// Reduce an announced address to a bare host
///
/// Accepts `host`, `http://host/`, `host/path` and lowercases the result.
pub fn announce_host(address: &str) -> String {
    let address = address.trim();
    let address = address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(address);
    let host = address.split(['/', '?', '#']).next().unwrap_or_default();
    host.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn registry(transport: &MockTransport) -> AnnounceRegistry {
        AnnounceRegistry::new(Arc::new(transport.clone()), Duration::from_secs(3600))
    }

    #[test]
    fn test_announce_host() {
        assert_eq!(announce_host("site.i2p"), "site.i2p");
        assert_eq!(announce_host(" http://Site.i2p/ "), "site.i2p");
        assert_eq!(announce_host("abc.b32.i2p/hosts.txt?x=1"), "abc.b32.i2p");
        assert_eq!(announce_host(""), "");
    }

    #[tokio::test]
    async fn test_accepts_resolvable_address() {
        let transport = MockTransport::new();
        transport.register_name("site.i2p");
        let registry = registry(&transport);

        assert!(registry.announce("My Site", "http://site.i2p/").await.unwrap());

        let entries = registry.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address, "site.i2p");
        assert_eq!(entries[0].name, "My Site");
        assert_eq!(registry.get("site.i2p").await.as_deref(), Some("My Site"));
    }

    #[tokio::test]
    async fn test_rejects_unresolvable_address() {
        let transport = MockTransport::new();
        let registry = registry(&transport);

        assert!(!registry.announce("ghost", "ghost.i2p").await.unwrap());
        assert!(registry.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_malformed_request() {
        let registry = registry(&MockTransport::new());
        assert!(matches!(
            registry.announce("", "site.i2p").await,
            Err(JumpError::Validation(_))
        ));
        assert!(matches!(
            registry.announce("name", "  ").await,
            Err(JumpError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_reannounce_overwrites() {
        let transport = MockTransport::new();
        transport.register_name("site.i2p");
        let registry = registry(&transport);

        registry.announce("first", "site.i2p").await.unwrap();
        registry.announce("second", "SITE.i2p").await.unwrap();

        let entries = registry.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "second");
    }

    #[tokio::test]
    async fn test_expired_entries_hidden_and_swept() {
        let transport = MockTransport::new();
        transport.register_name("fresh.i2p");
        let registry = registry(&transport);

        registry.announce("fresh", "fresh.i2p").await.unwrap();
        let stale = Timestamp::from_secs(Timestamp::now().as_secs() - 7200);
        registry.insert_at("stale.i2p", "stale", stale).await;

        let addresses: Vec<_> = registry
            .entries()
            .await
            .into_iter()
            .map(|entry| entry.address)
            .collect();
        assert_eq!(addresses, vec!["fresh.i2p"]);
        assert!(registry.get("stale.i2p").await.is_none());

        assert_eq!(registry.sweep_expired().await, 1);
        assert_eq!(registry.sweep_expired().await, 0);
        assert_eq!(registry.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_entries_sorted() {
        let transport = MockTransport::new();
        for host in ["c.i2p", "a.i2p", "b.i2p"] {
            transport.register_name(host);
        }
        let registry = registry(&transport);
        for host in ["c.i2p", "a.i2p", "b.i2p"] {
            registry.announce(host, host).await.unwrap();
        }

        let addresses: Vec<_> = registry
            .entries()
            .await
            .into_iter()
            .map(|entry| entry.address)
            .collect();
        assert_eq!(addresses, vec!["a.i2p", "b.i2p", "c.i2p"]);
    }
}
