/// HTTP response and form types

use super::rate_limit::RateLimitStats;
use anonjump_core::{AnnounceEntry, PeerSetStats, PeerSnapshot, PendingRegistration, RefreshReport};
use serde::{Deserialize, Serialize};

/// Service status, served at `/`
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Service name
    pub name: String,
    /// Our short-form address, once the listener session is up
    pub address: Option<String>,
    /// Transport strategy in use
    pub transport: String,
    pub running: bool,
    /// Records in the published hosts file
    pub local_records: usize,
    pub peers: Vec<PeerStatusResponse>,
    pub peer_totals: PeerTotalsResponse,
    pub announces: Vec<AnnounceResponseEntry>,
    /// Registrations awaiting review
    pub pending_registrations: Vec<PendingRegistrationResponse>,
    pub rate_limit: RateLimitResponse,
    /// Paths other services can subscribe to
    pub subscriptions: Vec<String>,
}

/// One mirrored peer
#[derive(Debug, Serialize, Deserialize)]
pub struct PeerStatusResponse {
    pub name: String,
    pub url: String,
    pub records: usize,
    /// Unix seconds of the last successful fetch
    pub last_success: Option<u64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl From<&PeerSnapshot> for PeerStatusResponse {
    fn from(snapshot: &PeerSnapshot) -> Self {
        Self {
            name: snapshot.name.clone(),
            url: snapshot.url.clone(),
            records: snapshot.directory.len(),
            last_success: snapshot.status.last_success.map(|t| t.as_secs()),
            last_error: snapshot.status.last_error.clone(),
            consecutive_failures: snapshot.status.consecutive_failures,
        }
    }
}

/// Counts across every mirrored peer
#[derive(Debug, Serialize, Deserialize)]
pub struct PeerTotalsResponse {
    pub total: usize,
    pub fetched: usize,
    pub failing: usize,
    pub records: usize,
}

impl From<PeerSetStats> for PeerTotalsResponse {
    fn from(stats: PeerSetStats) -> Self {
        Self {
            total: stats.total,
            fetched: stats.fetched,
            failing: stats.failing,
            records: stats.records,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingRegistrationResponse {
    pub name: String,
    pub destination: String,
    pub description: String,
}

impl From<PendingRegistration> for PendingRegistrationResponse {
    fn from(pending: PendingRegistration) -> Self {
        Self {
            name: pending.name,
            destination: pending.destination,
            description: pending.description,
        }
    }
}

/// Write-endpoint throttling
#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitResponse {
    pub tracked_clients: usize,
    pub rejected_requests: u32,
}

impl From<RateLimitStats> for RateLimitResponse {
    fn from(stats: RateLimitStats) -> Self {
        Self {
            tracked_clients: stats.tracked_clients,
            rejected_requests: stats.total_violations,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnnounceResponseEntry {
    pub address: String,
    pub name: String,
    pub last_seen: u64,
}

impl From<AnnounceEntry> for AnnounceResponseEntry {
    fn from(entry: AnnounceEntry) -> Self {
        Self {
            address: entry.address,
            name: entry.name,
            last_seen: entry.last_seen.as_secs(),
        }
    }
}

/// Outcome of an announce
#[derive(Debug, Serialize, Deserialize)]
pub struct AnnounceResponse {
    pub accepted: bool,
    pub address: String,
}

/// Outcome of a registration
#[derive(Debug, Serialize, Deserialize)]
pub struct HostAddResponse {
    pub queued: bool,
    pub name: String,
}

/// Result of a forced refresh
#[derive(Debug, Serialize, Deserialize)]
pub struct RecheckResponse {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedPeer>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailedPeer {
    pub name: String,
    pub error: String,
}

impl From<RefreshReport> for RecheckResponse {
    fn from(report: RefreshReport) -> Self {
        Self {
            succeeded: report.succeeded,
            failed: report
                .failed
                .into_iter()
                .map(|(name, error)| FailedPeer { name, error })
                .collect(),
        }
    }
}

/// `POST /announce` form
#[derive(Debug, Deserialize)]
pub struct AnnounceForm {
    pub host_name: String,
    pub host_host: String,
}

/// `POST /hostadd` form
#[derive(Debug, Deserialize)]
pub struct HostAddForm {
    pub host_name: String,
    pub host_destination: String,
    #[serde(default)]
    pub host_description: String,
}

/// `?a=<name>` on the jump endpoints
#[derive(Debug, Deserialize)]
pub struct JumpQuery {
    pub a: Option<String>,
}

/// `?name=<hostname>` narrows `/trust` to one name
#[derive(Debug, Deserialize)]
pub struct TrustQuery {
    pub name: Option<String>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}
