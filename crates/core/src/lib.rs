//! Core of the jump service: hosts directories, peer mirroring, trust
//! comparison and the transports that reach other services.

pub mod address;
pub mod aggregate;
pub mod announce;
pub mod directory;
pub mod peer;
pub mod registration;
pub mod service;
pub mod sync;
pub mod transport;
pub mod trust;

pub use address::{AddressError, B32Address, CanonicalAddress, Destination};
pub use aggregate::{aggregate, record_count};
pub use announce::{AnnounceEntry, AnnounceRegistry};
pub use directory::{Directory, HostRecord};
pub use peer::{FetchStatus, Peer, PeerSet, PeerSetStats, PeerSnapshot};
pub use registration::{PendingRegistration, RegistrationQueue};
pub use service::JumpService;
pub use sync::{RefreshReport, SyncScheduler, Timing};
pub use transport::{
    BoxedStream, SamTransport, Session, SessionKeys, TcpTransport, Transport, TransportError,
};
pub use trust::{compare, compare_all, TrustReport};
