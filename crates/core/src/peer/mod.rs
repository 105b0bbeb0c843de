mod manager;
mod remote;

pub use manager::{PeerSet, PeerSetStats};
pub use remote::{extract_body, snapshot_file_name, FetchStatus, Peer, PeerSnapshot};
