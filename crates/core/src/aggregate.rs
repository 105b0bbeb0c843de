use crate::peer::PeerSnapshot;

/// Concatenate every peer's hosts file in peer order
///
/// Records are not deduplicated across peers; a name carried by several
/// peers appears once per peer.
pub fn aggregate(peers: &[PeerSnapshot]) -> Vec<u8> {
    let mut out = Vec::new();
    for peer in peers {
        out.extend_from_slice(&peer.directory.serialize());
    }
    out
}

/// Records across all snapshots, duplicates included
pub fn record_count(peers: &[PeerSnapshot]) -> usize {
    peers.iter().map(|peer| peer.directory.len()).sum()
}
