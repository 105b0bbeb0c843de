/// Cross-checking local bindings against what peers claim
///
/// A peer agrees on a name when its claim and our value canonicalize to the
/// same address. Claims are compared in canonical form, so a peer publishing
/// the short form of our full destination still agrees.
use crate::address::CanonicalAddress;
use crate::directory::Directory;
use crate::peer::PeerSnapshot;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// How peers vote on one local name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrustReport {
    pub hostname: String,
    /// Whether each peer carrying the name agrees with us
    pub agreement: BTreeMap<String, bool>,
    /// The raw value each peer carrying the name claims
    pub claims: BTreeMap<String, String>,
}

impl TrustReport {
    /// Peers whose claim differs from ours
    pub fn disagreements(&self) -> Vec<&str> {
        self.agreement
            .iter()
            .filter(|(_, agrees)| !**agrees)
            .map(|(peer, _)| peer.as_str())
            .collect()
    }
}

/// Compare our binding for `hostname` with every peer's
///
/// Names we do not carry yield an empty report.
pub fn compare(local: &Directory, peers: &[PeerSnapshot], hostname: &str) -> TrustReport {
    let mut report = TrustReport {
        hostname: hostname.to_string(),
        ..Default::default()
    };

    let Some(ours) = local.lookup(hostname) else {
        return report;
    };
    let ours = CanonicalAddress::from_claim(ours);

    for peer in peers {
        if let Some(theirs) = peer.directory.lookup(hostname) {
            let agrees = CanonicalAddress::from_claim(theirs) == ours;
            report.agreement.insert(peer.name.clone(), agrees);
            report.claims.insert(peer.name.clone(), theirs.to_string());
        }
    }

    report
}

/// One report per local name that some peer also carries, in local order
pub fn compare_all(local: &Directory, peers: &[PeerSnapshot]) -> Vec<TrustReport> {
    let carried: HashSet<&str> = peers
        .iter()
        .flat_map(|peer| peer.directory.records().iter().map(|r| r.name.as_str()))
        .collect();

    local
        .names()
        .into_iter()
        .filter(|name| carried.contains(name))
        .map(|name| compare(local, peers, name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::tests::sample_destination;
    use crate::address::Destination;
    use crate::peer::FetchStatus;
    use std::sync::Arc;

    fn snapshot(name: &str, text: &str) -> PeerSnapshot {
        PeerSnapshot {
            name: name.to_string(),
            url: format!("http://{}.i2p/hosts.txt", name),
            directory: Arc::new(Directory::parse(text)),
            status: FetchStatus::default(),
        }
    }

    #[test]
    fn test_two_node_scenario() {
        let local = Directory::parse("alice=ADDR1\n");
        let peers = vec![snapshot("bob", "alice=ADDR1\ncarol=ADDR2\n")];

        let report = compare(&local, &peers, "alice");
        assert_eq!(report.agreement.get("bob"), Some(&true));
        assert_eq!(report.claims.get("bob").map(String::as_str), Some("ADDR1"));
        assert!(report.disagreements().is_empty());

        let all = compare_all(&local, &peers);
        assert_eq!(all, vec![report]);
    }

    #[test]
    fn test_disagreement_keeps_raw_claim() {
        let ours = sample_destination(1);
        let theirs = sample_destination(2);
        let local = Directory::parse(&format!("alice={}\n", ours));
        let peers = vec![
            snapshot("bob", &format!("alice={}\n", ours)),
            snapshot("eve", &format!("alice={}\n", theirs)),
        ];

        let report = compare(&local, &peers, "alice");
        assert_eq!(report.agreement.get("bob"), Some(&true));
        assert_eq!(report.agreement.get("eve"), Some(&false));
        assert_eq!(report.disagreements(), vec!["eve"]);
        // the claim is what eve published, not our own value
        assert_eq!(report.claims.get("eve"), Some(&theirs));
    }

    #[test]
    fn test_short_form_claim_agrees() {
        let ours = sample_destination(5);
        let short = Destination::parse(&ours).unwrap().to_b32().to_hostname();
        let local = Directory::parse(&format!("site={}\n", ours));
        let peers = vec![snapshot("bob", &format!("site={}\n", short))];

        let report = compare(&local, &peers, "site");
        assert_eq!(report.agreement.get("bob"), Some(&true));
        assert_eq!(report.claims.get("bob"), Some(&short));
    }

    #[test]
    fn test_unknown_local_name_is_empty() {
        let local = Directory::parse("alice=ADDR1\n");
        let peers = vec![snapshot("bob", "carol=ADDR2\n")];

        let report = compare(&local, &peers, "carol");
        assert_eq!(report.hostname, "carol");
        assert!(report.agreement.is_empty());
        assert!(report.claims.is_empty());
    }

    #[test]
    fn test_peers_without_the_name_are_skipped() {
        let local = Directory::parse("alice=ADDR1\ncarol=ADDR9\n");
        let peers = vec![
            snapshot("bob", "alice=ADDR1\n"),
            snapshot("dave", "zed=ADDR3\n"),
        ];

        let report = compare(&local, &peers, "alice");
        assert_eq!(report.agreement.len(), 1);
        assert!(!report.claims.contains_key("dave"));

        let all = compare_all(&local, &peers);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].hostname, "alice");
    }

    #[test]
    fn test_compare_all_uses_local_order() {
        let local = Directory::parse("zed=A\nalpha=B\nzed=C\n");
        let peers = vec![snapshot("bob", "alpha=B\nzed=C\n")];

        let names: Vec<_> = compare_all(&local, &peers)
            .into_iter()
            .map(|report| report.hostname)
            .collect();
        assert_eq!(names, vec!["zed", "alpha"]);
    }
}
