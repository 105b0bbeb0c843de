use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One `name=destination` binding
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostRecord {
    pub name: String,
    pub destination: String,
}

impl HostRecord {
    pub fn new(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
        }
    }

    /// Parse a single hosts line, splitting on the first `=`
    pub fn from_line(line: &str) -> Option<Self> {
        line.split_once('=')
            .map(|(name, destination)| Self::new(name, destination))
    }
}

impl fmt::Display for HostRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.destination)
    }
}

/// Ordered host records plus a name index
///
/// The record list keeps every parsed line, superseded duplicates included,
/// so serialization re-emits a name as often as it was read. The index
/// always points at the last record seen for a name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    records: Vec<HostRecord>,
    index: HashMap<String, usize>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse hosts text; lines without `=` are dropped
    pub fn parse(text: &str) -> Self {
        Self::from_records(text.lines().filter_map(HostRecord::from_line))
    }

    /// Parse raw bytes, replacing invalid UTF-8
    pub fn parse_bytes(bytes: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    pub fn from_records(records: impl IntoIterator<Item = HostRecord>) -> Self {
        let records: Vec<HostRecord> = records.into_iter().collect();
        let index = records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.name.clone(), position))
            .collect();

        Self { records, index }
    }

    /// A new directory with `record` appended; `self` is left untouched
    pub fn with_record(&self, record: HostRecord) -> Self {
        let mut records = self.records.clone();
        records.push(record);
        Self::from_records(records)
    }

    /// `name=destination\n` for every record, in stored order
    pub fn serialize(&self) -> Vec<u8> {
        let capacity = self
            .records
            .iter()
            .map(|record| record.name.len() + record.destination.len() + 2)
            .sum();
        let mut out = Vec::with_capacity(capacity);
        for record in &self.records {
            out.extend_from_slice(record.name.as_bytes());
            out.push(b'=');
            out.extend_from_slice(record.destination.as_bytes());
            out.push(b'\n');
        }
        out
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.index
            .get(name)
            .map(|&position| self.records[position].destination.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn records(&self) -> &[HostRecord] {
        &self.records
    }

    /// Distinct names in first-seen order
    pub fn names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .map(|record| record.name.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Number of stored records, duplicates included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_parse_drops_lines_without_separator() {
        let dir = Directory::parse("alice=ADDR1\n# comment\n\ncarol=ADDR2\n");
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.lookup("alice"), Some("ADDR1"));
        assert_eq!(dir.lookup("carol"), Some("ADDR2"));
        assert_eq!(dir.lookup("comment"), None);
    }

    #[test]
    fn test_parse_splits_on_first_separator() {
        let dir = Directory::parse("site.i2p=AAAA==#!sig=xyz\n");
        assert_eq!(dir.lookup("site.i2p"), Some("AAAA==#!sig=xyz"));
    }

    #[test]
    fn test_parse_handles_crlf() {
        let dir = Directory::parse("alice=ADDR1\r\nbob=ADDR2\r\n");
        assert_eq!(dir.lookup("alice"), Some("ADDR1"));
        assert_eq!(dir.serialize(), b"alice=ADDR1\nbob=ADDR2\n".to_vec());
    }

    #[test]
    fn test_index_points_at_last_duplicate() {
        let dir = Directory::parse("alice=OLD\nbob=B\nalice=NEW\n");
        assert_eq!(dir.lookup("alice"), Some("NEW"));
        assert_eq!(dir.len(), 3);
        assert_eq!(dir.names(), vec!["alice", "bob"]);
        // Superseded records are still serialized
        assert_eq!(dir.serialize(), b"alice=OLD\nbob=B\nalice=NEW\n".to_vec());
    }

    #[test]
    fn test_roundtrip_preserves_pairs() {
        let dir = Directory::from_records(vec![
            HostRecord::new("alice.i2p", "ADDR1"),
            HostRecord::new("bob.i2p", "ADDR2"),
            HostRecord::new("carol.i2p", "ADDR3=="),
        ]);

        let reparsed = Directory::parse_bytes(&dir.serialize());
        let before: BTreeSet<_> = dir.records().iter().cloned().collect();
        let after: BTreeSet<_> = reparsed.records().iter().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_roundtrip_over_varied_pairs() {
        let names = ["a", "x.i2p", "long-name.example.i2p", "UPPER.i2p", "ünïcode.i2p"];
        let destinations = [
            "",
            "=",
            "ADDR==",
            "a=b=c",
            "AAAA~-Bb#!sig=abc=",
            " spaced value ",
        ];

        let mut records = Vec::new();
        for (i, name) in names.iter().enumerate() {
            for (j, destination) in destinations.iter().enumerate() {
                records.push(HostRecord::new(format!("{}{}", name, j), *destination));
            }
            // The newest name opens the reversed file, the first one closes it
            let reversed = Directory::parse_bytes(
                &Directory::from_records(records.iter().rev().cloned()).serialize(),
            );
            assert_eq!(reversed.len(), (i + 1) * destinations.len());
            assert_eq!(reversed.records().first(), records.last());
            assert_eq!(reversed.records().last(), records.first());
        }

        let dir = Directory::from_records(records.clone());
        let text = dir.serialize();
        let reparsed = Directory::parse_bytes(&text);

        assert_eq!(reparsed.records(), records.as_slice());
        assert_eq!(reparsed.serialize(), text);
        for record in &records {
            assert_eq!(reparsed.lookup(&record.name), Some(record.destination.as_str()));
        }
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let dir = Directory::parse("a=1\nb=2\nc=3\n");
        assert_eq!(dir.serialize(), dir.serialize());
    }

    #[test]
    fn test_with_record_leaves_original_untouched() {
        let dir = Directory::parse("alice=ADDR1\n");
        let grown = dir.with_record(HostRecord::new("bob", "ADDR2"));

        assert_eq!(dir.len(), 1);
        assert_eq!(grown.len(), 2);
        assert_eq!(grown.lookup("bob"), Some("ADDR2"));
    }

    #[test]
    fn test_empty_directory() {
        let dir = Directory::parse("");
        assert!(dir.is_empty());
        assert!(dir.serialize().is_empty());
    }
}
