use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::utils::to_hex;

/// A 3-byte DESFire application identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub [u8; 3]);

impl ApplicationId {
    /// Split a flat buffer into consecutive 3-byte ids.
    ///
    /// A trailing group shorter than 3 bytes is dropped.
    pub fn parse_all(buffer: &[u8]) -> Vec<Self> {
        buffer
            .chunks_exact(3)
            .map(|c| Self([c[0], c[1], c[2]]))
            .collect()
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

/// NDEF container description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdefInfo {
    pub tag_type: String,
    pub writable: bool,
    pub capacity: usize,
}

/// One decoded NDEF record as shown to the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NdefRecordInfo {
    pub label: String,
    pub decoded_text: String,
    pub raw_payload: Vec<u8>,
}

// Identity is the payload bytes, labels and decoded text don't matter
impl PartialEq for NdefRecordInfo {
    fn eq(&self, other: &Self) -> bool {
        self.raw_payload == other.raw_payload
    }
}

impl Eq for NdefRecordInfo {}

impl std::hash::Hash for NdefRecordInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw_payload.hash(state);
    }
}

/// Summary of one scanned card.
///
/// Built once by [`crate::report::ReportBuilder`]; there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardReport {
    pub(crate) uid: String,
    pub(crate) technologies: IndexSet<String>,
    pub(crate) details: IndexMap<String, String>,
    pub(crate) ndef_records: Vec<NdefRecordInfo>,
    pub(crate) captured_at: DateTime<Utc>,
}

impl CardReport {
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn technologies(&self) -> &IndexSet<String> {
        &self.technologies
    }

    pub fn details(&self) -> &IndexMap<String, String> {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }

    pub fn ndef_records(&self) -> &[NdefRecordInfo] {
        &self.ndef_records
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for NdefRecordInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} [{}]", self.label, self.decoded_text, to_hex(&self.raw_payload))
    }
}
