//! Assembling the final [`CardReport`].

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};

use crate::transport::short_tech_name;
use crate::types::{CardReport, NdefRecordInfo};
use crate::utils::uid_string;

/// Collects everything a scan learned and freezes it into a [`CardReport`].
///
/// Missing pieces stay missing; building never fails.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    uid: String,
    technologies: IndexSet<String>,
    details: IndexMap<String, String>,
    ndef_records: Vec<NdefRecordInfo>,
    captured_at: Option<DateTime<Utc>>,
}

impl ReportBuilder {
    pub fn new(uid: &[u8]) -> Self {
        Self {
            uid: uid_string(uid),
            ..Self::default()
        }
    }

    /// Technology names, shortened to their last segment and de-duplicated.
    pub fn technologies<S: AsRef<str>>(mut self, techs: &[S]) -> Self {
        for tech in techs {
            self.technologies.insert(short_tech_name(tech.as_ref()).to_string());
        }
        self
    }

    /// Set one detail. Re-setting a key replaces its value in place.
    pub fn detail(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn details(&mut self, details: IndexMap<String, String>) -> &mut Self {
        self.details.extend(details);
        self
    }

    pub fn ndef_records(&mut self, records: Vec<NdefRecordInfo>) -> &mut Self {
        self.ndef_records.extend(records);
        self
    }

    pub fn captured_at(&mut self, at: DateTime<Utc>) -> &mut Self {
        self.captured_at = Some(at);
        self
    }

    pub fn build(self) -> CardReport {
        CardReport {
            uid: self.uid,
            technologies: self.technologies,
            details: self.details,
            ndef_records: self.ndef_records,
            captured_at: self.captured_at.unwrap_or_else(Utc::now),
        }
    }
}
