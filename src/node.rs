use napi::bindgen_prelude::*;
use napi_derive::napi;
use tracing_subscriber::EnvFilter;

use crate::config::ProbeConfig;
use crate::reader::PcscReader;
use crate::scanner::Scanner;
use crate::types::CardReport;

fn generic_failure(msg: impl std::fmt::Display) -> napi::Error {
    napi::Error::new(napi::Status::GenericFailure, msg.to_string())
}

#[napi(object)]
pub struct CardDetail {
    pub key: String,
    pub value: String,
}

#[napi(object)]
pub struct NdefRecordEntry {
    pub label: String,
    pub decoded_text: String,
    pub raw_payload: Buffer,
}

#[napi(object)]
pub struct ScanReport {
    pub uid: String,
    pub technologies: Vec<String>,
    pub details: Vec<CardDetail>,
    pub ndef_records: Vec<NdefRecordEntry>,
    /// RFC 3339, UTC
    pub captured_at: String,
}

impl From<CardReport> for ScanReport {
    fn from(report: CardReport) -> Self {
        Self {
            uid: report.uid().to_string(),
            technologies: report.technologies().iter().cloned().collect(),
            details: report
                .details()
                .iter()
                .map(|(key, value)| CardDetail {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            ndef_records: report
                .ndef_records()
                .iter()
                .map(|r| NdefRecordEntry {
                    label: r.label.clone(),
                    decoded_text: r.decoded_text.clone(),
                    raw_payload: Buffer::from(r.raw_payload.clone()),
                })
                .collect(),
            captured_at: report.captured_at().to_rfc3339(),
        }
    }
}

#[napi]
pub struct CardProbe {
    reader: PcscReader,
    scanner: Scanner,
}

#[napi]
impl CardProbe {
    /// `config` is an optional JSON object: `{ timeoutMs, maxChainFrames, cardFamily }`.
    #[napi(constructor)]
    pub fn new(config: Option<String>) -> Result<Self> {
        let config = match config {
            Some(json) => ProbeConfig::from_json(&json).map_err(generic_failure)?,
            None => ProbeConfig::default(),
        };
        let reader = PcscReader::new().map_err(generic_failure)?;
        Ok(Self {
            reader,
            scanner: Scanner::new(config),
        })
    }

    /// List available card readers
    #[napi]
    pub fn list_readers(&self) -> Result<Vec<String>> {
        self.reader.list_readers().map_err(generic_failure)
    }

    /// Scan the card on `reader_name`. Rejects with `Read Error: <cause>`.
    ///
    /// Connecting and probing both run on a blocking worker.
    #[napi]
    pub async fn scan(&self, reader_name: String) -> Result<ScanReport> {
        let reader = self.reader.clone();
        let report = self
            .scanner
            .scan_with_in_background(move || reader.connect(&reader_name))
            .await
            .map_err(generic_failure)?;
        Ok(report.into())
    }

    #[napi]
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Stop the running scan after its current exchange.
    #[napi]
    pub fn cancel(&self) {
        self.scanner.cancel();
    }
}

/// Get library version
#[napi]
pub fn get_version() -> String {
    crate::utils::version()
}

/// Send tracing output to stderr. `filter` uses `RUST_LOG` syntax.
#[napi]
pub fn enable_logging(filter: Option<String>) -> Result<()> {
    let filter = match filter {
        Some(f) => EnvFilter::try_new(f).map_err(generic_failure)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nfc_card_probe=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(generic_failure)
}
