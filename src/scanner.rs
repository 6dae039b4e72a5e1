//! One full scan: capability check, DESFire-like probe, NDEF read, report.
//!
//! [`Scanner::scan`] is blocking and meant to run on a worker thread;
//! [`Scanner::scan_in_background`] does that via `spawn_blocking`. Only a
//! failed connect aborts a scan. Everything else ends up as details (or
//! missing details) in the report.

use std::sync::Arc;

use tokio::sync::watch;

use crate::cancel::CancelToken;
use crate::config::ProbeConfig;
use crate::error::{Error, Result, ScanError};
use crate::ndef::record_infos;
use crate::probe::{DesfireProbe, KEY_PROBE_ABORTED};
use crate::report::ReportBuilder;
use crate::transcript::Transcript;
use crate::transport::{Capabilities, Tag};
use crate::types::CardReport;
use crate::utils::{to_hex, uid_string};

pub type ScanOutcome = std::result::Result<CardReport, ScanError>;

#[derive(Debug, Clone)]
pub struct Scanner {
    config: ProbeConfig,
    cancel: CancelToken,
    scanning: Arc<watch::Sender<bool>>,
}

impl Scanner {
    pub fn new(config: ProbeConfig) -> Self {
        let (scanning, _) = watch::channel(false);
        Self {
            config,
            cancel: CancelToken::new(),
            scanning: Arc::new(scanning),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Follow the "currently scanning" flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.scanning.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        *self.scanning.borrow()
    }

    /// Stop the running scan after its current exchange.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Scan one tag, blocking until done.
    ///
    /// Fails straight away if another scan on this scanner is in flight.
    pub fn scan<T: Tag + ?Sized>(&self, tag: &mut T) -> ScanOutcome {
        let _in_flight = self.begin()?;
        log_outcome(self.scan_inner(tag))
    }

    /// Connect with `connect`, then scan the tag it returns.
    ///
    /// The scanning flag covers the connect, so a host whose connect step
    /// already talks to the card gets it counted as part of the scan.
    pub fn scan_with<T, F>(&self, connect: F) -> ScanOutcome
    where
        T: Tag,
        F: FnOnce() -> Result<T>,
    {
        let _in_flight = self.begin()?;
        let outcome = connect()
            .map_err(ScanError::from)
            .and_then(|mut tag| self.scan_inner(&mut tag));
        log_outcome(outcome)
    }

    /// Move the tag onto a blocking worker and scan it there.
    pub async fn scan_in_background<T: Tag + 'static>(&self, tag: T) -> ScanOutcome {
        self.scan_with_in_background(move || Ok(tag)).await
    }

    /// [`Scanner::scan_with`] on a blocking worker.
    pub async fn scan_with_in_background<T, F>(&self, connect: F) -> ScanOutcome
    where
        T: Tag + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.scan_with(connect))
            .await
            .map_err(|e| ScanError::new(format!("scan worker failed: {}", e)))?
    }

    // Claim the scanning flag; only one scan per scanner at a time
    fn begin(&self) -> std::result::Result<InFlight<'_>, ScanError> {
        let claimed = self.scanning.send_if_modified(|scanning| {
            if *scanning {
                false
            } else {
                *scanning = true;
                true
            }
        });
        if !claimed {
            tracing::warn!("scan requested while another is in flight");
            return Err(ScanError::new("a scan is already in progress"));
        }
        self.cancel.reset();
        Ok(InFlight {
            scanning: self.scanning.as_ref(),
        })
    }

    fn scan_inner<T: Tag + ?Sized>(&self, tag: &mut T) -> ScanOutcome {
        let techs = tag.technologies();
        let caps = Capabilities::from_technologies(&techs);
        let mut report = ReportBuilder::new(tag.id()).technologies(&techs);
        tracing::info!("scanning tag {} ({:?})", uid_string(tag.id()), caps);

        if caps.iso_dep {
            match tag.iso_dep() {
                Some(transport) => {
                    transport.connect()?;
                    transport.set_timeout(self.config.timeout());
                    report.detail("Standard", "ISO 14443-4");

                    let mut transcript = Transcript::new();
                    let outcome =
                        DesfireProbe::new(&self.config, &self.cancel).run(transport, &mut transcript);
                    let recognised = outcome.recognised;
                    report.details(outcome.details);

                    if !transcript.is_empty() {
                        report.detail("Comm Log", transcript.render());
                    }
                    if !recognised {
                        if let Some(hb) = transport.historical_bytes() {
                            report.detail("Historical Bytes", to_hex(&hb));
                        }
                    }
                    if let Err(e) = transport.close() {
                        tracing::warn!("closing ISO-DEP transport: {}", e);
                    }
                }
                None => tracing::warn!("tag advertises IsoDep but offers no transport"),
            }
        }

        if caps.ndef && !self.cancel.is_cancelled() {
            match tag.ndef() {
                Some(ndef) => {
                    ndef.connect()?;
                    let info = ndef.info();
                    report.detail("NDEF Type", info.tag_type);
                    report.detail("Writable", if info.writable { "Yes" } else { "No" });
                    report.detail("Capacity", format!("{} bytes", info.capacity));

                    match ndef.read_message(&self.cancel) {
                        Ok(Some(records)) => {
                            report.ndef_records(record_infos(&records));
                        }
                        Ok(None) => tracing::debug!("NDEF container is empty"),
                        Err(Error::Cancelled) => {
                            tracing::info!("NDEF read cancelled");
                            report.detail(KEY_PROBE_ABORTED, "cancelled");
                        }
                        Err(e) => {
                            tracing::warn!("reading NDEF message: {}", e);
                            report.detail("NDEF Error", e.to_string());
                        }
                    }
                    if let Err(e) = ndef.close() {
                        tracing::warn!("closing NDEF transport: {}", e);
                    }
                }
                None => tracing::warn!("tag advertises Ndef but offers no transport"),
            }
        }

        Ok(report.build())
    }
}

fn log_outcome(outcome: ScanOutcome) -> ScanOutcome {
    match &outcome {
        Ok(report) => tracing::info!(
            "scan of {} finished with {} details",
            report.uid(),
            report.details().len()
        ),
        Err(e) => tracing::warn!("scan failed: {}", e),
    }
    outcome
}

/// Lowers the scanning flag when the scan ends, panics included.
struct InFlight<'a> {
    scanning: &'a watch::Sender<bool>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.scanning.send_replace(false);
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTag, ScriptedTransport};

    #[test]
    fn flag_is_cleared_after_scan() {
        let scanner = Scanner::default();
        let rx = scanner.subscribe();
        let mut tag = MockTag::new(&[0x01]).with_technology("NfcA");

        scanner.scan(&mut tag).unwrap();

        assert!(!scanner.is_scanning());
        assert!(!*rx.borrow());
    }

    #[test]
    fn iso_dep_without_transport_is_skipped() {
        let scanner = Scanner::default();
        let mut tag = MockTag::new(&[0x01]).with_technology("IsoDep");

        let report = scanner.scan(&mut tag).unwrap();

        assert_eq!(report.detail("Standard"), None);
    }

    #[test]
    fn timeout_is_applied() {
        let scanner = Scanner::new(ProbeConfig {
            timeout_ms: 1234,
            ..ProbeConfig::default()
        });
        let mut t = ScriptedTransport::new();
        t.reply(&[]);
        let mut tag = MockTag::new(&[0x01]).with_technology("IsoDep").with_iso_dep(t);

        scanner.scan(&mut tag).unwrap();

        let t = tag.iso_dep.as_ref().unwrap();
        assert_eq!(t.timeout(), Some(std::time::Duration::from_millis(1234)));
        assert!(!t.is_connected());
    }
}
