//! DESFire-like discovery sequence.
//!
//! ```text
//! Start --GET VERSION ok--> Flushed --SELECT 000000 ok--> RootSelected
//!   --GET APPLICATION IDS--> ApplicationsEnumerated --> Done
//! ```
//!
//! Any step that gets a non-conforming answer records what it learned and
//! jumps straight to `Done`; only cancellation ends in `Failed`. The
//! sequencer never returns an error: a card that does not speak the protocol
//! is a valid result (`Card Type = Unknown`).

use indexmap::IndexMap;

use crate::apdu::{Command, StatusOutcome};
use crate::cancel::CancelToken;
use crate::chain::{exchange, ChainEnd, ChainReader};
use crate::config::ProbeConfig;
use crate::transcript::Transcript;
use crate::transport::Transport;
use crate::types::ApplicationId;

pub const KEY_CARD_TYPE: &str = "Card Type";
pub const KEY_HARDWARE_VENDOR: &str = "Hardware Vendor";
pub const KEY_HARDWARE_VERSION: &str = "Hardware Version";
pub const KEY_STORAGE_SIZE: &str = "Storage Size";
pub const KEY_SELECTED: &str = "Selected";
pub const KEY_SELECT_ROOT: &str = "Select Root";
pub const KEY_APPLICATIONS: &str = "Applications";
pub const KEY_AUTH_STATUS: &str = "Auth Status";
pub const KEY_CHAIN_LIMIT: &str = "Chain Limit";
pub const KEY_PROBE_ABORTED: &str = "Probe Aborted";

pub const CARD_TYPE_UNKNOWN: &str = "Unknown";
pub const AUTH_PUBLIC: &str = "Public";
pub const AUTH_DENIED: &str = "Access Denied";

const ROOT_AID: [u8; 3] = [0x00, 0x00, 0x00];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Start,
    Flushed,
    RootSelected,
    ApplicationsEnumerated,
    Done,
    Failed(String),
}

/// What one probe run learned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Ordered details, in discovery order.
    pub details: IndexMap<String, String>,
    pub applications: Vec<ApplicationId>,
    /// Whether GET VERSION was answered the way the family answers it.
    pub recognised: bool,
}

/// Runs the discovery sequence over one transport.
pub struct DesfireProbe<'a> {
    config: &'a ProbeConfig,
    cancel: &'a CancelToken,
}

impl<'a> DesfireProbe<'a> {
    pub fn new(config: &'a ProbeConfig, cancel: &'a CancelToken) -> Self {
        Self { config, cancel }
    }

    fn chain_reader(&self) -> ChainReader<'a> {
        ChainReader::new(self.config.max_chain_frames).with_cancel(self.cancel)
    }

    /// Drive the state machine to `Done` or `Failed`.
    ///
    /// Every frame goes through `transcript` before the next decision.
    pub fn run(&self, transport: &mut dyn Transport, transcript: &mut Transcript) -> ProbeOutcome {
        let mut outcome = ProbeOutcome::default();
        let mut state = ProbeState::Start;

        loop {
            if self.cancel.is_cancelled() && !matches!(state, ProbeState::Done | ProbeState::Failed(_)) {
                state = ProbeState::Failed("cancelled".into());
            }
            tracing::debug!("probe state {:?}", state);

            state = match state {
                ProbeState::Start => self.flush(transport, transcript, &mut outcome),
                ProbeState::Flushed => self.select_root(transport, transcript, &mut outcome),
                ProbeState::RootSelected => self.enumerate(transport, transcript, &mut outcome),
                ProbeState::ApplicationsEnumerated => ProbeState::Done,
                ProbeState::Done => break,
                ProbeState::Failed(reason) => {
                    tracing::warn!("probe aborted: {}", reason);
                    outcome.details.insert(KEY_PROBE_ABORTED.into(), reason);
                    break;
                }
            };
        }

        outcome
    }

    // GET VERSION doubles as a state flush and the family check
    fn flush(
        &self,
        transport: &mut dyn Transport,
        transcript: &mut Transcript,
        outcome: &mut ProbeOutcome,
    ) -> ProbeState {
        let chained = self.chain_reader().read(transport, transcript, &Command::get_version());

        if chained.end == ChainEnd::Cancelled {
            return ProbeState::Failed("cancelled".into());
        }
        if !chained.is_complete() {
            if chained.frames == 0 {
                tracing::info!("no reply to GET VERSION, not a DESFire-like card");
            }
            record(outcome, KEY_CARD_TYPE, CARD_TYPE_UNKNOWN);
            return ProbeState::Done;
        }

        record(outcome, KEY_CARD_TYPE, &self.config.card_family);
        outcome.recognised = true;
        if let Some(hw) = HardwareInfo::parse(&chained.data) {
            record(outcome, KEY_HARDWARE_VENDOR, &hw.vendor_name());
            record(outcome, KEY_HARDWARE_VERSION, &format!("{}.{}", hw.major, hw.minor));
            record(outcome, KEY_STORAGE_SIZE, &hw.storage_size());
        }
        ProbeState::Flushed
    }

    // A single exchange: anything but `91 00` is a failed select
    fn select_root(
        &self,
        transport: &mut dyn Transport,
        transcript: &mut Transcript,
        outcome: &mut ProbeOutcome,
    ) -> ProbeState {
        let reply = exchange(transport, transcript, &Command::select_application(ROOT_AID));

        match reply.map(|r| r.outcome()) {
            Some(StatusOutcome::Success) => {
                record(outcome, KEY_SELECTED, "Root");
                ProbeState::RootSelected
            }
            _ => {
                record(outcome, KEY_SELECT_ROOT, "Failed");
                ProbeState::Done
            }
        }
    }

    fn enumerate(
        &self,
        transport: &mut dyn Transport,
        transcript: &mut Transcript,
        outcome: &mut ProbeOutcome,
    ) -> ProbeState {
        let chained = self
            .chain_reader()
            .read(transport, transcript, &Command::get_application_ids());

        match chained.end {
            ChainEnd::Complete => {
                let ids = ApplicationId::parse_all(&chained.data);
                let listed = if ids.is_empty() {
                    "None".to_string()
                } else {
                    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                };
                tracing::info!("found {} applications", ids.len());
                record(outcome, KEY_APPLICATIONS, &listed);
                record(outcome, KEY_AUTH_STATUS, AUTH_PUBLIC);
                outcome.applications = ids;
            }
            ChainEnd::Cancelled => return ProbeState::Failed("cancelled".into()),
            ChainEnd::FrameLimit => {
                record(
                    outcome,
                    KEY_CHAIN_LIMIT,
                    &format!("Exceeded after {} frames", chained.frames),
                );
                record(outcome, KEY_AUTH_STATUS, AUTH_DENIED);
            }
            ChainEnd::Failed { .. } | ChainEnd::NoResponse => {
                record(outcome, KEY_AUTH_STATUS, AUTH_DENIED);
            }
        }
        ProbeState::ApplicationsEnumerated
    }
}

fn record(outcome: &mut ProbeOutcome, key: &str, value: &str) {
    outcome.details.insert(key.to_string(), value.to_string());
}

/// The hardware block at the start of the GET VERSION answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareInfo {
    pub vendor: u8,
    pub hw_type: u8,
    pub subtype: u8,
    pub major: u8,
    pub minor: u8,
    pub storage: u8,
    pub protocol: u8,
}

impl HardwareInfo {
    pub fn parse(version: &[u8]) -> Option<Self> {
        let &[vendor, hw_type, subtype, major, minor, storage, protocol] = version.get(..7)? else {
            return None;
        };
        Some(Self {
            vendor,
            hw_type,
            subtype,
            major,
            minor,
            storage,
            protocol,
        })
    }

    pub fn vendor_name(&self) -> String {
        match self.vendor {
            0x04 => "NXP".to_string(),
            other => format!("0x{:02X}", other),
        }
    }

    /// Storage size code: `2^(n >> 1)` bytes, `+` when the real size lies
    /// between that and the next power of two.
    pub fn storage_size(&self) -> String {
        let exponent = u32::from(self.storage >> 1);
        let base = 1u64.checked_shl(exponent).unwrap_or(0);
        let approx = if self.storage & 0x01 != 0 { "+" } else { "" };
        format!("{} bytes{}", base, approx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;

    const FLUSH: [u8; 5] = [0x90, 0x60, 0x00, 0x00, 0x00];
    const CONTINUE: [u8; 5] = [0x90, 0xAF, 0x00, 0x00, 0x00];
    const SELECT_ROOT: [u8; 9] = [0x90, 0x5A, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00];
    const GET_APPS: [u8; 5] = [0x90, 0x6A, 0x00, 0x00, 0x00];

    fn run(t: &mut ScriptedTransport) -> (ProbeOutcome, Transcript) {
        let config = ProbeConfig::default();
        let cancel = CancelToken::new();
        let mut transcript = Transcript::new();
        let outcome = DesfireProbe::new(&config, &cancel).run(t, &mut transcript);
        (outcome, transcript)
    }

    #[test]
    fn public_card_lists_applications() {
        let mut t = ScriptedTransport::new();
        t.expect(&FLUSH, &[0x91, 0x00]);
        t.expect(&SELECT_ROOT, &[0x91, 0x00]);
        t.expect(&GET_APPS, &[0x01, 0x02, 0x03, 0x91, 0xAF]);
        t.expect(&CONTINUE, &[0x04, 0x05, 0x06, 0x91, 0x00]);

        let (outcome, transcript) = run(&mut t);

        assert_eq!(outcome.details["Card Type"], "MIFARE DESFire EVx");
        assert_eq!(outcome.details["Selected"], "Root");
        assert_eq!(outcome.details["Applications"], "010203, 040506");
        assert_eq!(outcome.details["Auth Status"], "Public");
        assert_eq!(outcome.applications.len(), 2);
        assert!(outcome.recognised);
        assert_eq!(transcript.lines().len(), 8);
        assert_eq!(t.remaining(), 0);
    }

    #[test]
    fn empty_flush_reply_stops_immediately() {
        let mut t = ScriptedTransport::new();
        t.reply(&[]);

        let (outcome, transcript) = run(&mut t);

        assert_eq!(outcome.details["Card Type"], "Unknown");
        assert_eq!(outcome.details.len(), 1);
        assert!(!outcome.recognised);
        assert_eq!(t.send_count(), 1);
        assert_eq!(transcript.render(), "TX: 90 60 00 00 00\nRX: ");
    }

    #[test]
    fn iso_error_to_flush_is_unknown() {
        let mut t = ScriptedTransport::new();
        t.reply(&[0x6D, 0x00]);

        let (outcome, _) = run(&mut t);

        assert_eq!(outcome.details["Card Type"], "Unknown");
        assert_eq!(t.send_count(), 1);
    }

    #[test]
    fn version_chain_is_drained() {
        let mut t = ScriptedTransport::new();
        t.expect(&FLUSH, &[0x04, 0x01, 0x01, 0x33, 0x00, 0x1A, 0x05, 0x91, 0xAF]);
        t.expect(&CONTINUE, &[0x04, 0x01, 0x01, 0x03, 0x00, 0x1A, 0x05, 0x91, 0xAF]);
        t.expect(&CONTINUE, &[0x04, 0x22, 0x33, 0x91, 0x00]);
        t.expect(&SELECT_ROOT, &[0x91, 0x00]);
        t.expect(&GET_APPS, &[0x91, 0x00]);

        let (outcome, _) = run(&mut t);

        assert_eq!(outcome.details["Hardware Vendor"], "NXP");
        assert_eq!(outcome.details["Hardware Version"], "51.0");
        assert_eq!(outcome.details["Storage Size"], "8192 bytes");
        assert_eq!(outcome.details["Applications"], "None");
        assert_eq!(outcome.details["Auth Status"], "Public");
    }

    #[test]
    fn select_root_failure_skips_enumeration() {
        let mut t = ScriptedTransport::new();
        t.reply(&[0x91, 0x00]);
        t.reply(&[0x91, 0xA0]);

        let (outcome, _) = run(&mut t);

        assert_eq!(outcome.details["Select Root"], "Failed");
        assert!(!outcome.details.contains_key("Applications"));
        assert!(!outcome.details.contains_key("Auth Status"));
        assert_eq!(t.send_count(), 2);
    }

    #[test]
    fn select_root_more_data_is_not_continued() {
        let mut t = ScriptedTransport::new();
        t.expect(&FLUSH, &[0x91, 0x00]);
        t.expect(&SELECT_ROOT, &[0x91, 0xAF]);
        t.reply(&[0x91, 0x00]);
        t.reply(&[0x91, 0x00]);

        let (outcome, _) = run(&mut t);

        assert_eq!(outcome.details["Select Root"], "Failed");
        assert!(!outcome.details.contains_key("Selected"));
        assert_eq!(t.send_count(), 2);
    }

    #[test]
    fn protected_card_is_access_denied() {
        let mut t = ScriptedTransport::new();
        t.reply(&[0x91, 0x00]);
        t.reply(&[0x91, 0x00]);
        t.reply(&[0x91, 0xAE]);

        let (outcome, _) = run(&mut t);

        assert_eq!(outcome.details["Auth Status"], "Access Denied");
        assert!(!outcome.details.contains_key("Applications"));
    }

    #[test]
    fn transceive_failure_during_enumeration_is_denied() {
        let mut t = ScriptedTransport::new();
        t.reply(&[0x91, 0x00]);
        t.reply(&[0x91, 0x00]);
        t.reply_error("tag was lost");

        let (outcome, transcript) = run(&mut t);

        assert_eq!(outcome.details["Auth Status"], "Access Denied");
        assert!(transcript.render().ends_with("RX Error: transceive failed: tag was lost"));
    }

    #[test]
    fn endless_application_chain_hits_cap() {
        let mut t = ScriptedTransport::new();
        t.reply(&[0x91, 0x00]);
        t.reply(&[0x91, 0x00]);
        for _ in 0..5 {
            t.reply(&[0x01, 0x02, 0x03, 0x91, 0xAF]);
        }
        let config = ProbeConfig {
            max_chain_frames: 3,
            ..ProbeConfig::default()
        };
        let cancel = CancelToken::new();
        let mut transcript = Transcript::new();

        let outcome = DesfireProbe::new(&config, &cancel).run(&mut t, &mut transcript);

        assert_eq!(outcome.details["Chain Limit"], "Exceeded after 3 frames");
        assert_eq!(outcome.details["Auth Status"], "Access Denied");
        assert_eq!(t.send_count(), 5);
    }

    #[test]
    fn cancelled_before_start_sends_nothing() {
        let mut t = ScriptedTransport::new();
        let config = ProbeConfig::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut transcript = Transcript::new();

        let outcome = DesfireProbe::new(&config, &cancel).run(&mut t, &mut transcript);

        assert_eq!(outcome.details["Probe Aborted"], "cancelled");
        assert_eq!(t.send_count(), 0);
        assert!(transcript.is_empty());
    }

    #[test]
    fn storage_size_codes() {
        let mut hw = HardwareInfo::parse(&[0x04, 0x01, 0x01, 0x01, 0x00, 0x18, 0x05]).unwrap();
        assert_eq!(hw.storage_size(), "4096 bytes");
        hw.storage = 0x19;
        assert_eq!(hw.storage_size(), "4096 bytes+");
        assert!(HardwareInfo::parse(&[0x04, 0x01]).is_none());
    }
}
