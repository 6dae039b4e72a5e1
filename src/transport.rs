//! Transport traits for talking to a tag.
//!
//! The prober never touches hardware directly. A tag handle ([`Tag`]) gives
//! out an ISO-DEP [`Transport`] for raw APDU exchanges and, when the tag
//! carries an NDEF container, an [`NdefTransport`]. The PC/SC backend and the
//! scripted test doubles in [`crate::mock`] both implement these.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::types::NdefInfo;
use crate::ndef::NdefRecord;

/// Technology name for ISO 14443-4 framed transport.
pub const TECH_ISO_DEP: &str = "IsoDep";
/// Technology name for an NDEF-formatted container.
pub const TECH_NDEF: &str = "Ndef";

/// Blocking request/response transport to a card.
///
/// One exchange at a time; implementations are not expected to be shared
/// between concurrent probes.
pub trait Transport: Send {
    fn connect(&mut self) -> Result<()>;

    /// Send one command frame and wait for the full response frame.
    ///
    /// Blocks up to the timeout set with [`Transport::set_timeout`].
    fn transceive(&mut self, frame: &[u8]) -> Result<Vec<u8>>;

    fn close(&mut self) -> Result<()>;

    fn set_timeout(&mut self, timeout: Duration);

    /// Historical bytes from the card's ATR/ATS, if the transport knows them.
    fn historical_bytes(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Access to a tag's NDEF container.
pub trait NdefTransport: Send {
    fn connect(&mut self) -> Result<()>;

    fn info(&self) -> NdefInfo;

    /// Read and parse the stored NDEF message.
    ///
    /// `Ok(None)` when the container is empty. `cancel` is checked before
    /// every frame; once set, nothing more is sent and the read fails with
    /// [`Error::Cancelled`](crate::error::Error::Cancelled).
    fn read_message(&mut self, cancel: &CancelToken) -> Result<Option<Vec<NdefRecord>>>;

    fn close(&mut self) -> Result<()>;
}

/// A discovered tag, as handed over by the host's discovery mechanism.
pub trait Tag: Send {
    /// Raw anti-collision identifier.
    fn id(&self) -> &[u8];

    /// Technology names the tag advertises, e.g. `IsoDep`, `Ndef`.
    fn technologies(&self) -> Vec<String>;

    fn iso_dep(&mut self) -> Option<&mut dyn Transport>;

    fn ndef(&mut self) -> Option<&mut dyn NdefTransport>;
}

/// Which sub-probes a tag supports, evaluated once per scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub iso_dep: bool,
    pub ndef: bool,
}

impl Capabilities {
    /// Evaluate from technology names. Fully qualified names such as
    /// `android.nfc.tech.IsoDep` match on their last segment.
    pub fn from_technologies<S: AsRef<str>>(techs: &[S]) -> Self {
        let has = |name: &str| techs.iter().any(|t| short_tech_name(t.as_ref()) == name);
        Self {
            iso_dep: has(TECH_ISO_DEP),
            ndef: has(TECH_NDEF),
        }
    }
}

/// Last dotted segment of a technology name.
pub fn short_tech_name(tech: &str) -> &str {
    tech.rsplit('.').next().unwrap_or(tech)
}
