//! Contactless card prober.
//!
//! Given a tag handle, [`Scanner`] speaks ISO 14443-4 to it, runs a
//! DESFire-style discovery (GET VERSION, select the master application,
//! enumerate application IDs), reads any NDEF message, and hands back a
//! [`CardReport`] with the card's UID, technologies, an ordered map of
//! details (including the raw APDU transcript) and the decoded NDEF records.
//!
//! Hardware access sits behind the [`Transport`] / [`Tag`] traits. The `pcsc`
//! feature provides a PC/SC implementation; `node` adds a Node.js binding on
//! top of it. [`mock`] has scripted doubles for tests.

pub mod apdu;
pub mod cancel;
pub mod chain;
pub mod config;
pub mod error;
pub mod mock;
pub mod ndef;
pub mod probe;
pub mod report;
pub mod scanner;
pub mod transcript;
pub mod transport;
pub mod type4;
pub mod types;
pub mod utils;

#[cfg(feature = "pcsc")]
pub mod card;
#[cfg(feature = "pcsc")]
pub mod reader;

#[cfg(feature = "node")]
mod node;

pub use apdu::{Command, Response, StatusOutcome};
pub use cancel::CancelToken;
pub use config::ProbeConfig;
pub use error::{Error, Result, ScanError};
pub use ndef::{NdefRecord, Tnf};
pub use scanner::{ScanOutcome, Scanner};
pub use transcript::Transcript;
pub use transport::{Capabilities, NdefTransport, Tag, Transport};
pub use types::{ApplicationId, CardReport, NdefInfo, NdefRecordInfo};

#[cfg(feature = "pcsc")]
pub use card::{PcscIsoDep, PcscTag};
#[cfg(feature = "pcsc")]
pub use reader::PcscReader;
