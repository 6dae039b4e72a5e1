//! APDU command encoding and response decoding.
//!
//! Commands are short ISO 7816-4 frames: `CLA INS P1 P2 [Lc DATA] [Le]`.
//! Responses are `DATA... SW1 SW2`. The DESFire native-wrapped status words
//! are classified by [`StatusOutcome`].

use crate::error::{Error, Result};
use crate::utils::to_hex;

/// DESFire wrapped-command class byte.
pub const CLA_DESFIRE: u8 = 0x90;

pub const INS_GET_VERSION: u8 = 0x60;
pub const INS_SELECT_APPLICATION: u8 = 0x5A;
pub const INS_GET_APPLICATION_IDS: u8 = 0x6A;
pub const INS_ADDITIONAL_FRAME: u8 = 0xAF;

/// A single APDU command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Option<Vec<u8>>,
    pub expected_length: Option<u8>,
}

impl Command {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            expected_length: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_le(mut self, le: u8) -> Self {
        self.expected_length = Some(le);
        self
    }

    /// Header, then `Lc DATA` only when data is present and non-empty.
    ///
    /// `expected_length` is never written here; see [`Command::encode_with_le`].
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = vec![self.cla, self.ins, self.p1, self.p2];
        if let Some(data) = self.data.as_deref().filter(|d| !d.is_empty()) {
            // Short APDUs only: Lc is a single byte
            frame.push(data.len() as u8);
            frame.extend_from_slice(data);
        }
        frame
    }

    /// [`Command::encode`] followed by the `Le` byte when one is set.
    pub fn encode_with_le(&self) -> Vec<u8> {
        let mut frame = self.encode();
        if let Some(le) = self.expected_length {
            frame.push(le);
        }
        frame
    }

    pub fn to_hex_string(&self) -> String {
        to_hex(&self.encode_with_le())
    }

    /// GET VERSION, used to flush the card's command state.
    pub fn get_version() -> Self {
        Self::new(CLA_DESFIRE, INS_GET_VERSION, 0x00, 0x00).with_le(0x00)
    }

    /// ADDITIONAL FRAME, requests the next chunk of a chained response.
    pub fn additional_frame() -> Self {
        Self::new(CLA_DESFIRE, INS_ADDITIONAL_FRAME, 0x00, 0x00).with_le(0x00)
    }

    /// SELECT APPLICATION with a 3-byte application id.
    pub fn select_application(aid: [u8; 3]) -> Self {
        Self::new(CLA_DESFIRE, INS_SELECT_APPLICATION, 0x00, 0x00)
            .with_data(aid)
            .with_le(0x00)
    }

    /// GET APPLICATION IDS on the currently selected (root) application.
    pub fn get_application_ids() -> Self {
        Self::new(CLA_DESFIRE, INS_GET_APPLICATION_IDS, 0x00, 0x00).with_le(0x00)
    }
}

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub payload: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl Response {
    /// Split a raw frame into payload and the two trailing status bytes.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        match frame {
            [payload @ .., sw1, sw2] => Ok(Self {
                payload: payload.to_vec(),
                sw1: *sw1,
                sw2: *sw2,
            }),
            _ => Err(Error::EmptyOrMalformed { len: frame.len() }),
        }
    }

    pub fn outcome(&self) -> StatusOutcome {
        StatusOutcome::from_status(self.sw1, self.sw2)
    }

    /// ISO 7816-4 "normal processing" (`90 00`).
    pub fn is_iso_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    pub fn to_hex_string(&self) -> String {
        let mut bytes = self.payload.clone();
        bytes.push(self.sw1);
        bytes.push(self.sw2);
        to_hex(&bytes)
    }
}

/// Classification of a DESFire wrapped status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Success,
    MoreData,
    Failure(u8, u8),
}

impl StatusOutcome {
    pub fn from_status(sw1: u8, sw2: u8) -> Self {
        match (sw1, sw2) {
            (0x91, 0x00) => Self::Success,
            (0x91, 0xAF) => Self::MoreData,
            _ => Self::Failure(sw1, sw2),
        }
    }
}
