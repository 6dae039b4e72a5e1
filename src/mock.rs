//! Scripted transports for deterministic testing without hardware.
//!
//! [`ScriptedTransport`] answers each `transceive` with the next queued
//! reply, optionally checking the request first. [`MockTag`] bundles one with
//! an in-memory NDEF container so a whole scan can be driven from a test.
//!
//! # Example
//!
//! ```
//! use nfc_card_probe::mock::ScriptedTransport;
//!
//! let mut t = ScriptedTransport::new();
//! // GET VERSION answered with a bare success status
//! t.expect(&[0x90, 0x60, 0x00, 0x00, 0x00], &[0x91, 0x00]);
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::ndef::NdefRecord;
use crate::transport::{NdefTransport, Tag, Transport};
use crate::types::NdefInfo;

#[derive(Debug, Clone)]
struct Expectation {
    /// Exact request to check, or `None` to accept anything.
    request: Option<Vec<u8>>,
    reply: std::result::Result<Vec<u8>, String>,
}

/// A [`Transport`] that plays back queued replies in order.
///
/// Starts out connected. When the queue is exhausted `transceive` fails, the
/// way a real card that stopped answering would time out.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: VecDeque<Expectation>,
    sent: Vec<Vec<u8>>,
    connected: bool,
    fail_connect: Option<String>,
    timeout: Option<Duration>,
    historical: Option<Vec<u8>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            sent: Vec::new(),
            connected: true,
            fail_connect: None,
            timeout: None,
            historical: None,
        }
    }

    /// Queue a reply for whatever the next request is.
    pub fn reply(&mut self, response: &[u8]) -> &mut Self {
        self.script.push_back(Expectation {
            request: None,
            reply: Ok(response.to_vec()),
        });
        self
    }

    /// Queue a reply for an exact request.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) -> &mut Self {
        self.script.push_back(Expectation {
            request: Some(request.to_vec()),
            reply: Ok(response.to_vec()),
        });
        self
    }

    /// Queue a transceive failure.
    pub fn reply_error(&mut self, cause: &str) -> &mut Self {
        self.script.push_back(Expectation {
            request: None,
            reply: Err(cause.to_string()),
        });
        self
    }

    pub fn fail_connect(mut self, cause: &str) -> Self {
        self.fail_connect = Some(cause.to_string());
        self.connected = false;
        self
    }

    pub fn with_historical_bytes(mut self, bytes: &[u8]) -> Self {
        self.historical = Some(bytes.to_vec());
        self
    }

    /// Every frame passed to `transceive`, in order.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn send_count(&self) -> usize {
        self.sent.len()
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> Result<()> {
        if let Some(cause) = &self.fail_connect {
            return Err(Error::Connect(cause.clone()));
        }
        self.connected = true;
        Ok(())
    }

    fn transceive(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(Error::Transceive("not connected".into()));
        }
        self.sent.push(frame.to_vec());

        let next = self
            .script
            .pop_front()
            .ok_or_else(|| Error::Transceive("no scripted reply".into()))?;
        if let Some(request) = next.request {
            if request != frame {
                return Err(Error::Transceive(format!(
                    "unexpected request: expected {:02X?}, got {:02X?}",
                    request, frame
                )));
            }
        }
        next.reply.map_err(Error::Transceive)
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    fn historical_bytes(&self) -> Option<Vec<u8>> {
        self.historical.clone()
    }
}

/// An in-memory NDEF container.
#[derive(Debug, Clone)]
pub struct MockNdef {
    info: NdefInfo,
    message: std::result::Result<Option<Vec<NdefRecord>>, Error>,
    fail_connect: Option<String>,
    connected: bool,
}

impl MockNdef {
    pub fn new(info: NdefInfo, records: Vec<NdefRecord>) -> Self {
        Self {
            info,
            message: Ok(Some(records)),
            fail_connect: None,
            connected: false,
        }
    }

    pub fn empty(info: NdefInfo) -> Self {
        Self {
            message: Ok(None),
            ..Self::new(info, Vec::new())
        }
    }

    pub fn failing_read(mut self, err: Error) -> Self {
        self.message = Err(err);
        self
    }

    pub fn fail_connect(mut self, cause: &str) -> Self {
        self.fail_connect = Some(cause.to_string());
        self
    }
}

impl NdefTransport for MockNdef {
    fn connect(&mut self) -> Result<()> {
        if let Some(cause) = &self.fail_connect {
            return Err(Error::Connect(cause.clone()));
        }
        self.connected = true;
        Ok(())
    }

    fn info(&self) -> NdefInfo {
        self.info.clone()
    }

    fn read_message(&mut self, cancel: &CancelToken) -> Result<Option<Vec<NdefRecord>>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !self.connected {
            return Err(Error::Transceive("not connected".into()));
        }
        self.message.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }
}

/// A tag handle assembled from scripted parts.
#[derive(Debug, Default)]
pub struct MockTag {
    pub uid: Vec<u8>,
    pub technologies: Vec<String>,
    pub iso_dep: Option<ScriptedTransport>,
    pub ndef: Option<MockNdef>,
}

impl MockTag {
    pub fn new(uid: &[u8]) -> Self {
        Self {
            uid: uid.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_technology(mut self, tech: &str) -> Self {
        self.technologies.push(tech.to_string());
        self
    }

    pub fn with_iso_dep(mut self, transport: ScriptedTransport) -> Self {
        self.iso_dep = Some(transport);
        self
    }

    pub fn with_ndef(mut self, ndef: MockNdef) -> Self {
        self.ndef = Some(ndef);
        self
    }
}

impl Tag for MockTag {
    fn id(&self) -> &[u8] {
        &self.uid
    }

    fn technologies(&self) -> Vec<String> {
        self.technologies.clone()
    }

    fn iso_dep(&mut self) -> Option<&mut dyn Transport> {
        self.iso_dep.as_mut().map(|t| t as &mut dyn Transport)
    }

    fn ndef(&mut self) -> Option<&mut dyn NdefTransport> {
        self.ndef.as_mut().map(|n| n as &mut dyn NdefTransport)
    }
}
