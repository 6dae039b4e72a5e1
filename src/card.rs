//! ISO-DEP transport and tag handle over a connected PC/SC card.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::transport::{NdefTransport, Tag, Transport, TECH_ISO_DEP, TECH_NDEF};
use crate::type4::Type4Ndef;
use crate::utils::historical_bytes;

/// Raw APDU exchange with a card sitting on a PC/SC reader.
///
/// Clones share the same underlying card handle; the Type 4 NDEF reader and
/// the DESFire probe both talk through one.
#[derive(Clone)]
pub struct PcscIsoDep {
    inner: Arc<Mutex<pcsc::Card>>,
    connected: bool,
    timeout: Option<Duration>,
}

impl PcscIsoDep {
    pub(crate) fn new(card: pcsc::Card) -> Self {
        Self {
            inner: Arc::new(Mutex::new(card)),
            connected: true,
            timeout: None,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, pcsc::Card>> {
        self.inner
            .lock()
            .map_err(|e| Error::Transceive(format!("Failed to lock card: {}", e)))
    }

    fn atr(&self) -> Result<Vec<u8>> {
        let card = self.lock()?;
        let status = card
            .status2_owned()
            .map_err(|e| Error::Transceive(format!("Failed to get card status: {}", e)))?;
        Ok(status.atr().to_vec())
    }
}

impl Transport for PcscIsoDep {
    fn connect(&mut self) -> Result<()> {
        // The reader connected us already; make sure the card is still there.
        let card = self
            .inner
            .lock()
            .map_err(|e| Error::Connect(format!("Failed to lock card: {}", e)))?;
        card.status2_owned()
            .map_err(|e| Error::Connect(format!("Card not present: {}", e)))?;
        self.connected = true;
        Ok(())
    }

    fn transceive(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(Error::Transceive("not connected".into()));
        }
        let card = self.lock()?;

        let mut buffer = [0u8; pcsc::MAX_BUFFER_SIZE];
        let started = Instant::now();
        let response = card
            .transmit(frame, &mut buffer)
            .map_err(|e| Error::Transceive(format!("Failed to transmit APDU: {}", e)))?;

        // PC/SC has no per-exchange timeout; a late answer counts as lost.
        if let Some(timeout) = self.timeout {
            let elapsed = started.elapsed();
            if elapsed > timeout {
                return Err(Error::Transceive(format!(
                    "timed out after {} ms",
                    elapsed.as_millis()
                )));
            }
        }
        Ok(response.to_vec())
    }

    fn close(&mut self) -> Result<()> {
        // pcsc::Card::disconnect takes ownership; the card is released on drop.
        self.connected = false;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    fn historical_bytes(&self) -> Option<Vec<u8>> {
        match self.atr() {
            Ok(atr) => historical_bytes(&atr),
            Err(e) => {
                tracing::warn!("reading ATR: {}", e);
                None
            }
        }
    }
}

/// A card on a PC/SC reader, presented as a discovered tag.
pub struct PcscTag {
    uid: Vec<u8>,
    iso_dep: PcscIsoDep,
    ndef: Option<Type4Ndef<PcscIsoDep>>,
}

impl PcscTag {
    pub(crate) fn new(uid: Vec<u8>, iso_dep: PcscIsoDep, ndef: Option<Type4Ndef<PcscIsoDep>>) -> Self {
        Self { uid, iso_dep, ndef }
    }
}

impl Tag for PcscTag {
    fn id(&self) -> &[u8] {
        &self.uid
    }

    fn technologies(&self) -> Vec<String> {
        let mut techs = vec![TECH_ISO_DEP.to_string()];
        if self.ndef.is_some() {
            techs.push(TECH_NDEF.to_string());
        }
        techs
    }

    fn iso_dep(&mut self) -> Option<&mut dyn Transport> {
        Some(&mut self.iso_dep)
    }

    fn ndef(&mut self) -> Option<&mut dyn NdefTransport> {
        self.ndef.as_mut().map(|n| n as &mut dyn NdefTransport)
    }
}
