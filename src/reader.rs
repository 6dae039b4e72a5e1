use std::ffi::CString;

use pcsc::{Context, Protocols, Scope, ShareMode};

use crate::apdu::{Command, Response};
use crate::card::{PcscIsoDep, PcscTag};
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::type4::Type4Ndef;

/// GET DATA pseudo-APDU: ask the reader for the card's anti-collision UID.
fn get_uid() -> Command {
    Command::new(0xFF, 0xCA, 0x00, 0x00).with_le(0x00)
}

/// A PC/SC context, used to find readers and connect to the card on one.
#[derive(Clone)]
pub struct PcscReader {
    ctx: Context,
}

impl PcscReader {
    pub fn new() -> Result<Self> {
        let ctx = Context::establish(Scope::User).map_err(|e| {
            Error::TransportUnavailable(format!("Failed to establish PC/SC context: {}", e))
        })?;
        Ok(Self { ctx })
    }

    /// List available card readers
    pub fn list_readers(&self) -> Result<Vec<String>> {
        Ok(self
            .reader_names()?
            .iter()
            .map(|r| r.to_string_lossy().to_string())
            .collect())
    }

    fn reader_names(&self) -> Result<Vec<CString>> {
        let mut buffer = vec![0u8; 1024];
        let readers = self
            .ctx
            .list_readers(&mut buffer)
            .map_err(|e| Error::TransportUnavailable(format!("Failed to list readers: {}", e)))?;
        Ok(readers.map(|r| r.to_owned()).collect())
    }

    /// Connect to the card on `reader_name` and work out what it offers.
    ///
    /// Every contactless card on a PC/SC reader speaks ISO-DEP here; NDEF is
    /// advertised only when the Type 4 NDEF application answers.
    pub fn connect(&self, reader_name: &str) -> Result<PcscTag> {
        let reader = self
            .reader_names()?
            .into_iter()
            .find(|r| r.to_string_lossy() == reader_name)
            .ok_or_else(|| Error::Connect(format!("Reader not found: {}", reader_name)))?;

        let card = self
            .ctx
            .connect(&reader, ShareMode::Shared, Protocols::ANY)
            .map_err(|e| Error::Connect(format!("Failed to connect to card: {}", e)))?;
        let mut iso_dep = PcscIsoDep::new(card);

        let uid = read_uid(&mut iso_dep)?;
        tracing::debug!("card on {} has UID {:02X?}", reader_name, uid);

        let ndef = match Type4Ndef::detect(iso_dep.clone()) {
            Ok(ndef) => ndef,
            Err(e) => {
                tracing::warn!("NDEF detection failed: {}", e);
                None
            }
        };
        Ok(PcscTag::new(uid, iso_dep, ndef))
    }
}

fn read_uid(transport: &mut dyn Transport) -> Result<Vec<u8>> {
    let raw = transport.transceive(&get_uid().encode_with_le())?;
    let resp = Response::decode(&raw)?;
    if !resp.is_iso_success() {
        return Err(Error::Connect(format!(
            "GET DATA (UID) refused with {:02X} {:02X}",
            resp.sw1, resp.sw2
        )));
    }
    Ok(resp.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;

    #[test]
    fn uid_from_get_data() {
        let mut t = ScriptedTransport::new();
        t.expect(&[0xFF, 0xCA, 0x00, 0x00, 0x00], &[0x04, 0x11, 0x22, 0x33, 0x90, 0x00]);
        assert_eq!(read_uid(&mut t).unwrap(), vec![0x04, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn refused_uid_is_connect_error() {
        let mut t = ScriptedTransport::new();
        t.reply(&[0x6A, 0x81]);
        assert!(matches!(read_uid(&mut t), Err(Error::Connect(_))));
    }
}
