//! NFC Forum Type 4 Tag NDEF access over ISO-DEP.
//!
//! The NDEF message lives in an elementary file inside the NDEF Tag
//! Application (`D2 76 00 00 85 01 01`). The Capability Container file
//! (`E1 03`) tells us which file that is, how big it may get, and how many
//! bytes one READ BINARY may return.

use crate::apdu::{Command, Response};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::ndef::{parse_message, NdefRecord};
use crate::transport::{NdefTransport, Transport};
use crate::types::NdefInfo;

pub const NDEF_APPLICATION_AID: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];
pub const CC_FILE_ID: [u8; 2] = [0xE1, 0x03];
pub const TAG_TYPE: &str = "NFC Forum Type 4";

const CC_LEN: u8 = 0x0F;
const NDEF_FILE_CONTROL_TLV: u8 = 0x04;
// Short APDU Le ceiling
const MAX_SHORT_LE: u16 = 0xFF;
// Highest offset READ BINARY can address without an SFI
const MAX_READ_OFFSET: u16 = 0x7FFF;

/// Parsed Capability Container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContainer {
    pub mapping_version: u8,
    pub max_le: u16,
    pub max_lc: u16,
    pub ndef_file_id: [u8; 2],
    pub max_ndef_size: u16,
    pub read_access: u8,
    pub write_access: u8,
}

impl CapabilityContainer {
    pub fn parse(cc: &[u8]) -> Result<Self> {
        if cc.len() < usize::from(CC_LEN) {
            return Err(Error::Ndef(format!("capability container too short ({} bytes)", cc.len())));
        }
        if cc[7] != NDEF_FILE_CONTROL_TLV {
            return Err(Error::Ndef(format!("unexpected CC TLV tag {:02X}", cc[7])));
        }
        Ok(Self {
            mapping_version: cc[2],
            max_le: u16::from_be_bytes([cc[3], cc[4]]),
            max_lc: u16::from_be_bytes([cc[5], cc[6]]),
            ndef_file_id: [cc[9], cc[10]],
            max_ndef_size: u16::from_be_bytes([cc[11], cc[12]]),
            read_access: cc[13],
            write_access: cc[14],
        })
    }

    pub fn is_writable(&self) -> bool {
        self.write_access == 0x00
    }

    /// Usable message bytes (the file also holds the 2-byte NLEN).
    pub fn capacity(&self) -> usize {
        usize::from(self.max_ndef_size.saturating_sub(2))
    }

    fn chunk_len(&self) -> u16 {
        self.max_le.clamp(1, MAX_SHORT_LE)
    }
}

fn select_ndef_application() -> Command {
    Command::new(0x00, 0xA4, 0x04, 0x00)
        .with_data(NDEF_APPLICATION_AID)
        .with_le(0x00)
}

fn select_file(file_id: [u8; 2]) -> Command {
    Command::new(0x00, 0xA4, 0x00, 0x0C).with_data(file_id)
}

fn read_binary(offset: u16, len: u8) -> Command {
    let [p1, p2] = offset.to_be_bytes();
    Command::new(0x00, 0xB0, p1, p2).with_le(len)
}

fn transmit(transport: &mut dyn Transport, command: &Command) -> Result<Vec<u8>> {
    let raw = transport.transceive(&command.encode_with_le())?;
    let resp = Response::decode(&raw)?;
    if !resp.is_iso_success() {
        return Err(Error::Status {
            sw1: resp.sw1,
            sw2: resp.sw2,
        });
    }
    Ok(resp.payload)
}

/// Select the NDEF application and read its Capability Container.
pub fn read_capability_container(transport: &mut dyn Transport) -> Result<CapabilityContainer> {
    transmit(transport, &select_ndef_application())?;
    transmit(transport, &select_file(CC_FILE_ID))?;
    let cc = transmit(transport, &read_binary(0, CC_LEN))?;
    CapabilityContainer::parse(&cc)
}

fn check_cancel(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Read the raw NDEF message bytes; empty when NLEN is zero.
///
/// `cancel` is checked before every APDU.
pub fn read_ndef_file(
    transport: &mut dyn Transport,
    cc: &CapabilityContainer,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    check_cancel(cancel)?;
    transmit(transport, &select_ndef_application())?;
    check_cancel(cancel)?;
    transmit(transport, &select_file(cc.ndef_file_id))?;

    check_cancel(cancel)?;
    let nlen = transmit(transport, &read_binary(0, 2))?;
    let [hi, lo] = nlen.as_slice() else {
        return Err(Error::Ndef(format!("NLEN read returned {} bytes", nlen.len())));
    };
    let len = u16::from_be_bytes([*hi, *lo]);
    if usize::from(len) > cc.capacity() {
        return Err(Error::Ndef(format!(
            "NLEN {} exceeds capacity {}",
            len,
            cc.capacity()
        )));
    }
    // P1 bit 8 would turn the offset into a short file identifier
    if u32::from(len) + 2 > u32::from(MAX_READ_OFFSET) {
        return Err(Error::Ndef(format!(
            "NLEN {} runs past the READ BINARY offset range",
            len
        )));
    }

    let mut message = Vec::with_capacity(usize::from(len));
    let mut offset: u16 = 2;
    while message.len() < usize::from(len) {
        check_cancel(cancel)?;
        let remaining = len - (offset - 2);
        let want = remaining.min(cc.chunk_len()) as u8;
        let chunk = transmit(transport, &read_binary(offset, want))?;
        if chunk.is_empty() {
            return Err(Error::Ndef(format!("empty read at offset {}", offset)));
        }
        let take = chunk.len().min(usize::from(remaining));
        message.extend_from_slice(&chunk[..take]);
        offset += take as u16;
    }
    tracing::debug!("read {} byte NDEF message", message.len());
    Ok(message)
}

/// [`NdefTransport`] for a Type 4 tag reached through an ISO-DEP transport.
pub struct Type4Ndef<T: Transport> {
    transport: T,
    cc: CapabilityContainer,
}

impl<T: Transport> Type4Ndef<T> {
    /// Probe for the NDEF application; `Ok(None)` when the card has none.
    pub fn detect(mut transport: T) -> Result<Option<Self>> {
        match read_capability_container(&mut transport) {
            Ok(cc) => Ok(Some(Self { transport, cc })),
            Err(Error::Status { sw1, sw2 }) => {
                tracing::debug!("no NDEF application ({:02X} {:02X})", sw1, sw2);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn capability_container(&self) -> &CapabilityContainer {
        &self.cc
    }
}

impl<T: Transport> NdefTransport for Type4Ndef<T> {
    fn connect(&mut self) -> Result<()> {
        self.transport.connect()
    }

    fn info(&self) -> NdefInfo {
        NdefInfo {
            tag_type: TAG_TYPE.to_string(),
            writable: self.cc.is_writable(),
            capacity: self.cc.capacity(),
        }
    }

    fn read_message(&mut self, cancel: &CancelToken) -> Result<Option<Vec<NdefRecord>>> {
        let bytes = read_ndef_file(&mut self.transport, &self.cc, cancel)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        parse_message(&bytes).map(Some)
    }

    fn close(&mut self) -> Result<()> {
        self.transport.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;

    const SELECT_APP: [u8; 13] = [
        0x00, 0xA4, 0x04, 0x00, 0x07, 0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01, 0x00,
    ];
    const SELECT_CC: [u8; 7] = [0x00, 0xA4, 0x00, 0x0C, 0x02, 0xE1, 0x03];
    const SELECT_NDEF: [u8; 7] = [0x00, 0xA4, 0x00, 0x0C, 0x02, 0xE1, 0x04];
    const OK: [u8; 2] = [0x90, 0x00];

    // MLe = 4 to force chunked reads, file E104, 64 bytes, read/write open
    fn cc_reply() -> Vec<u8> {
        vec![
            0x00, 0x0F, 0x20, 0x00, 0x04, 0x00, 0x34, 0x04, 0x06, 0xE1, 0x04, 0x00, 0x40, 0x00,
            0x00, 0x90, 0x00,
        ]
    }

    fn script_cc(t: &mut ScriptedTransport) {
        t.expect(&SELECT_APP, &OK);
        t.expect(&SELECT_CC, &OK);
        t.expect(&[0x00, 0xB0, 0x00, 0x00, 0x0F], &cc_reply());
    }

    #[test]
    fn parse_capability_container() {
        let cc = CapabilityContainer::parse(&cc_reply()[..15]).unwrap();
        assert_eq!(cc.mapping_version, 0x20);
        assert_eq!(cc.max_le, 4);
        assert_eq!(cc.ndef_file_id, [0xE1, 0x04]);
        assert_eq!(cc.capacity(), 62);
        assert!(cc.is_writable());
    }

    #[test]
    fn read_only_container() {
        let mut raw = cc_reply();
        raw[14] = 0xFF;
        let cc = CapabilityContainer::parse(&raw[..15]).unwrap();
        assert!(!cc.is_writable());
    }

    #[test]
    fn short_container_rejected() {
        assert!(CapabilityContainer::parse(&[0x00, 0x0F, 0x20]).is_err());
    }

    #[test]
    fn reads_message_in_chunks() {
        let mut t = ScriptedTransport::new();
        script_cc(&mut t);
        t.expect(&SELECT_APP, &OK);
        t.expect(&SELECT_NDEF, &OK);
        t.expect(&[0x00, 0xB0, 0x00, 0x00, 0x02], &[0x00, 0x07, 0x90, 0x00]);
        // D1 01 03 'T' 00 'h' 'i' split over MLe=4 reads
        t.expect(&[0x00, 0xB0, 0x00, 0x02, 0x04], &[0xD1, 0x01, 0x03, b'T', 0x90, 0x00]);
        t.expect(&[0x00, 0xB0, 0x00, 0x06, 0x03], &[0x00, b'h', b'i', 0x90, 0x00]);

        let mut ndef = Type4Ndef::detect(t).unwrap().unwrap();
        assert_eq!(ndef.capability_container().max_le, 4);
        ndef.connect().unwrap();
        let records = ndef.read_message(&CancelToken::new()).unwrap().unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, vec![0x00, b'h', b'i']);
        assert_eq!(
            ndef.info(),
            NdefInfo {
                tag_type: TAG_TYPE.to_string(),
                writable: true,
                capacity: 62,
            }
        );
    }

    #[test]
    fn empty_message_is_none() {
        let mut t = ScriptedTransport::new();
        script_cc(&mut t);
        t.reply(&OK).reply(&OK).reply(&[0x00, 0x00, 0x90, 0x00]);

        let mut ndef = Type4Ndef::detect(t).unwrap().unwrap();
        assert_eq!(ndef.read_message(&CancelToken::new()).unwrap(), None);
    }

    #[test]
    fn missing_application_is_not_detected() {
        let mut t = ScriptedTransport::new();
        t.expect(&SELECT_APP, &[0x6A, 0x82]);
        assert!(Type4Ndef::detect(t).unwrap().is_none());
    }

    #[test]
    fn oversized_nlen_rejected() {
        let mut t = ScriptedTransport::new();
        script_cc(&mut t);
        t.reply(&OK).reply(&OK).reply(&[0x01, 0x00, 0x90, 0x00]);

        let mut ndef = Type4Ndef::detect(t).unwrap().unwrap();
        assert!(matches!(ndef.read_message(&CancelToken::new()), Err(Error::Ndef(_))));
    }

    /// Sets `cancel` once `after` frames have gone out.
    struct CancelAfter {
        inner: ScriptedTransport,
        cancel: CancelToken,
        after: usize,
    }

    impl Transport for CancelAfter {
        fn connect(&mut self) -> Result<()> {
            self.inner.connect()
        }

        fn transceive(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
            let reply = self.inner.transceive(frame);
            if self.inner.send_count() >= self.after {
                self.cancel.cancel();
            }
            reply
        }

        fn close(&mut self) -> Result<()> {
            self.inner.close()
        }

        fn set_timeout(&mut self, timeout: std::time::Duration) {
            self.inner.set_timeout(timeout)
        }
    }

    #[test]
    fn cancel_stops_chunked_read() {
        let cc = CapabilityContainer::parse(&cc_reply()[..15]).unwrap();
        let mut inner = ScriptedTransport::new();
        inner.expect(&SELECT_APP, &OK);
        inner.expect(&SELECT_NDEF, &OK);
        inner.expect(&[0x00, 0xB0, 0x00, 0x00, 0x02], &[0x00, 0x07, 0x90, 0x00]);
        inner.expect(&[0x00, 0xB0, 0x00, 0x02, 0x04], &[0xD1, 0x01, 0x03, b'T', 0x90, 0x00]);
        inner.expect(&[0x00, 0xB0, 0x00, 0x06, 0x03], &[0x00, b'h', b'i', 0x90, 0x00]);
        let cancel = CancelToken::new();
        let mut t = CancelAfter {
            inner,
            cancel: cancel.clone(),
            after: 4,
        };

        let result = read_ndef_file(&mut t, &cc, &cancel);

        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(t.inner.send_count(), 4);
        assert_eq!(t.inner.remaining(), 1);
    }

    #[test]
    fn cancelled_read_sends_nothing() {
        let cc = CapabilityContainer::parse(&cc_reply()[..15]).unwrap();
        let mut t = ScriptedTransport::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        assert_eq!(read_ndef_file(&mut t, &cc, &cancel), Err(Error::Cancelled));
        assert_eq!(t.send_count(), 0);
    }

    #[test]
    fn message_beyond_offset_range_rejected() {
        let mut raw = cc_reply();
        raw[11] = 0xFF;
        raw[12] = 0xFF;
        let cc = CapabilityContainer::parse(&raw[..15]).unwrap();
        let mut t = ScriptedTransport::new();
        t.reply(&OK).reply(&OK).reply(&[0x7F, 0xFE, 0x90, 0x00]);

        let result = read_ndef_file(&mut t, &cc, &CancelToken::new());

        assert!(matches!(result, Err(Error::Ndef(_))));
        assert_eq!(t.send_count(), 3);
    }
}
