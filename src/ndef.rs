//! NDEF message parsing and record decoding.
//!
//! [`parse_message`] turns raw NDEF message bytes into [`NdefRecord`]s.
//! [`describe_record`] produces the human-readable text for one record: a
//! proper Text record decode when the record qualifies, otherwise a
//! printable-ASCII heuristic. Decoding never fails.

use crate::error::{Error, Result};
use crate::types::NdefRecordInfo;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

/// Well-known record type for Text records.
pub const RTD_TEXT: &[u8] = b"T";

/// Printable share above which an unknown payload is shown as text.
const PRINTABLE_THRESHOLD: f64 = 0.8;

/// Type Name Format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tnf {
    Empty,
    WellKnown,
    Media,
    AbsoluteUri,
    External,
    Unknown,
    Unchanged,
    Reserved,
}

impl Tnf {
    pub fn from_bits(bits: u8) -> Self {
        match bits & TNF_MASK {
            0x00 => Self::Empty,
            0x01 => Self::WellKnown,
            0x02 => Self::Media,
            0x03 => Self::AbsoluteUri,
            0x04 => Self::External,
            0x05 => Self::Unknown,
            0x06 => Self::Unchanged,
            _ => Self::Reserved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: Tnf,
    pub record_type: Vec<u8>,
    pub id: Vec<u8>,
    pub payload: Vec<u8>,
}

impl NdefRecord {
    pub fn new(tnf: Tnf, record_type: &[u8], payload: &[u8]) -> Self {
        Self {
            tnf,
            record_type: record_type.to_vec(),
            id: Vec::new(),
            payload: payload.to_vec(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.tnf == Tnf::WellKnown && self.record_type == RTD_TEXT
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| Error::Ndef(format!("truncated {} at offset {}", what, self.pos)))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }
}

struct RawRecord {
    header: u8,
    record_type: Vec<u8>,
    id: Vec<u8>,
    payload: Vec<u8>,
}

fn read_record(cursor: &mut Cursor<'_>) -> Result<RawRecord> {
    let header = cursor.byte("record header")?;
    let type_len = usize::from(cursor.byte("type length")?);
    let payload_len = if header & FLAG_SR != 0 {
        usize::from(cursor.byte("payload length")?)
    } else {
        let b = cursor.take(4, "payload length")?;
        u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize
    };
    let id_len = if header & FLAG_IL != 0 {
        usize::from(cursor.byte("id length")?)
    } else {
        0
    };

    Ok(RawRecord {
        header,
        record_type: cursor.take(type_len, "record type")?.to_vec(),
        id: cursor.take(id_len, "record id")?.to_vec(),
        payload: cursor.take(payload_len, "payload")?.to_vec(),
    })
}

/// Parse an NDEF message.
///
/// Chunked records are joined into one record carrying the first chunk's
/// type and id. Parsing stops after the record flagged ME; bytes after it are
/// ignored.
pub fn parse_message(bytes: &[u8]) -> Result<Vec<NdefRecord>> {
    let mut cursor = Cursor { buf: bytes, pos: 0 };
    let mut records = Vec::new();
    let mut chunked: Option<NdefRecord> = None;
    let mut first = true;

    loop {
        let raw = read_record(&mut cursor)?;
        if first && raw.header & FLAG_MB == 0 {
            return Err(Error::Ndef("first record lacks message-begin flag".into()));
        }
        first = false;

        let tnf = Tnf::from_bits(raw.header);
        let more_chunks = raw.header & FLAG_CF != 0;

        match chunked.as_mut() {
            Some(head) => {
                if tnf != Tnf::Unchanged {
                    return Err(Error::Ndef("chunk continuation must use TNF unchanged".into()));
                }
                head.payload.extend_from_slice(&raw.payload);
                if !more_chunks {
                    records.extend(chunked.take());
                }
            }
            None => {
                if tnf == Tnf::Unchanged {
                    return Err(Error::Ndef("unexpected TNF unchanged outside a chunk".into()));
                }
                let record = NdefRecord {
                    tnf,
                    record_type: raw.record_type,
                    id: raw.id,
                    payload: raw.payload,
                };
                if more_chunks {
                    chunked = Some(record);
                } else {
                    records.push(record);
                }
            }
        }

        if raw.header & FLAG_ME != 0 {
            if chunked.is_some() {
                return Err(Error::Ndef("message ended inside a chunked record".into()));
            }
            return Ok(records);
        }
    }
}

/// Decode a Text record payload.
///
/// Status byte: bit 7 selects UTF-16, bits 0-5 give the language code
/// length. `None` when the payload cannot be decoded.
pub fn decode_text_payload(payload: &[u8]) -> Option<String> {
    let status = *payload.first()?;
    let lang_len = usize::from(status & 0x3F);
    let text = payload.get(1 + lang_len..)?;

    if status & 0x80 == 0 {
        Some(String::from_utf8_lossy(text).into_owned())
    } else {
        decode_utf16(text)
    }
}

// UTF-16 with optional BOM, big-endian when there is none
fn decode_utf16(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let (little_endian, body) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => (false, bytes),
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|p| {
            if little_endian {
                u16::from_le_bytes([p[0], p[1]])
            } else {
                u16::from_be_bytes([p[0], p[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}

/// Printable-ASCII heuristic for payloads that are not Text records.
pub fn describe_payload(payload: &[u8]) -> String {
    if !payload.is_empty() {
        let printable = payload.iter().filter(|b| (32..=126).contains(*b)).count();
        if printable as f64 / payload.len() as f64 > PRINTABLE_THRESHOLD {
            return String::from_utf8_lossy(payload).into_owned();
        }
    }
    format!("Binary ({} B)", payload.len())
}

/// Human-readable text for one record.
pub fn describe_record(record: &NdefRecord) -> String {
    if record.is_text() {
        if let Some(text) = decode_text_payload(&record.payload) {
            return text;
        }
        tracing::debug!("text record did not decode, using generic view");
    }
    describe_payload(&record.payload)
}

/// Label and decode every record, numbering from 1.
pub fn record_infos(records: &[NdefRecord]) -> Vec<NdefRecordInfo> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| NdefRecordInfo {
            label: format!("Record {}", index + 1),
            decoded_text: describe_record(record),
            raw_payload: record.payload.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_record(payload: &[u8]) -> NdefRecord {
        NdefRecord::new(Tnf::WellKnown, RTD_TEXT, payload)
    }

    #[test]
    fn text_record_utf8() {
        let record = text_record(&[0x02, b'e', b'n', 0x41, 0x42]);
        assert_eq!(describe_record(&record), "AB");
    }

    #[test]
    fn text_record_utf16_with_bom() {
        let record = text_record(&[0x82, b'e', b'n', 0xFF, 0xFE, 0x48, 0x00, 0x69, 0x00]);
        assert_eq!(describe_record(&record), "Hi");
    }

    #[test]
    fn text_record_utf16_defaults_big_endian() {
        assert_eq!(decode_text_payload(&[0x80, 0x00, 0x48]), Some("H".to_string()));
    }

    #[test]
    fn short_text_record_falls_back() {
        // Language length 5 points past the end
        let record = text_record(&[0x05, b'e', b'n']);
        assert_eq!(describe_record(&record), "Binary (3 B)");
    }

    #[test]
    fn empty_text_record_falls_back() {
        assert_eq!(describe_record(&text_record(&[])), "Binary (0 B)");
    }

    #[test]
    fn odd_utf16_falls_back_to_generic() {
        // 5 text bytes cannot be UTF-16; 5 of 6 bytes are printable
        let record = text_record(&[0x80, 0x41, 0x42, 0x43, 0x44, 0x45]);
        assert_eq!(describe_record(&record), "\u{FFFD}ABCDE");
    }

    #[test]
    fn binary_fallback() {
        assert_eq!(describe_payload(&[0x00; 10]), "Binary (10 B)");
    }

    #[test]
    fn printable_payload_as_text() {
        let record = NdefRecord::new(Tnf::Media, b"text/plain", b"hello world");
        assert_eq!(describe_record(&record), "hello world");
    }

    #[test]
    fn exactly_eighty_percent_is_binary() {
        // 4 printable out of 5
        assert_eq!(describe_payload(&[b'a', b'b', b'c', b'd', 0x00]), "Binary (5 B)");
    }

    #[test]
    fn uri_record_is_generic() {
        let record = NdefRecord::new(Tnf::WellKnown, b"U", b"\x04example.com");
        assert_eq!(describe_record(&record), "\u{4}example.com");
    }

    #[test]
    fn parse_single_short_record() {
        let bytes = [0xD1, 0x01, 0x05, b'T', 0x02, b'e', b'n', b'h', b'i'];
        let records = parse_message(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_text());
        assert_eq!(records[0].payload, vec![0x02, b'e', b'n', b'h', b'i']);
    }

    #[test]
    fn parse_long_record_with_id() {
        let mut bytes = vec![0xC9 /* MB ME IL, TNF=1, long */, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01];
        bytes.push(b'U');
        bytes.push(b'x');
        bytes.extend_from_slice(&[0x01, 0x61]);
        let records = parse_message(&bytes).unwrap();
        assert_eq!(records[0].id, vec![b'x']);
        assert_eq!(records[0].payload, vec![0x01, 0x61]);
    }

    #[test]
    fn parse_two_records() {
        let bytes = [
            0x91, 0x01, 0x01, b'T', 0x00, // MB, SR, well-known
            0x52, 0x00, 0x02, 0xAA, 0xBB, // ME, SR, media, no type
        ];
        let records = parse_message(&bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].tnf, Tnf::Media);
        assert_eq!(records[1].payload, vec![0xAA, 0xBB]);
    }

    #[test]
    fn parse_chunked_record() {
        let bytes = [
            0xB2, 0x01, 0x02, b'x', 0x01, 0x02, // MB CF SR media
            0x36, 0x00, 0x01, 0x03, // CF SR unchanged
            0x56, 0x00, 0x01, 0x04, // ME SR unchanged
        ];
        let records = parse_message(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, b"x".to_vec());
        assert_eq!(records[0].payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn parse_truncated_payload() {
        let err = parse_message(&[0xD1, 0x01, 0x09, b'T', 0x02]).unwrap_err();
        assert!(matches!(err, Error::Ndef(_)));
    }

    #[test]
    fn parse_requires_message_begin() {
        assert!(parse_message(&[0x51, 0x01, 0x00, b'T']).is_err());
    }

    #[test]
    fn parse_empty_input() {
        assert!(parse_message(&[]).is_err());
    }

    #[test]
    fn infos_are_numbered() {
        let infos = record_infos(&[
            text_record(&[0x02, b'e', b'n', 0x41, 0x42]),
            NdefRecord::new(Tnf::Unknown, b"", &[0x00; 4]),
        ]);
        assert_eq!(infos[0].label, "Record 1");
        assert_eq!(infos[0].decoded_text, "AB");
        assert_eq!(infos[1].label, "Record 2");
        assert_eq!(infos[1].decoded_text, "Binary (4 B)");
    }
}
