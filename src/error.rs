//! Error types for the prober.
//!
//! Low-level failures (PC/SC, lock poisoning, malformed frames) are mapped
//! into [`Error`] at the point where they happen. The scanner converts the
//! few that are fatal for a run into a [`ScanError`], whose display string is
//! the short message handed to the presentation layer.

/// The error type for transport, codec and NDEF operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The tag does not offer the requested technology.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Connecting to the tag failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A single command/response exchange failed at the transport level.
    #[error("transceive failed: {0}")]
    Transceive(String),

    /// A response frame shorter than the two status bytes.
    #[error("empty or malformed response ({len} bytes)")]
    EmptyOrMalformed { len: usize },

    /// The card answered with an unexpected ISO 7816 status word.
    #[error("unexpected status {sw1:02X} {sw2:02X}")]
    Status { sw1: u8, sw2: u8 },

    /// The NDEF container or message could not be parsed.
    #[error("malformed NDEF data: {0}")]
    Ndef(String),

    /// The scan was cancelled before this operation could finish.
    #[error("cancelled")]
    Cancelled,

    /// Invalid probe configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A convenience `Result` alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Total failure of one scan.
///
/// Displays as `Read Error: <cause>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Read Error: {cause}")]
pub struct ScanError {
    pub cause: String,
}

impl ScanError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self { cause: cause.into() }
    }
}

impl From<Error> for ScanError {
    fn from(err: Error) -> Self {
        Self::new(err.to_string())
    }
}
