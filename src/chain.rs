//! Single exchanges and chained-response reassembly.
//!
//! DESFire splits long answers over several frames: every frame but the last
//! ends in `91 AF` and the reader asks for the next one with ADDITIONAL
//! FRAME. [`ChainReader`] drives that loop, logging each frame to the
//! [`Transcript`] before looking at it.

use crate::apdu::{Command, Response, StatusOutcome};
use crate::cancel::CancelToken;
use crate::transcript::Transcript;
use crate::transport::Transport;

/// Send one frame, log both directions and decode the reply.
///
/// Transport failures are logged as `RX Error` and reported as `None`, the
/// same as an empty or truncated frame.
pub fn exchange(
    transport: &mut dyn Transport,
    transcript: &mut Transcript,
    command: &Command,
) -> Option<Response> {
    let frame = command.encode_with_le();
    transcript.record_tx(&frame);

    let raw = match transport.transceive(&frame) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("transceive failed: {}", e);
            transcript.record_error(&e.to_string());
            return None;
        }
    };
    transcript.record_rx(&raw);

    Response::decode(&raw).ok()
}

/// How a chained read ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEnd {
    /// Final frame carried `91 00`.
    Complete,
    /// A frame carried a status other than success or more-data.
    Failed { sw1: u8, sw2: u8 },
    /// A reply was empty, truncated, or the transceive itself failed.
    NoResponse,
    /// The peer kept signalling more data past the frame cap.
    FrameLimit,
    /// Cancelled before the next continuation was sent.
    Cancelled,
}

/// Result of a chained read: every payload chunk up to the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chained {
    pub data: Vec<u8>,
    pub end: ChainEnd,
    /// Frames received, initial reply included.
    pub frames: usize,
}

impl Chained {
    pub fn is_complete(&self) -> bool {
        self.end == ChainEnd::Complete
    }

    /// Collapse the ending onto the three-way status classification.
    ///
    /// Anything that is not a clean finish counts as a failure; endings
    /// without a real status word report `00 00`.
    pub fn status(&self) -> StatusOutcome {
        match self.end {
            ChainEnd::Complete => StatusOutcome::Success,
            ChainEnd::Failed { sw1, sw2 } => StatusOutcome::Failure(sw1, sw2),
            ChainEnd::NoResponse | ChainEnd::FrameLimit | ChainEnd::Cancelled => {
                StatusOutcome::Failure(0x00, 0x00)
            }
        }
    }
}

/// The "send, check status, continue if more" loop.
pub struct ChainReader<'a> {
    continuation: Command,
    max_frames: usize,
    cancel: Option<&'a CancelToken>,
}

impl<'a> ChainReader<'a> {
    /// Reader using ADDITIONAL FRAME as the continuation command.
    pub fn new(max_frames: usize) -> Self {
        Self {
            continuation: Command::additional_frame(),
            max_frames: max_frames.max(1),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn read(
        &self,
        transport: &mut dyn Transport,
        transcript: &mut Transcript,
        initial: &Command,
    ) -> Chained {
        let mut data = Vec::new();
        let mut frames = 0;
        let mut command = initial;

        loop {
            let Some(resp) = exchange(transport, transcript, command) else {
                return Chained {
                    data,
                    end: ChainEnd::NoResponse,
                    frames,
                };
            };
            frames += 1;

            let end = match resp.outcome() {
                StatusOutcome::Success => {
                    data.extend_from_slice(&resp.payload);
                    ChainEnd::Complete
                }
                StatusOutcome::Failure(sw1, sw2) => ChainEnd::Failed { sw1, sw2 },
                StatusOutcome::MoreData => {
                    data.extend_from_slice(&resp.payload);
                    if frames >= self.max_frames {
                        tracing::warn!("chained response exceeded {} frames", self.max_frames);
                        ChainEnd::FrameLimit
                    } else if self.cancel.is_some_and(CancelToken::is_cancelled) {
                        ChainEnd::Cancelled
                    } else {
                        command = &self.continuation;
                        continue;
                    }
                }
            };

            return Chained { data, end, frames };
        }
    }
}
