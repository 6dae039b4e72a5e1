//! Ordered frame log for one probe run.

use crate::utils::to_hex;

/// Every frame sent and received during a probe, as hex lines.
///
/// Owned by a single run and passed by `&mut` to whatever sends frames, so
/// the log always matches the decisions the sequencer made.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tx(&mut self, frame: &[u8]) {
        self.push(format!("TX: {}", to_hex(frame)));
    }

    pub fn record_rx(&mut self, frame: &[u8]) {
        self.push(format!("RX: {}", to_hex(frame)));
    }

    /// A transceive that failed before any frame came back.
    pub fn record_error(&mut self, cause: &str) {
        self.push(format!("RX Error: {}", cause));
    }

    fn push(&mut self, line: String) {
        tracing::debug!("{}", line);
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Newline-joined lines, the form exposed in the report.
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}
