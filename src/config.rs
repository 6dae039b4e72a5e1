//! Probe configuration.
//!
//! Tuning knobs for one scan. The host builds a `ProbeConfig` (directly or
//! from JSON handed over by the Node binding) and passes it to the `Scanner`;
//! nothing here touches disk.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MAX_CHAIN_FRAMES: usize = 64;
pub const DEFAULT_CARD_FAMILY: &str = "MIFARE DESFire EVx";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProbeConfig {
    /// Per-exchange transceive timeout.
    pub timeout_ms: u64,
    /// Upper bound on frames in one chained response, initial frame included.
    pub max_chain_frames: usize,
    /// Value recorded as `Card Type` when the card answers the probe.
    pub card_family: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_chain_frames: DEFAULT_MAX_CHAIN_FRAMES,
            card_family: DEFAULT_CARD_FAMILY.to_string(),
        }
    }
}

impl ProbeConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeoutMs must be greater than zero".into()));
        }
        if self.max_chain_frames == 0 {
            return Err(Error::Config("maxChainFrames must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
