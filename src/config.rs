use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::framing::{Vcid, FILL_VCID};

/// Decoder configuration.
///
/// `Default` gives the stock broadcast settings; the `with_*` methods adjust
/// individual knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keep source packets whose payload CRC does not verify. Such packets
    /// taint the files they land in, see [`crate::lrit::File::crc_good`].
    pub continue_on_crc_failure: bool,
    /// Synthesize fill rows for image packets lost to sequence counter gaps.
    /// When disabled a gap drops the file, image or not.
    pub fill_missing_sdu_with_null: bool,
    /// Virtual channels dropped wholesale. VCID 63 carries only fill.
    pub ignored_channels: HashSet<Vcid>,
    /// Capacity of the bounded queues between pipeline stages.
    pub chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            continue_on_crc_failure: false,
            fill_missing_sdu_with_null: true,
            ignored_channels: HashSet::from([FILL_VCID]),
            chunk_size: 1024,
        }
    }
}

impl Config {
    pub fn with_continue_on_crc_failure(mut self, keep: bool) -> Self {
        self.continue_on_crc_failure = keep;
        self
    }

    pub fn with_fill_missing_sdu_with_null(mut self, fill: bool) -> Self {
        self.fill_missing_sdu_with_null = fill;
        self
    }

    pub fn ignore_channel(mut self, vcid: Vcid) -> Self {
        self.ignored_channels.insert(vcid);
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }
}
