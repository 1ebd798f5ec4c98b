//! Source packet (MSDU) types.
//!
//! An MSDU is a CCSDS source packet: a 6-byte primary header followed by a
//! payload that may span several VCDUs. The payload of every non-fill packet
//! ends in a 2-byte CRC over the rest of the payload.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crc::calc_crc16;
use crate::framing::Vcid;
use crate::seq::{counter_diff, MSDU_COUNTER_MOD};
use crate::{Error, Result};

pub type Apid = u16;

/// APID of fill packets, which carry no content.
pub const FILL_APID: Apid = 2047;

/// MSDU primary header.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct MsduHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    pub apid: Apid,
    /// Position of this packet within a file. See the `SEQ_*` values.
    pub sequence_flag: u8,
    /// Per-APID packet counter, modulo 2^14.
    pub sequence_counter: u16,
    pub len_minus1: u16,
}

impl MsduHeader {
    /// Header length in bytes.
    pub const LEN: usize = 6;
    /// Maximum sequence counter value.
    pub const SEQ_MAX: u16 = (MSDU_COUNTER_MOD - 1) as u16;
    /// Packet continues a file started in an earlier packet.
    pub const SEQ_CONTINUATION: u8 = 0;
    /// Packet starts a file that extends through later packets.
    pub const SEQ_FIRST: u8 = 1;
    /// Packet ends a file started in an earlier packet.
    pub const SEQ_LAST: u8 = 2;
    /// Packet carries one entire file.
    pub const SEQ_UNSEGMENTED: u8 = 3;

    /// Decode from bytes.
    ///
    /// # Errors
    /// [`Error::NotEnoughData`] if `buf` holds fewer than [`Self::LEN`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: Self::LEN,
            });
        }
        let d1 = u16::from_be_bytes([buf[0], buf[1]]);
        let d2 = u16::from_be_bytes([buf[2], buf[3]]);
        let d3 = u16::from_be_bytes([buf[4], buf[5]]);

        Ok(MsduHeader {
            version: (d1 >> 13 & 0x7) as u8,
            type_flag: (d1 >> 12 & 0x1) as u8,
            has_secondary_header: (d1 >> 11 & 0x1) == 1,
            apid: d1 & 0x7ff,
            sequence_flag: (d2 >> 14 & 0x3) as u8,
            sequence_counter: d2 & 0x3fff,
            len_minus1: d3,
        })
    }

    /// Payload length in bytes. Stored on the wire minus 1, so always >= 1.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.len_minus1 as usize + 1
    }

    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.apid == FILL_APID
    }
}

/// A reassembled source packet and the channel it arrived on.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Msdu {
    pub header: MsduHeader,
    /// Payload bytes. The trailing CRC is stripped by [`Msdu::verify_crc`].
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    pub vcid: Vcid,
    /// Counter of the VCDU that completed this packet.
    pub vcdu_counter: u32,
    pub crc_good: bool,
}

impl Msdu {
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.header.sequence_flag == MsduHeader::SEQ_FIRST
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.header.sequence_flag == MsduHeader::SEQ_LAST
    }

    #[must_use]
    pub fn is_cont(&self) -> bool {
        self.header.sequence_flag == MsduHeader::SEQ_CONTINUATION
    }

    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.header.sequence_flag == MsduHeader::SEQ_UNSEGMENTED
    }

    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.header.is_fill()
    }

    /// Verify and strip the trailing CRC-16, recording the outcome in
    /// `crc_good`.
    ///
    /// Returns `false` for payloads too short to carry a CRC at all; such
    /// packets cannot be trusted regardless of configuration.
    pub fn verify_crc(&mut self) -> bool {
        if self.data.len() < 2 {
            self.crc_good = false;
            return false;
        }
        let split = self.data.len() - 2;
        let received = u16::from_be_bytes([self.data[split], self.data[split + 1]]);
        let computed = calc_crc16(&self.data[..split]);
        self.data.truncate(split);
        self.crc_good = computed == received;
        self.crc_good
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ApidSummary {
    pub count: usize,
    pub bytes: usize,
    pub missing: usize,
}

/// Tracks stats on packet iteration.
///
/// # Example
/// ```
/// use xrit::msdu::{Msdu, MsduHeader, Summary};
///
/// let msdu = Msdu {
///     header: MsduHeader::decode(&[0x00, 0x64, 0xc0, 0x00, 0x00, 0x02]).unwrap(),
///     data: vec![0x42, 0x00, 0x00],
///     vcid: 2,
///     vcdu_counter: 0,
///     crc_good: true,
/// };
/// let mut summary = Summary::default();
/// summary.add(&msdu);
/// assert_eq!(summary.count, 1);
/// ```
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub bytes: usize,
    pub missing: usize,
    pub crc_failures: usize,
    pub apids: HashMap<Apid, ApidSummary>,

    seen: HashMap<Apid, u16>,
}

impl Summary {
    pub fn add(&mut self, msdu: &Msdu) {
        self.count += 1;
        self.bytes += msdu.data.len();
        if !msdu.crc_good {
            self.crc_failures += 1;
        }

        let hdr = &msdu.header;
        let apid = self.apids.entry(hdr.apid).or_default();
        apid.count += 1;
        apid.bytes += msdu.data.len();

        if let Some(&last) = self.seen.get(&hdr.apid) {
            let missing = counter_diff(
                MSDU_COUNTER_MOD,
                u32::from(last),
                u32::from(hdr.sequence_counter),
            )
            .saturating_sub(1) as usize;
            apid.missing += missing;
            self.missing += missing;
        }
        self.seen.insert(hdr.apid, hdr.sequence_counter);
    }
}
