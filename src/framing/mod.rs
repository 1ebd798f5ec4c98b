//! Frame parsing and virtual-channel demultiplexing.
//!
//! A receiver hands this layer an opaque stream of 892-byte frames. Each
//! frame is one Virtual Channel Data Unit: a 6-byte header, a 2-byte M_PDU
//! header holding the first-header pointer, and an 884-byte packet zone
//! carrying source packet fragments.

mod packets;

pub use packets::{ExtractResult, MsduExtractor};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::{Error, Result};

pub type Vcid = u16;

/// VCID carrying only fill frames.
pub const FILL_VCID: Vcid = 63;
/// Total frame length in bytes.
pub const FRAME_LEN: usize = 892;
/// Length of the packet zone within a frame.
pub const PACKET_ZONE_LEN: usize = 884;

/// Contents of a VCDU primary header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VcduHeader {
    pub version: u8,
    pub scid: u8,
    pub vcid: Vcid,
    /// Per-virtual-channel frame counter, modulo 2^24.
    pub counter: u32,
    pub replay: bool,
}

impl VcduHeader {
    /// VCDU header length in bytes
    pub const LEN: usize = 6;

    /// Construct from the provided bytes.
    ///
    /// # Errors
    /// [`Error::NotEnoughData`] if `dat` holds fewer than [`Self::LEN`] bytes.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        if dat.len() < Self::LEN {
            return Err(Error::NotEnoughData {
                actual: dat.len(),
                minimum: Self::LEN,
            });
        }

        Ok(VcduHeader {
            version: (dat[0] >> 6) & 0x3,
            scid: (dat[0] & 0x3f) << 2 | (dat[1] & 0xc0) >> 6,
            vcid: Vcid::from(dat[1] & 0x3f),
            counter: u32::from_be_bytes([0, dat[2], dat[3], dat[4]]),
            replay: dat[5] & 0x80 != 0,
        })
    }
}

/// A single frame's worth of channel-access data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vcdu {
    pub header: VcduHeader,
    /// Byte offset into the packet zone where the next packet header starts,
    /// or [`Vcdu::FHP_NO_HEADER`].
    pub first_header: u16,
    /// The 884-byte packet zone.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// Set when the packet zone turned out to be undecodable.
    pub corrupt: bool,
}

impl Vcdu {
    /// First-header pointer value indicating the packet zone is pure
    /// continuation of a packet started in an earlier frame.
    pub const FHP_NO_HEADER: u16 = 2047;
    /// Largest first-header pointer that can land inside the packet zone.
    pub const FHP_MAX: u16 = PACKET_ZONE_LEN as u16 - 1;

    /// Decode one 892-byte frame.
    ///
    /// # Errors
    /// [`Error::BadFrameSize`] unless `dat` is exactly [`FRAME_LEN`] bytes.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        if dat.len() != FRAME_LEN {
            return Err(Error::BadFrameSize {
                actual: dat.len(),
                expected: FRAME_LEN,
            });
        }

        let header = VcduHeader::decode(dat)?;

        let zone = &dat[VcduHeader::LEN..];
        if zone.len() != PACKET_ZONE_LEN + 2 {
            warn!(len = zone.len(), "odd M_PDU length, want 886");
        }
        let first_header = u16::from_be_bytes([zone[0], zone[1]]) & 0x7ff;

        let data = zone[2..].to_vec();
        if data.len() != PACKET_ZONE_LEN {
            warn!(len = data.len(), "odd packet zone length, want 884");
        }

        // A first-header pointer outside the zone that is not the sentinel
        // can only come from damage upstream.
        let corrupt = first_header > Self::FHP_MAX && first_header != Self::FHP_NO_HEADER;

        Ok(Vcdu {
            header,
            first_header,
            data,
            corrupt,
        })
    }

    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.header.vcid == FILL_VCID
    }

    /// True when the packet zone contains the start of a new packet.
    #[must_use]
    pub fn has_header(&self) -> bool {
        self.first_header != Self::FHP_NO_HEADER
    }

    /// The first-header pointer either lands inside the packet zone or is the
    /// no-header sentinel; anything else means the frame is damaged.
    #[must_use]
    pub fn fhp_valid(&self) -> bool {
        self.first_header <= Self::FHP_MAX || self.first_header == Self::FHP_NO_HEADER
    }
}

/// Stateless frame-to-VCDU stage with channel filtering.
#[derive(Debug, Clone)]
pub struct FrameDemux {
    ignored: HashSet<Vcid>,
}

impl FrameDemux {
    #[must_use]
    pub fn new(ignored: HashSet<Vcid>) -> Self {
        FrameDemux { ignored }
    }

    /// Decode a frame, or `None` for frames on ignored channels.
    ///
    /// # Errors
    /// [`Error::BadFrameSize`] for inputs of the wrong length.
    pub fn handle(&self, frame: &[u8]) -> Result<Option<Vcdu>> {
        let vcdu = Vcdu::decode(frame)?;
        if self.ignored.contains(&vcdu.header.vcid) {
            trace!(vcid = vcdu.header.vcid, "ignored channel");
            return Ok(None);
        }
        Ok(Some(vcdu))
    }
}

impl Default for FrameDemux {
    fn default() -> Self {
        FrameDemux::new(HashSet::from([FILL_VCID]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_header(hdr: &[u8; 6]) -> Vec<u8> {
        let mut dat = vec![0u8; FRAME_LEN];
        dat[..6].copy_from_slice(hdr);
        dat
    }

    #[test]
    fn test_decode_vcdu_header() {
        let dat = frame_with_header(&[
            0x55, 0x61, // version 1, scid 85, vcid 33
            0x01, 0xe2, 0x40, // counter 123456
            0x80, // replay set
        ]);

        let vcdu = Vcdu::decode(&dat).unwrap();
        assert_eq!(vcdu.header.version, 1);
        assert_eq!(vcdu.header.scid, 85);
        assert_eq!(vcdu.header.vcid, 33);
        assert_eq!(vcdu.header.counter, 123_456);
        assert!(vcdu.header.replay);
        assert_eq!(vcdu.data.len(), PACKET_ZONE_LEN);
    }

    #[test]
    fn test_decode_is_pure() {
        let mut dat = frame_with_header(&[0x40, 0x02, 0x00, 0x00, 0x0a, 0x00]);
        dat[6] = 0x07;
        dat[7] = 0xff; // no-header sentinel
        let a = Vcdu::decode(&dat).unwrap();
        let b = Vcdu::decode(&dat).unwrap();
        assert_eq!(a.header, b.header);
        assert_eq!(a.first_header, b.first_header);
        assert_eq!(a.data, b.data);
        assert!(!a.has_header());
    }

    #[test]
    fn test_decode_bad_size() {
        let zult = Vcdu::decode(&[0u8; 100]);
        assert!(matches!(
            zult,
            Err(Error::BadFrameSize {
                actual: 100,
                expected: FRAME_LEN
            })
        ));
    }

    #[test]
    fn test_demux_drops_fill() {
        let dat = frame_with_header(&[0x40, 63, 0x00, 0x00, 0x01, 0x00]);
        let demux = FrameDemux::default();
        assert!(demux.handle(&dat).unwrap().is_none());
    }

    #[test]
    fn test_fhp_valid() {
        let mut dat = frame_with_header(&[0x40, 0x02, 0x00, 0x00, 0x01, 0x00]);
        dat[6] = 0x07;
        dat[7] = 0x00; // 1792, inside neither zone nor sentinel
        let vcdu = Vcdu::decode(&dat).unwrap();
        assert!(!vcdu.fhp_valid());
    }
}
