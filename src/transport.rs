//! Transport-file assembly from sequence-flagged source packets.
//!
//! Packets on one APID arrive as a start packet, continuations, and an end
//! packet (or a single standalone packet). Each run carries one LRIT file.
//! The packet sequence counter exposes losses inside a run: a gap inside an
//! image file is patched with fill rows, a gap inside anything else kills
//! the file.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::framing::Vcid;
use crate::lrit::rice::SzDecompressor;
use crate::lrit::File;
use crate::msdu::{Apid, Msdu, MsduHeader};
use crate::seq::{counter_diff, MSDU_COUNTER_MOD};
use crate::{Error, Result};

/// The 10-byte header at the front of every transport file.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub counter: u16,
    /// Declared length of the rest of the transport file, in bytes.
    pub length: u64,
}

impl TransportHeader {
    /// Header length in bytes.
    pub const LEN: usize = 10;

    /// Decode from bytes.
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
        Ok(TransportHeader {
            counter: u16::from_be_bytes([dat[0], dat[1]]),
            length: u64::from_be_bytes([
                dat[2], dat[3], dat[4], dat[5], dat[6], dat[7], dat[8], dat[9],
            ]),
        })
    }
}

/// Assembles the packets of one virtual channel into files.
///
/// Files on different APIDs interleave freely, so partial files are kept in
/// a per-APID map until their end packet arrives.
pub struct TransportAssembler {
    vcid: Vcid,
    fill_missing: bool,
    decompressor: Option<Arc<dyn SzDecompressor>>,

    files: HashMap<Apid, File>,
    last_applied: HashMap<Apid, u16>,
}

impl TransportAssembler {
    #[must_use]
    pub fn new(vcid: Vcid, fill_missing: bool, decompressor: Option<Arc<dyn SzDecompressor>>) -> Self {
        TransportAssembler {
            vcid,
            fill_missing,
            decompressor,
            files: HashMap::new(),
            last_applied: HashMap::new(),
        }
    }

    /// Drop all partial state for `apid`.
    pub fn drop_apid(&mut self, apid: Apid) {
        self.files.remove(&apid);
        self.last_applied.remove(&apid);
    }

    /// Drop all partial state.
    pub fn clear(&mut self) {
        self.files.clear();
        self.last_applied.clear();
    }

    /// Feed one packet; returns a file when this packet completes one.
    pub fn handle(&mut self, msdu: &Msdu) -> Option<File> {
        let apid = msdu.header.apid;

        match msdu.header.sequence_flag {
            MsduHeader::SEQ_FIRST => {
                if self.files.remove(&apid).is_some() {
                    warn!(vcid = self.vcid, apid, "dropping unfinished file");
                }
                self.last_applied.insert(apid, msdu.header.sequence_counter);
                match File::open(msdu, self.decompressor.as_deref()) {
                    Ok(file) => {
                        self.files.insert(apid, file);
                    }
                    Err(err) => {
                        error!(vcid = self.vcid, apid, %err, "could not start file");
                        self.drop_apid(apid);
                    }
                }
                None
            }
            MsduHeader::SEQ_CONTINUATION => {
                if !self.files.contains_key(&apid) {
                    trace!(vcid = self.vcid, apid, "continuation with no open file");
                    return None;
                }
                if !self.apply_gap(apid, msdu) {
                    return None;
                }
                self.append(apid, msdu);
                None
            }
            MsduHeader::SEQ_LAST => {
                if !self.files.contains_key(&apid) {
                    info!(
                        vcid = self.vcid,
                        apid, "end packet for a file never started"
                    );
                    return None;
                }
                if !self.apply_gap(apid, msdu) {
                    return None;
                }
                if !self.append(apid, msdu) {
                    return None;
                }
                self.finish(apid)
            }
            MsduHeader::SEQ_UNSEGMENTED => {
                if self.files.remove(&apid).is_some() {
                    warn!(vcid = self.vcid, apid, "dropping unfinished file");
                }
                self.last_applied.insert(apid, msdu.header.sequence_counter);
                match File::open(msdu, self.decompressor.as_deref()) {
                    Ok(file) => {
                        self.files.insert(apid, file);
                        self.finish(apid)
                    }
                    Err(err) => {
                        error!(vcid = self.vcid, apid, %err, "could not build file");
                        self.drop_apid(apid);
                        None
                    }
                }
            }
            flag => {
                // Unreachable for a 2-bit wire field.
                error!(vcid = self.vcid, apid, flag, "invalid sequence flag");
                None
            }
        }
    }

    /// Account for packets lost between the last applied packet and `msdu`.
    ///
    /// Returns false when the gap killed the file. Images absorb gaps as
    /// fill rows as long as the gap stays within the rows still owed; all
    /// other files are dropped, as is any file when filling is disabled.
    fn apply_gap(&mut self, apid: Apid, msdu: &Msdu) -> bool {
        let Some(&last) = self.last_applied.get(&apid) else {
            self.last_applied.insert(apid, msdu.header.sequence_counter);
            return true;
        };
        let gap = counter_diff(
            MSDU_COUNTER_MOD,
            u32::from(last),
            u32::from(msdu.header.sequence_counter),
        )
        .saturating_sub(1);
        self.last_applied.insert(apid, msdu.header.sequence_counter);
        if gap == 0 {
            return true;
        }

        info!(
            vcid = self.vcid,
            apid,
            last,
            current = msdu.header.sequence_counter,
            gap,
            "missing packets inside a file"
        );

        let Some(file) = self.files.get_mut(&apid) else {
            return true;
        };

        if !(self.fill_missing && file.headers_populated() && file.is_image()) {
            error!(
                vcid = self.vcid,
                apid, gap, "dropping file, cannot fill the gap"
            );
            self.drop_apid(apid);
            return false;
        }

        if u64::from(gap) > file.missing_rows() {
            error!(
                vcid = self.vcid,
                apid, gap, "dropping file, gap runs past its declared end"
            );
            self.drop_apid(apid);
            return false;
        }

        debug!(vcid = self.vcid, apid, gap, "filling missing packets");
        for _ in 0..gap {
            file.push_fill_row();
        }
        true
    }

    /// Append a packet to its open file. Returns false when the append
    /// failed and the file was dropped.
    fn append(&mut self, apid: Apid, msdu: &Msdu) -> bool {
        let decompressor = self.decompressor.clone();
        let Some(file) = self.files.get_mut(&apid) else {
            return false;
        };
        if let Err(err) = file.append(msdu, decompressor.as_deref()) {
            error!(vcid = self.vcid, apid, %err, "append failed, dropping file");
            self.drop_apid(apid);
            return false;
        }
        true
    }

    /// Finalize and hand off the open file for `apid`.
    fn finish(&mut self, apid: Apid) -> Option<File> {
        let mut file = self.files.remove(&apid)?;
        self.last_applied.remove(&apid);
        if let Err(err) = file.close() {
            error!(vcid = self.vcid, apid, %err, "could not finalize file");
            return None;
        }
        Some(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lrit::headers::{PrimaryHeader, SecondaryHeader};

    fn record(htype: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![htype];
        out.extend_from_slice(&((body.len() + 3) as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn lrit_bytes(file_type: u8, secondary: &[Vec<u8>], payload: &[u8]) -> Vec<u8> {
        let region: Vec<u8> = secondary.concat();
        let all = (PrimaryHeader::LEN + region.len()) as u32;
        let mut out = vec![0u8];
        out.extend_from_slice(&16u16.to_be_bytes());
        out.push(file_type);
        out.extend_from_slice(&all.to_be_bytes());
        out.extend_from_slice(&((payload.len() as u64) * 8).to_be_bytes());
        out.extend(region);
        out.extend_from_slice(payload);
        out
    }

    fn with_transport(lrit: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(TransportHeader::LEN + lrit.len());
        out.extend_from_slice(&7u16.to_be_bytes());
        out.extend_from_slice(&(lrit.len() as u64).to_be_bytes());
        out.extend_from_slice(lrit);
        out
    }

    fn msdu(apid: Apid, flag: u8, seq: u16, data: &[u8]) -> Msdu {
        Msdu {
            header: MsduHeader {
                version: 0,
                type_flag: 0,
                has_secondary_header: true,
                apid,
                sequence_flag: flag,
                sequence_counter: seq,
                len_minus1: (data.len() + 1) as u16,
            },
            data: data.to_vec(),
            vcid: 2,
            vcdu_counter: 0,
            crc_good: true,
        }
    }

    #[test]
    fn test_decode_transport_header() {
        let mut dat = 513u16.to_be_bytes().to_vec();
        dat.extend_from_slice(&40u64.to_be_bytes());
        let hdr = TransportHeader::decode(&dat).unwrap();
        assert_eq!(hdr.counter, 513);
        assert_eq!(hdr.length, 40);
        assert!(TransportHeader::decode(&dat[..4]).is_err());
    }

    #[test]
    fn test_standalone_file() {
        let mut asm = TransportAssembler::new(2, true, None);
        let lrit = lrit_bytes(
            2,
            &[record(SecondaryHeader::ANNOTATION, b"note.lrit")],
            b"hi",
        );
        let file = asm
            .handle(&msdu(
                100,
                MsduHeader::SEQ_UNSEGMENTED,
                0,
                &with_transport(&lrit),
            ))
            .expect("expected a completed file");
        assert_eq!(file.data, b"hi");
        assert_eq!(file.transport.unwrap().counter, 7);
        assert_eq!(file.name().unwrap(), "note.lrit");
    }

    #[test]
    fn test_split_file() {
        let mut asm = TransportAssembler::new(2, true, None);
        let lrit = lrit_bytes(2, &[], b"abcdefgh");
        let full = with_transport(&lrit);
        // First packet carries the transport header, primary header, and the
        // front of the payload.
        let (a, b) = full.split_at(30);

        assert!(asm.handle(&msdu(100, MsduHeader::SEQ_FIRST, 0, a)).is_none());
        let file = asm
            .handle(&msdu(100, MsduHeader::SEQ_LAST, 1, b))
            .expect("expected a completed file");
        assert_eq!(file.data, b"abcdefgh");
    }

    #[test]
    fn test_continuation_without_open_file_dropped() {
        let mut asm = TransportAssembler::new(2, true, None);
        assert!(asm
            .handle(&msdu(100, MsduHeader::SEQ_CONTINUATION, 3, b"junk"))
            .is_none());
        assert!(asm.files.is_empty());
    }

    #[test]
    fn test_start_replaces_open_file() {
        let mut asm = TransportAssembler::new(2, true, None);
        let lrit = lrit_bytes(2, &[], b"abcdefgh");
        let full = with_transport(&lrit);

        assert!(asm
            .handle(&msdu(100, MsduHeader::SEQ_FIRST, 0, &full[..28]))
            .is_none());
        // Second start on the same APID abandons the first run.
        assert!(asm
            .handle(&msdu(100, MsduHeader::SEQ_FIRST, 9, &full[..28]))
            .is_none());
        let file = asm
            .handle(&msdu(100, MsduHeader::SEQ_LAST, 10, &full[28..]))
            .expect("expected a completed file");
        assert_eq!(file.data, b"abcdefgh");
    }

    #[test]
    fn test_gap_drops_non_image() {
        let mut asm = TransportAssembler::new(2, true, None);
        let lrit = lrit_bytes(2, &[], b"abcdefgh");
        let full = with_transport(&lrit);

        assert!(asm
            .handle(&msdu(100, MsduHeader::SEQ_FIRST, 0, &full[..28]))
            .is_none());
        // Packet 1 lost.
        assert!(asm
            .handle(&msdu(100, MsduHeader::SEQ_LAST, 2, &full[28..]))
            .is_none());
        assert!(asm.files.is_empty());
    }

    #[test]
    fn test_interleaved_apids() {
        let mut asm = TransportAssembler::new(2, true, None);
        let one = with_transport(&lrit_bytes(2, &[], b"first"));
        let two = with_transport(&lrit_bytes(2, &[], b"second"));

        assert!(asm
            .handle(&msdu(100, MsduHeader::SEQ_FIRST, 0, &one[..28]))
            .is_none());
        assert!(asm
            .handle(&msdu(200, MsduHeader::SEQ_FIRST, 50, &two[..28]))
            .is_none());
        let got = asm
            .handle(&msdu(100, MsduHeader::SEQ_LAST, 1, &one[28..]))
            .expect("first file");
        assert_eq!(got.data, b"first");
        let got = asm
            .handle(&msdu(200, MsduHeader::SEQ_LAST, 51, &two[28..]))
            .expect("second file");
        assert_eq!(got.data, b"second");
    }
}
