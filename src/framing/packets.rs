use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::msdu::{Msdu, MsduHeader};
use crate::seq::{counter_diff, VCDU_COUNTER_MOD};

use super::{Vcdu, Vcid};

/// Per-VCID reassembly state.
#[derive(Debug, Default, Clone)]
struct VcidState {
    /// Bytes of a packet straddling frame boundaries, header included.
    pending: Vec<u8>,
    /// Counter and version of the last VCDU accepted on this channel.
    last: Option<(u32, u8)>,
}

/// Result of feeding one VCDU to the extractor.
#[derive(Debug, Clone)]
pub enum ExtractResult {
    /// The VCDU was dropped due to an error or data discontinuity.
    Drop(String),
    /// One or more packets were completed by this VCDU.
    Msdus(Vec<Msdu>),
    /// No packets completed, but the VCDU was processed successfully.
    None,
}

/// Extracts source packets from a stream of VCDUs.
///
/// A cache of partial packet bytes is kept per VCID so that packets
/// straddling frame boundaries survive; the cache is flushed whenever the
/// frame counter shows a discontinuity, since the missing frames could have
/// ended the cached packet or started a new one. Fill packets are consumed
/// silently. Every completed packet has its trailing CRC verified and
/// stripped; failures are dropped unless the extractor was built with
/// `continue_on_crc_failure`.
#[derive(Debug, Clone, Default)]
pub struct MsduExtractor {
    continue_on_crc_failure: bool,
    channels: HashMap<Vcid, VcidState>,
}

impl MsduExtractor {
    #[must_use]
    pub fn new(continue_on_crc_failure: bool) -> Self {
        MsduExtractor {
            continue_on_crc_failure,
            ..Self::default()
        }
    }

    /// Drop all per-channel state.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Add a VCDU to the stream and return any packets it completes.
    pub fn handle(&mut self, vcdu: &Vcdu) -> ExtractResult {
        let vcid = vcdu.header.vcid;
        let state = self.channels.entry(vcid).or_default();

        if let Some((last_counter, last_version)) = state.last {
            let diff = counter_diff(VCDU_COUNTER_MOD, last_counter, vcdu.header.counter);
            if diff == 0 && last_version == vcdu.header.version {
                trace!(vcid, counter = vcdu.header.counter, "duplicate VCDU");
                return ExtractResult::Drop("duplicate VCDU".into());
            }
            if diff > 1 {
                warn!(
                    vcid,
                    last = last_counter,
                    current = vcdu.header.counter,
                    missing = diff - 1,
                    "dropped VCDU, flushing partial packet"
                );
                state.pending.clear();
            }
        }
        state.last = Some((vcdu.header.counter, vcdu.header.version));

        // Pure continuation: everything belongs to the pending packet. With
        // nothing pending we are mid-gap and the bytes are unusable.
        if !vcdu.has_header() {
            if state.pending.is_empty() {
                return ExtractResult::Drop("continuation with no pending packet".into());
            }
            state.pending.extend_from_slice(&vcdu.data);
            return ExtractResult::None;
        }

        if vcdu.corrupt || !vcdu.fhp_valid() {
            warn!(
                vcid,
                fhp = vcdu.first_header,
                "invalid first-header pointer, dropping frame"
            );
            return ExtractResult::Drop("invalid first-header pointer".into());
        }
        let fhp = vcdu.first_header as usize;

        let mut completed = Vec::new();

        // Bytes before the first header finish the pending packet.
        if !state.pending.is_empty() {
            state.pending.extend_from_slice(&vcdu.data[..fhp]);
            let pending = std::mem::take(&mut state.pending);
            if pending.len() >= MsduHeader::LEN {
                // Header decode cannot fail at this length.
                if let Ok(header) = MsduHeader::decode(&pending) {
                    if header.is_fill() {
                        trace!(vcid, "fill packet spanning frames");
                    } else {
                        completed.push(Msdu {
                            header,
                            data: pending[MsduHeader::LEN..].to_vec(),
                            vcid,
                            vcdu_counter: vcdu.header.counter,
                            crc_good: false,
                        });
                    }
                }
            }
        }

        // Walk the remainder of the packet zone.
        let mut buf = &vcdu.data[fhp..];
        while buf.len() >= MsduHeader::LEN {
            let Ok(header) = MsduHeader::decode(buf) else {
                break;
            };
            let total = MsduHeader::LEN + header.payload_len();

            if header.is_fill() {
                if total > buf.len() {
                    // A fill packet claiming to extend past the zone marks
                    // the rest of the zone as fill.
                    trace!(vcid, "fill packet runs out the packet zone");
                    buf = &[];
                    break;
                }
                buf = &buf[total..];
                continue;
            }

            if total > buf.len() {
                // Packet extends into the next frame; save header and all.
                state.pending = buf.to_vec();
                buf = &[];
                break;
            }

            completed.push(Msdu {
                header,
                data: buf[MsduHeader::LEN..total].to_vec(),
                vcid,
                vcdu_counter: vcdu.header.counter,
                crc_good: false,
            });
            buf = &buf[total..];
        }

        // Fewer than 6 trailing bytes seed the next frame's pending buffer.
        if !buf.is_empty() {
            state.pending = buf.to_vec();
        }

        let mut ready = Vec::with_capacity(completed.len());
        for mut msdu in completed {
            let ok = msdu.verify_crc();
            if !ok {
                debug!(
                    vcid,
                    apid = msdu.header.apid,
                    seq = msdu.header.sequence_counter,
                    "packet CRC mismatch"
                );
                if !self.continue_on_crc_failure {
                    continue;
                }
            }
            ready.push(msdu);
        }

        if ready.is_empty() {
            ExtractResult::None
        } else {
            ExtractResult::Msdus(ready)
        }
    }
}
