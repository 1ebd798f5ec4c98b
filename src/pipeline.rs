//! Four-stage decode pipeline.
//!
//! Frame demux, packet extraction, transport assembly, and file synthesis
//! each run on their own named thread, connected by bounded channels sized
//! from [`Config::chunk_size`]. A stage blocks only on its own queues and
//! owns all of its per-channel state; nothing is shared but the Rice
//! decompressor, which is pure. A stage exits when its input disconnects,
//! so dropping the frame sender drains and stops the whole pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::framing::{ExtractResult, FrameDemux, MsduExtractor, Vcid};
use crate::lrit::rice::SzDecompressor;
use crate::lrit::File;
use crate::transport::TransportAssembler;
use crate::Error;

/// Owns the stage threads of one running decode.
pub struct Pipeline {
    config: Config,
    decompressor: Option<Arc<dyn SzDecompressor>>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Pipeline {
            config,
            decompressor: None,
            handles: Vec::default(),
        }
    }

    /// Install the Rice codec used for compressed image payloads.
    #[must_use]
    pub fn with_decompressor(mut self, decompressor: Arc<dyn SzDecompressor>) -> Self {
        self.decompressor = Some(decompressor);
        self
    }

    /// Spawn all stages. `frames` carries raw 892-byte frames from the
    /// receiver; the returned channel carries finished files.
    pub fn start(&mut self, frames: Receiver<Vec<u8>>) -> Receiver<File> {
        let cap = self.config.chunk_size.max(1);
        let (vcdu_tx, vcdu_rx) = bounded(cap);
        let (msdu_tx, msdu_rx) = bounded(cap);
        let (file_tx, file_rx) = bounded(cap);
        let (out_tx, out_rx) = bounded(cap);

        let demux = FrameDemux::new(self.config.ignored_channels.clone());
        self.spawn("xrit-demux", move || {
            demux_stage(&demux, &frames, &vcdu_tx);
        });

        let mut extractor = MsduExtractor::new(self.config.continue_on_crc_failure);
        self.spawn("xrit-packets", move || {
            for vcdu in vcdu_rx {
                match extractor.handle(&vcdu) {
                    ExtractResult::Msdus(msdus) => {
                        for msdu in msdus {
                            if msdu_tx.send(msdu).is_err() {
                                return;
                            }
                        }
                    }
                    ExtractResult::Drop(reason) => {
                        debug!(vcid = vcdu.header.vcid, "frame dropped: {reason}");
                    }
                    ExtractResult::None => {}
                }
            }
        });

        let fill_missing = self.config.fill_missing_sdu_with_null;
        let decompressor = self.decompressor.clone();
        self.spawn("xrit-transport", move || {
            let mut assemblers: HashMap<Vcid, TransportAssembler> = HashMap::new();
            for msdu in msdu_rx {
                let assembler = assemblers.entry(msdu.vcid).or_insert_with(|| {
                    TransportAssembler::new(msdu.vcid, fill_missing, decompressor.clone())
                });
                if let Some(file) = assembler.handle(&msdu) {
                    if file_tx.send(file).is_err() {
                        return;
                    }
                }
            }
        });

        self.spawn("xrit-files", move || {
            for file in file_rx {
                if let Some(file) = synthesize(file) {
                    if out_tx.send(file).is_err() {
                        return;
                    }
                }
            }
        });

        out_rx
    }

    fn spawn<F>(&mut self, name: &str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(f)
            .unwrap_or_else(|err| panic!("failed to spawn {name}: {err}"));
        self.handles.push(handle);
    }

    /// Wait for every stage to drain and exit. Call after dropping the frame
    /// sender.
    pub fn shutdown(self) {
        for handle in self.handles {
            debug!("waiting for stage thread");
            handle
                .join()
                .unwrap_or_else(|err| panic!("stage thread panicked: {err:?}"));
        }
    }
}

fn demux_stage(demux: &FrameDemux, frames: &Receiver<Vec<u8>>, out: &Sender<crate::framing::Vcdu>) {
    for frame in frames {
        match demux.handle(&frame) {
            Ok(Some(vcdu)) => {
                if out.send(vcdu).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "discarding frame"),
        }
    }
}

/// Final checks on an assembled file, deciding whether it ships.
///
/// Partial output beats no output for images, so their length and CRC
/// failures downgrade to warnings. Anything else must check out exactly.
fn synthesize(mut file: File) -> Option<File> {
    match file.validate() {
        Ok(()) => {}
        Err(Error::LengthMismatch { actual, expected }) if file.is_image() => {
            warn!(
                vcid = file.vcid,
                actual, expected, "image shorter than declared, emitting anyway"
            );
        }
        Err(Error::CrcMismatch) if file.is_image() => {
            warn!(
                vcid = file.vcid,
                name = %file.name().unwrap_or_default(),
                "image failed CRC, emitting anyway"
            );
        }
        Err(err) => {
            error!(vcid = file.vcid, %err, "dropping file");
            return None;
        }
    }

    if file.contains_zip() {
        if let Err(err) = file.unzip() {
            error!(vcid = file.vcid, %err, "could not unpack archive");
        }
    }
    Some(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lrit::headers::{PrimaryHeader, SecondaryHeader};
    use crate::msdu::{Msdu, MsduHeader};
    use crate::transport::TransportHeader;

    fn text_file(crc_good: bool, declared: u64, payload: &[u8]) -> File {
        let ann = {
            let mut out = vec![SecondaryHeader::ANNOTATION];
            out.extend_from_slice(&(3u16 + 8).to_be_bytes());
            out.extend_from_slice(b"a.lrit\0\0");
            out
        };
        let all = (PrimaryHeader::LEN + ann.len()) as u32;
        let mut dat = vec![0u8];
        dat.extend_from_slice(&16u16.to_be_bytes());
        dat.push(2);
        dat.extend_from_slice(&all.to_be_bytes());
        dat.extend_from_slice(&(declared * 8).to_be_bytes());
        dat.extend(ann);
        dat.extend_from_slice(payload);

        let mut transport = 0u16.to_be_bytes().to_vec();
        transport.extend_from_slice(&(dat.len() as u64).to_be_bytes());
        transport.extend(dat);

        let msdu = Msdu {
            header: MsduHeader {
                version: 0,
                type_flag: 0,
                has_secondary_header: true,
                apid: 9,
                sequence_flag: MsduHeader::SEQ_UNSEGMENTED,
                sequence_counter: 0,
                len_minus1: 0,
            },
            data: transport,
            vcid: 1,
            vcdu_counter: 0,
            crc_good,
        };
        let mut file = File::open(&msdu, None).unwrap();
        file.close().unwrap();
        file
    }

    #[test]
    fn test_synthesize_accepts_clean_file() {
        let file = text_file(true, 4, b"text");
        assert!(synthesize(file).is_some());
    }

    #[test]
    fn test_synthesize_drops_short_non_image() {
        let file = text_file(true, 40, b"text");
        assert!(synthesize(file).is_none());
    }

    #[test]
    fn test_transport_header_roundtrip() {
        let file = text_file(true, 4, b"text");
        // 16-byte primary + 11-byte annotation + 4 payload bytes
        assert_eq!(
            file.transport,
            Some(TransportHeader {
                counter: 0,
                length: 31
            })
        );
    }
}
