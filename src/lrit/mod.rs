//! LRIT file synthesis.
//!
//! A [`File`] is assembled incrementally from the source packets of one APID
//! on one virtual channel. Headers are parsed as soon as enough bytes have
//! arrived because later decisions depend on them: lost packets inside an
//! image are patched with fill rows, and Rice-compressed pixel data is
//! decompressed fragment by fragment as it arrives.

pub mod headers;
pub mod rice;

use std::collections::HashMap;
use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::framing::Vcid;
use crate::msdu::Msdu;
use crate::transport::TransportHeader;
use crate::{Error, Result};

use headers::{
    parse_secondary_headers, Annotation, ImageStructure, NoaaSpecific, PrimaryHeader,
    RiceCompression, SecondaryHeader, SegmentIdentification,
};
use rice::{SzDecompressor, SzParams};

/// NOAA compression code for Rice-coded image payloads.
pub const NOAA_COMPRESSION_RICE: u8 = 1;
/// NOAA compression code for ZIP-archived payloads.
pub const NOAA_COMPRESSION_ZIP: u8 = 10;

/// Range of NOAA product ids transmitted as segmented images.
const SEGMENTED_PRODUCT_IDS: std::ops::RangeInclusive<u16> = 16..=19;

/// One application-level file recovered from the stream.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct File {
    /// Virtual channel the file arrived on.
    pub vcid: Vcid,
    /// Transport-layer header, when the file came through the pipeline.
    pub transport: Option<TransportHeader>,
    pub primary: PrimaryHeader,
    /// Secondary headers in transmission order.
    pub headers: Vec<SecondaryHeader>,
    /// Raw bytes of the secondary header region.
    #[serde(with = "serde_bytes")]
    pub raw_headers: Vec<u8>,
    /// Everything assembled so far: header region, then payload.
    #[serde(with = "serde_bytes")]
    pub raw: Vec<u8>,
    /// Payload alone; filled in by [`File::close`].
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// False when any constituent packet failed its CRC.
    pub crc_good: bool,
    /// Members of a ZIP-archived payload, once unpacked.
    pub unzipped: Option<HashMap<String, Vec<u8>>>,

    headers_populated: bool,
}

impl File {
    /// Start a file from its first packet.
    ///
    /// The packet payload opens with the 10-byte transport header, which is
    /// stripped, followed by the LRIT primary header.
    ///
    /// # Errors
    /// [`Error::NotEnoughData`] when the payload cannot hold the transport
    /// and primary headers, [`Error::InvalidPrimaryHeader`] when the primary
    /// header type is wrong, or a secondary header parse error.
    pub fn open(msdu: &Msdu, decompressor: Option<&dyn SzDecompressor>) -> Result<File> {
        let transport = TransportHeader::decode(&msdu.data)?;
        let raw = msdu.data[TransportHeader::LEN..].to_vec();

        let primary = PrimaryHeader::decode(&raw)?;
        if !primary.is_valid() {
            return Err(Error::InvalidPrimaryHeader);
        }

        let mut file = File {
            vcid: msdu.vcid,
            transport: Some(transport),
            primary,
            headers: Vec::new(),
            raw_headers: Vec::new(),
            raw,
            data: Vec::new(),
            crc_good: msdu.crc_good,
            unzipped: None,
            headers_populated: false,
        };
        file.try_populate_headers(decompressor)?;
        Ok(file)
    }

    /// Parse a complete LRIT byte buffer, headers and payload together.
    ///
    /// # Errors
    /// Same conditions as [`File::open`], minus the transport header.
    pub fn from_bytes(dat: &[u8]) -> Result<File> {
        let primary = PrimaryHeader::decode(dat)?;
        if !primary.is_valid() {
            return Err(Error::InvalidPrimaryHeader);
        }
        let (headers, raw_headers) =
            parse_secondary_headers(&dat[PrimaryHeader::LEN..], &primary)?;
        let data = dat[primary.all_headers_len as usize..].to_vec();

        Ok(File {
            vcid: 0,
            transport: None,
            primary,
            headers,
            raw_headers,
            raw: dat.to_vec(),
            data,
            crc_good: true,
            unzipped: None,
            headers_populated: true,
        })
    }

    /// Append one continuation packet.
    ///
    /// Packets failing CRC poison the whole file unless the file is already
    /// known to be an image, where a damaged row beats a dropped image.
    ///
    /// # Errors
    /// [`Error::CrcMismatch`] for a bad packet in a non-image file, or a
    /// secondary header parse error.
    pub fn append(&mut self, msdu: &Msdu, decompressor: Option<&dyn SzDecompressor>) -> Result<()> {
        if !msdu.crc_good {
            self.crc_good = false;
            if self.headers_populated && self.is_image() {
                warn!(
                    vcid = self.vcid,
                    "packet failed CRC inside an image file, continuing"
                );
            } else {
                return Err(Error::CrcMismatch);
            }
        }

        self.try_populate_headers(decompressor)?;
        self.extend_payload(&msdu.data, decompressor);
        // The header region may only now be complete.
        self.try_populate_headers(decompressor)?;
        Ok(())
    }

    /// Parse secondary headers once enough bytes are on hand, splitting any
    /// payload bytes that arrived in the same packet back out for regular
    /// (possibly decompressing) payload treatment.
    fn try_populate_headers(&mut self, decompressor: Option<&dyn SzDecompressor>) -> Result<()> {
        if self.headers_populated {
            return Ok(());
        }
        if (self.raw.len() as u64) < u64::from(self.primary.all_headers_len) {
            return Ok(());
        }

        let (headers, raw_headers) =
            parse_secondary_headers(&self.raw[PrimaryHeader::LEN..], &self.primary)?;
        self.headers = headers;
        self.raw_headers = raw_headers;
        self.headers_populated = true;

        let tail = self.raw.split_off(self.primary.all_headers_len as usize);
        self.extend_payload(&tail, decompressor);
        Ok(())
    }

    /// Add payload bytes, decompressing them first when the file is a
    /// Rice-compressed image. A codec failure substitutes one black
    /// scanline so the image keeps its shape.
    fn extend_payload(&mut self, bytes: &[u8], decompressor: Option<&dyn SzDecompressor>) {
        if bytes.is_empty() {
            return;
        }

        let Some(params) = self.rice_params() else {
            self.raw.extend_from_slice(bytes);
            return;
        };

        match decompressor {
            Some(codec) => match codec.decompress(&params, bytes) {
                Ok(scanlines) => self.raw.extend_from_slice(&scanlines),
                Err(err) => {
                    error!(
                        vcid = self.vcid,
                        %err,
                        "decompression failed, substituting a black scanline"
                    );
                    self.raw
                        .extend(std::iter::repeat(0u8).take(params.pixels_per_scanline as usize));
                }
            },
            None => {
                debug!(
                    vcid = self.vcid,
                    "no decompressor installed, passing compressed bytes through"
                );
                self.raw.extend_from_slice(bytes);
            }
        }
    }

    /// Finalize the file: split the payload out and, for images, pad any
    /// payload shortfall with fill rows up to the declared size.
    ///
    /// # Errors
    /// [`Error::IncompleteHeaders`] when the header region never completed.
    pub fn close(&mut self) -> Result<()> {
        if !self.headers_populated {
            return Err(Error::IncompleteHeaders);
        }

        self.data = self.raw[self.primary.all_headers_len as usize..].to_vec();

        if let Some(ish) = self.image_structure() {
            let num_rows = u64::from(ish.num_rows);
            let missing = self.missing_rows();
            if missing > 0 && missing < num_rows {
                debug!(
                    vcid = self.vcid,
                    missing, "padding image with fill rows to declared size"
                );
                for _ in 0..missing {
                    let row = self.fill_row();
                    self.raw.extend_from_slice(&row);
                    self.data.extend_from_slice(&row);
                }
            }
        }
        Ok(())
    }

    /// Rows still unaccounted for against the declared data length. Zero for
    /// non-image files.
    #[must_use]
    pub fn missing_rows(&self) -> u64 {
        let Some(ish) = self.image_structure() else {
            return 0;
        };
        if self.primary.file_type != 0 || ish.num_cols == 0 {
            return 0;
        }
        let have = if self.data.is_empty() {
            self.raw
                .len()
                .saturating_sub(self.primary.all_headers_len as usize)
        } else {
            self.data.len()
        };
        let missing_bytes = self.primary.data_len_bytes().saturating_sub(have as u64);
        missing_bytes / u64::from(ish.num_cols)
    }

    /// One substitute row: the most recent complete row received, or a black
    /// row when the payload holds less than one row.
    #[must_use]
    pub fn fill_row(&self) -> Vec<u8> {
        let Some(ish) = self.image_structure() else {
            return Vec::new();
        };
        let cols = ish.num_cols as usize;
        let payload = if self.data.is_empty() {
            &self.raw[usize::min(self.primary.all_headers_len as usize, self.raw.len())..]
        } else {
            &self.data[..]
        };
        if payload.len() >= cols && cols > 0 {
            payload[payload.len() - cols..].to_vec()
        } else {
            vec![0u8; cols]
        }
    }

    /// Append one fill row to the assembled payload, covering for a lost
    /// packet.
    pub fn push_fill_row(&mut self) {
        let row = self.fill_row();
        self.raw.extend_from_slice(&row);
    }

    /// True once the primary and all secondary headers are parsed.
    #[must_use]
    pub fn headers_populated(&self) -> bool {
        self.headers_populated
    }

    /// Image file: file type 0 with an image structure header.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.primary.file_type == 0 && self.image_structure().is_some()
    }

    /// Rice-compressed image: flagged compressed in the image structure, the
    /// codec parameters present, and the NOAA compression code agreeing.
    #[must_use]
    pub fn is_rice_compressed(&self) -> bool {
        self.rice_params().is_some()
    }

    fn rice_params(&self) -> Option<SzParams> {
        if !self.is_image() {
            return None;
        }
        let ish = self.image_structure()?;
        if ish.compression != 1 {
            return None;
        }
        let noaa = self.noaa_specific()?;
        if noaa.compression != NOAA_COMPRESSION_RICE {
            return None;
        }
        let rice = self.rice_compression()?;
        Some(SzParams::new(ish, rice))
    }

    /// ZIP-archived file: non-image file type with the NOAA ZIP code.
    #[must_use]
    pub fn contains_zip(&self) -> bool {
        self.primary.file_type != 0
            && self
                .noaa_specific()
                .is_some_and(|noaa| noaa.compression == NOAA_COMPRESSION_ZIP)
    }

    /// Unpack a ZIP-archived payload into `unzipped`.
    ///
    /// On failure the map is left present but empty; a file that claimed to
    /// be an archive but would not open still records that it was one.
    ///
    /// # Errors
    /// [`Error::Zip`] or [`Error::Io`] from the archive reader.
    pub fn unzip(&mut self) -> Result<()> {
        match unzip_members(&self.data) {
            Ok(members) => {
                self.unzipped = Some(members);
                Ok(())
            }
            Err(err) => {
                self.unzipped = Some(HashMap::new());
                Err(err)
            }
        }
    }

    /// Check the finalized file against its own declarations.
    ///
    /// # Errors
    /// [`Error::InvalidPrimaryHeader`], [`Error::LengthMismatch`], or
    /// [`Error::CrcMismatch`], in that order of precedence.
    pub fn validate(&self) -> Result<()> {
        if !self.primary.is_valid() {
            return Err(Error::InvalidPrimaryHeader);
        }
        if self.data.len() as u64 * 8 != self.primary.data_len_bits {
            return Err(Error::LengthMismatch {
                actual: self.data.len(),
                expected: self.primary.data_len_bytes() as usize,
            });
        }
        if !self.crc_good {
            return Err(Error::CrcMismatch);
        }
        Ok(())
    }

    /// The file's display name, from the annotation header.
    ///
    /// Segmented images get the segment sequence number suffixed so sibling
    /// segments do not collide.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        let base = self.headers.iter().find_map(|header| match header {
            SecondaryHeader::Annotation(Annotation { text, .. }) if text.contains(".lrit") => {
                Some(text.clone())
            }
            _ => None,
        })?;

        if self.is_image()
            && self
                .noaa_specific()
                .is_some_and(|noaa| SEGMENTED_PRODUCT_IDS.contains(&noaa.product_id))
        {
            if let Some(seg) = self.segment_identification() {
                let stem = base.strip_suffix(".lrit").unwrap_or(&base);
                return Some(format!("{stem}_{:03}.lrit", seg.sequence_number));
            }
        }
        Some(base)
    }

    #[must_use]
    pub fn image_structure(&self) -> Option<&ImageStructure> {
        self.headers.iter().find_map(|header| match header {
            SecondaryHeader::ImageStructure(h) => Some(h),
            _ => None,
        })
    }

    #[must_use]
    pub fn noaa_specific(&self) -> Option<&NoaaSpecific> {
        self.headers.iter().find_map(|header| match header {
            SecondaryHeader::NoaaSpecific(h) => Some(h),
            _ => None,
        })
    }

    #[must_use]
    pub fn rice_compression(&self) -> Option<&RiceCompression> {
        self.headers.iter().find_map(|header| match header {
            SecondaryHeader::RiceCompression(h) => Some(h),
            _ => None,
        })
    }

    #[must_use]
    pub fn segment_identification(&self) -> Option<&SegmentIdentification> {
        self.headers.iter().find_map(|header| match header {
            SecondaryHeader::SegmentIdentification(h) => Some(h),
            _ => None,
        })
    }
}

fn unzip_members(data: &[u8]) -> Result<HashMap<String, Vec<u8>>> {
    let mut members = HashMap::new();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data))?;
    for idx in 0..archive.len() {
        let mut member = archive.by_index(idx)?;
        let mut buf = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut buf)?;
        members.insert(member.name().to_string(), buf);
    }
    Ok(members)
}
