//! LRIT header records.
//!
//! Every LRIT file opens with a 16-byte primary header followed by a run of
//! secondary header records, each led by a 1-byte type and a 2-byte length
//! (which counts the type and length bytes themselves). All fields are
//! big-endian.

use hifitime::{Duration, Epoch};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// LRIT primary header.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    /// Must be 0.
    pub header_type: u8,
    /// Length of this record, always 16.
    pub length: u16,
    /// 0 means image data; other codes are text, messages, and so on.
    pub file_type: u8,
    /// Total length of all header records, this one included.
    pub all_headers_len: u32,
    /// Length of the data field, in bits.
    pub data_len_bits: u64,
}

impl PrimaryHeader {
    /// Primary header length in bytes.
    pub const LEN: usize = 16;

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
        Ok(PrimaryHeader {
            header_type: dat[0],
            length: u16::from_be_bytes([dat[1], dat[2]]),
            file_type: dat[3],
            all_headers_len: u32::from_be_bytes([dat[4], dat[5], dat[6], dat[7]]),
            data_len_bits: u64::from_be_bytes([
                dat[8], dat[9], dat[10], dat[11], dat[12], dat[13], dat[14], dat[15],
            ]),
        })
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.header_type == 0
    }

    /// Declared payload length in whole bytes.
    #[must_use]
    pub fn data_len_bytes(&self) -> u64 {
        self.data_len_bits / 8
    }
}

/// Mandatory for image files: pixel geometry and compression flag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ImageStructure {
    pub length: u16,
    pub bits_per_pixel: u8,
    pub num_cols: u16,
    pub num_rows: u16,
    /// 1 means the pixel data is Rice compressed.
    pub compression: u8,
}

/// Projection and scaling of an image file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ImageNavigation {
    pub length: u16,
    pub projection_name: String,
    pub column_scaling_factor: u32,
    pub line_scaling_factor: u32,
    pub column_offset: u32,
    pub line_offset: u32,
}

/// Pixel-value to physical-value lookup, as free text.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ImageDataFunction {
    pub length: u16,
    pub text: String,
}

/// Alphanumeric annotation, usually the transmitted file name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub length: u16,
    pub text: String,
}

/// CCSDS CDS timestamp: P-field byte, days since the 1958 epoch, and
/// milliseconds of day.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub length: u16,
    pub p_field: u8,
    pub days: u16,
    pub millis: u32,
}

impl Timestamp {
    /// Number of seconds between 1958 and the hifitime 1900 epoch.
    const CCSDS_HIFIEPOCH_DELTA_SECS: u64 = 1_830_297_600;

    /// The timestamp as a [`hifitime::Epoch`].
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        let dur = Duration::compose(
            0,
            u64::from(self.days),
            0,
            0,
            Self::CCSDS_HIFIEPOCH_DELTA_SECS,
            u64::from(self.millis),
            0,
            0,
        );
        Epoch::from_utc_duration(dur)
    }
}

/// Free-text ancillary data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AncillaryText {
    pub length: u16,
    pub text: String,
}

/// Encryption key header; carries no fields of interest.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub length: u16,
}

/// Position of a segment within a multi-segment image.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentIdentification {
    pub length: u16,
    pub image_id: u16,
    pub sequence_number: u16,
    pub start_column: u16,
    pub start_line: u16,
    pub max_segment: u16,
    pub max_column: u16,
    pub max_row: u16,
}

/// NOAA product identification and compression code.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NoaaSpecific {
    pub length: u16,
    pub agency: String,
    pub product_id: u16,
    pub product_subid: u16,
    pub parameter: u16,
    /// 0 none, 1 Rice, 10 ZIP archive.
    pub compression: u8,
}

/// Describes the header structure itself, as free text.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HeaderStructureRecord {
    pub length: u16,
    pub text: String,
}

/// Rice codec parameters for compressed image payloads.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiceCompression {
    pub length: u16,
    pub flags: u16,
    pub pixels_per_block: u8,
    pub scanlines_per_packet: u8,
}

/// Original file name of a DCS product.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DcsFilename {
    pub length: u16,
    pub filename: String,
}

/// One secondary header record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum SecondaryHeader {
    ImageStructure(ImageStructure),
    ImageNavigation(ImageNavigation),
    ImageDataFunction(ImageDataFunction),
    Annotation(Annotation),
    Timestamp(Timestamp),
    AncillaryText(AncillaryText),
    Key(Key),
    SegmentIdentification(SegmentIdentification),
    NoaaSpecific(NoaaSpecific),
    HeaderStructureRecord(HeaderStructureRecord),
    RiceCompression(RiceCompression),
    DcsFilename(DcsFilename),
}

impl SecondaryHeader {
    pub const IMAGE_STRUCTURE: u8 = 1;
    pub const IMAGE_NAVIGATION: u8 = 2;
    pub const IMAGE_DATA_FUNCTION: u8 = 3;
    pub const ANNOTATION: u8 = 4;
    pub const TIMESTAMP: u8 = 5;
    pub const ANCILLARY_TEXT: u8 = 6;
    pub const KEY: u8 = 7;
    pub const SEGMENT_IDENTIFICATION: u8 = 128;
    pub const NOAA_SPECIFIC: u8 = 129;
    pub const HEADER_STRUCTURE_RECORD: u8 = 130;
    pub const RICE_COMPRESSION: u8 = 131;
    pub const DCS_FILENAME: u8 = 132;

    /// The record's type tag.
    #[must_use]
    pub fn header_type(&self) -> u8 {
        match self {
            SecondaryHeader::ImageStructure(_) => Self::IMAGE_STRUCTURE,
            SecondaryHeader::ImageNavigation(_) => Self::IMAGE_NAVIGATION,
            SecondaryHeader::ImageDataFunction(_) => Self::IMAGE_DATA_FUNCTION,
            SecondaryHeader::Annotation(_) => Self::ANNOTATION,
            SecondaryHeader::Timestamp(_) => Self::TIMESTAMP,
            SecondaryHeader::AncillaryText(_) => Self::ANCILLARY_TEXT,
            SecondaryHeader::Key(_) => Self::KEY,
            SecondaryHeader::SegmentIdentification(_) => Self::SEGMENT_IDENTIFICATION,
            SecondaryHeader::NoaaSpecific(_) => Self::NOAA_SPECIFIC,
            SecondaryHeader::HeaderStructureRecord(_) => Self::HEADER_STRUCTURE_RECORD,
            SecondaryHeader::RiceCompression(_) => Self::RICE_COMPRESSION,
            SecondaryHeader::DcsFilename(_) => Self::DCS_FILENAME,
        }
    }

    /// The record's declared length in bytes.
    #[must_use]
    pub fn len(&self) -> u16 {
        match self {
            SecondaryHeader::ImageStructure(h) => h.length,
            SecondaryHeader::ImageNavigation(h) => h.length,
            SecondaryHeader::ImageDataFunction(h) => h.length,
            SecondaryHeader::Annotation(h) => h.length,
            SecondaryHeader::Timestamp(h) => h.length,
            SecondaryHeader::AncillaryText(h) => h.length,
            SecondaryHeader::Key(h) => h.length,
            SecondaryHeader::SegmentIdentification(h) => h.length,
            SecondaryHeader::NoaaSpecific(h) => h.length,
            SecondaryHeader::HeaderStructureRecord(h) => h.length,
            SecondaryHeader::RiceCompression(h) => h.length,
            SecondaryHeader::DcsFilename(h) => h.length,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode the record at the front of `dat`.
    ///
    /// # Errors
    /// [`Error::UnknownSecondaryHeader`] for an unrecognized type tag,
    /// [`Error::InvalidSecondaryHeaderLength`] for a length that cannot hold
    /// the record, [`Error::NotEnoughData`] if `dat` ends early.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        if dat.len() < 3 {
            return Err(Error::NotEnoughData {
                actual: dat.len(),
                minimum: 3,
            });
        }
        let htype = dat[0];
        let length = u16::from_be_bytes([dat[1], dat[2]]);
        if length < 3 {
            return Err(Error::InvalidSecondaryHeaderLength(length));
        }
        if dat.len() < length as usize {
            return Err(Error::NotEnoughData {
                actual: dat.len(),
                minimum: length as usize,
            });
        }
        let body = &dat[3..length as usize];

        let need = |minimum: usize| -> Result<()> {
            if body.len() < minimum {
                Err(Error::NotEnoughData {
                    actual: body.len(),
                    minimum,
                })
            } else {
                Ok(())
            }
        };

        match htype {
            Self::IMAGE_STRUCTURE => {
                need(6)?;
                Ok(SecondaryHeader::ImageStructure(ImageStructure {
                    length,
                    bits_per_pixel: body[0],
                    num_cols: u16::from_be_bytes([body[1], body[2]]),
                    num_rows: u16::from_be_bytes([body[3], body[4]]),
                    compression: body[5],
                }))
            }
            Self::IMAGE_NAVIGATION => {
                need(48)?;
                Ok(SecondaryHeader::ImageNavigation(ImageNavigation {
                    length,
                    projection_name: text(&body[..32]),
                    column_scaling_factor: u32::from_be_bytes([
                        body[32], body[33], body[34], body[35],
                    ]),
                    line_scaling_factor: u32::from_be_bytes([
                        body[36], body[37], body[38], body[39],
                    ]),
                    column_offset: u32::from_be_bytes([body[40], body[41], body[42], body[43]]),
                    line_offset: u32::from_be_bytes([body[44], body[45], body[46], body[47]]),
                }))
            }
            Self::IMAGE_DATA_FUNCTION => Ok(SecondaryHeader::ImageDataFunction(
                ImageDataFunction {
                    length,
                    text: text(body),
                },
            )),
            Self::ANNOTATION => Ok(SecondaryHeader::Annotation(Annotation {
                length,
                text: text(body),
            })),
            Self::TIMESTAMP => {
                need(7)?;
                Ok(SecondaryHeader::Timestamp(Timestamp {
                    length,
                    p_field: body[0],
                    days: u16::from_be_bytes([body[1], body[2]]),
                    millis: u32::from_be_bytes([body[3], body[4], body[5], body[6]]),
                }))
            }
            Self::ANCILLARY_TEXT => Ok(SecondaryHeader::AncillaryText(AncillaryText {
                length,
                text: text(body),
            })),
            Self::KEY => Ok(SecondaryHeader::Key(Key { length })),
            Self::SEGMENT_IDENTIFICATION => {
                need(14)?;
                Ok(SecondaryHeader::SegmentIdentification(
                    SegmentIdentification {
                        length,
                        image_id: u16::from_be_bytes([body[0], body[1]]),
                        sequence_number: u16::from_be_bytes([body[2], body[3]]),
                        start_column: u16::from_be_bytes([body[4], body[5]]),
                        start_line: u16::from_be_bytes([body[6], body[7]]),
                        max_segment: u16::from_be_bytes([body[8], body[9]]),
                        max_column: u16::from_be_bytes([body[10], body[11]]),
                        max_row: u16::from_be_bytes([body[12], body[13]]),
                    },
                ))
            }
            Self::NOAA_SPECIFIC => {
                need(11)?;
                Ok(SecondaryHeader::NoaaSpecific(NoaaSpecific {
                    length,
                    agency: text(&body[..4]),
                    product_id: u16::from_be_bytes([body[4], body[5]]),
                    product_subid: u16::from_be_bytes([body[6], body[7]]),
                    parameter: u16::from_be_bytes([body[8], body[9]]),
                    compression: body[10],
                }))
            }
            Self::HEADER_STRUCTURE_RECORD => Ok(SecondaryHeader::HeaderStructureRecord(
                HeaderStructureRecord {
                    length,
                    text: text(body),
                },
            )),
            Self::RICE_COMPRESSION => {
                need(4)?;
                Ok(SecondaryHeader::RiceCompression(RiceCompression {
                    length,
                    flags: u16::from_be_bytes([body[0], body[1]]),
                    pixels_per_block: body[2],
                    scanlines_per_packet: body[3],
                }))
            }
            Self::DCS_FILENAME => Ok(SecondaryHeader::DcsFilename(DcsFilename {
                length,
                filename: text(body),
            })),
            other => Err(Error::UnknownSecondaryHeader(other)),
        }
    }
}

fn text(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

/// Parse the secondary header region following the primary header.
///
/// `dat` starts at the byte after the primary header. Returns the records in
/// transmission order together with the raw bytes of the region.
///
/// # Errors
/// Any [`SecondaryHeader::decode`] error, or [`Error::InvalidPrimaryHeader`]
/// when the primary header's lengths cannot describe a header region.
pub fn parse_secondary_headers(
    dat: &[u8],
    primary: &PrimaryHeader,
) -> Result<(Vec<SecondaryHeader>, Vec<u8>)> {
    let Some(total) = (primary.all_headers_len as usize).checked_sub(PrimaryHeader::LEN) else {
        return Err(Error::InvalidPrimaryHeader);
    };
    if dat.len() < total {
        return Err(Error::NotEnoughData {
            actual: dat.len(),
            minimum: total,
        });
    }

    let mut headers = Vec::new();
    let mut buf = &dat[..total];
    while !buf.is_empty() {
        let header = SecondaryHeader::decode(buf)?;
        let len = header.len() as usize;
        if len > buf.len() {
            return Err(Error::InvalidSecondaryHeaderLength(header.len()));
        }
        buf = &buf[len..];
        headers.push(header);
    }

    Ok((headers, dat[..total].to_vec()))
}
