//! Rice (CCSDS 121.0) decompression seam.
//!
//! The codec itself lives outside this crate. Implementations wrap an SZIP
//! library following the NOAA profile: byte buffer in, whole scanlines out.

use crate::Result;

use super::headers::{ImageStructure, RiceCompression};

/// Parameters handed to the codec, collected from the image structure and
/// Rice compression headers of the file being decompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SzParams {
    pub bits_per_pixel: u8,
    pub pixels_per_block: u8,
    /// Pixels per scanline, i.e. the image column count.
    pub pixels_per_scanline: u16,
    pub flags: u16,
}

impl SzParams {
    #[must_use]
    pub fn new(ish: &ImageStructure, rice: &RiceCompression) -> Self {
        SzParams {
            bits_per_pixel: ish.bits_per_pixel,
            pixels_per_block: rice.pixels_per_block,
            pixels_per_scanline: ish.num_cols,
            flags: rice.flags,
        }
    }
}

/// Decompresses Rice-coded pixel data.
///
/// Implementations must be pure: equal inputs give equal outputs, and no
/// state is carried between calls, so one instance may serve every virtual
/// channel at once.
pub trait SzDecompressor: Send + Sync {
    /// Decompress one packet's worth of pixel data.
    ///
    /// # Errors
    /// [`crate::Error::Decompress`] when the codec rejects the input. The
    /// caller substitutes a black scanline so image geometry is preserved.
    fn decompress(&self, params: &SzParams, data: &[u8]) -> Result<Vec<u8>>;
}
