#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Bad frame size: have {actual}, want {expected}")]
    BadFrameSize { actual: usize, expected: usize },
    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },

    #[error("Invalid first-header pointer: {0}")]
    InvalidFirstHeaderPointer(u16),

    #[error("Invalid LRIT primary header")]
    InvalidPrimaryHeader,
    #[error("Unknown secondary header type {0}")]
    UnknownSecondaryHeader(u8),
    #[error("Invalid secondary header length {0}")]
    InvalidSecondaryHeaderLength(u16),
    #[error("File headers incomplete")]
    IncompleteHeaders,

    #[error("Length mismatch: have {actual} bytes, want {expected}")]
    LengthMismatch { actual: usize, expected: usize },
    #[error("CRC mismatch")]
    CrcMismatch,

    /// Error reported by the external Rice/SZIP codec.
    #[error("Decompression failed: {0}")]
    Decompress(String),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
