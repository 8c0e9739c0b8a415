use std::{fmt, io};

#[derive(Debug)]
pub enum SplatBufferError {
    VersionMismatch { major: u8, minor: u8 },
    UnsupportedShDegree(u32),
    UnsupportedCompressionLevel(u16),
    CorruptHeader(String),
    Truncated { needed: usize, available: usize },
    SectionOutOfRange { index: usize, count: usize },
    NonMonotonicCount { current: usize, requested: usize },
    CountExceedsCapacity { requested: usize, capacity: usize },
    InvalidOptions(String),
    WriteOutOfBounds { offset: usize, len: usize, capacity: usize },
    ParseSplat(String),
    EmptySplatSet,
    ZstdCompress(String),
    ZstdDecompress(String),
    IoError(io::Error),
}

impl fmt::Display for SplatBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplatBufferError::VersionMismatch { major, minor } => {
                write!(
                    f,
                    "Unsupported splat buffer version {}.{} (expected {}.{} or newer minor)",
                    major,
                    minor,
                    crate::structures::VERSION_MAJOR,
                    crate::structures::MIN_SUPPORTED_VERSION_MINOR
                )
            }
            SplatBufferError::UnsupportedShDegree(d) => {
                write!(f, "Spherical harmonics degree {} is not supported (max 3).", d)
            }
            SplatBufferError::UnsupportedCompressionLevel(l) => {
                write!(f, "Compression level {} is not supported.", l)
            }
            SplatBufferError::CorruptHeader(e) => {
                write!(f, "Corrupt splat buffer header: {}", e)
            }
            SplatBufferError::Truncated { needed, available } => {
                write!(
                    f,
                    "Splat buffer is too short, need {} bytes, have {}",
                    needed, available
                )
            }
            SplatBufferError::SectionOutOfRange { index, count } => {
                write!(f, "Section index {} is out of range ({} sections).", index, count)
            }
            SplatBufferError::NonMonotonicCount { current, requested } => {
                write!(
                    f,
                    "Loaded counts may only grow: current {}, requested {}",
                    current, requested
                )
            }
            SplatBufferError::CountExceedsCapacity { requested, capacity } => {
                write!(
                    f,
                    "Loaded count {} exceeds capacity {}",
                    requested, capacity
                )
            }
            SplatBufferError::InvalidOptions(e) => {
                write!(f, "Invalid generator options: {}", e)
            }
            SplatBufferError::WriteOutOfBounds {
                offset,
                len,
                capacity,
            } => {
                write!(
                    f,
                    "Write of {} bytes at offset {} exceeds buffer capacity {}",
                    len, offset, capacity
                )
            }
            SplatBufferError::ParseSplat(e) => {
                write!(f, "Failed to parse splats from the buffer: {}", e)
            }
            SplatBufferError::EmptySplatSet => {
                write!(f, "No splats survived filtering.")
            }
            SplatBufferError::ZstdCompress(e) => {
                write!(f, "Zstandard compression failed: {}", e)
            }
            SplatBufferError::ZstdDecompress(e) => {
                write!(f, "Zstandard decompression failed: {}", e)
            }
            SplatBufferError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for SplatBufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SplatBufferError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SplatBufferError {
    fn from(e: io::Error) -> Self {
        SplatBufferError::IoError(e)
    }
}
