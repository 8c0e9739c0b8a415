use crate::error::SplatBufferError;
use crate::layout::CompressionLevel;
use glam::Vec3;
use zerocopy::byteorder::little_endian::{F32, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 1;
pub const MIN_SUPPORTED_VERSION_MINOR: u8 = 1;

pub const HEADER_SIZE_BYTES: usize = 4096;
pub const SECTION_HEADER_SIZE_BYTES: usize = 1024;
pub const PARTIAL_BUCKET_LENGTH_BYTES: usize = 4;

pub const DEFAULT_BLOCK_SIZE: f32 = 5.0;
pub const DEFAULT_BUCKET_SIZE: u32 = 256;
pub const DEFAULT_SH_8BIT_HALF_RANGE: f32 = 1.5;

/// Leading fields of the 4096-byte buffer header; the rest of the region is zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct BufferHeader {
    pub version_major: u8,
    pub version_minor: u8,
    reserved0: [u8; 2],
    pub max_section_count: U32,
    pub section_count: U32,
    pub max_splat_count: U32,
    pub splat_count: U32,
    pub compression_level: U16,
    reserved1: [u8; 2],
    pub scene_center: [F32; 3],
    pub min_sh: F32,
    pub max_sh: F32,
}

/// Leading fields of each 1024-byte section header.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct SectionHeader {
    pub max_splat_count: U32,
    pub splat_count: U32,
    pub bucket_size: U32,
    pub bucket_count: U32,
    pub block_size: F32,
    pub bucket_storage_size_bytes: U16,
    reserved0: [u8; 2],
    pub scale_range: U32,
    pub storage_size_bytes: U32,
    pub full_bucket_count: U32,
    pub partially_filled_bucket_count: U32,
    pub sh_degree: U16,
    reserved1: [u8; 2],
}

impl BufferHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_section_count: u32,
        section_count: u32,
        max_splat_count: u32,
        splat_count: u32,
        compression_level: CompressionLevel,
        scene_center: Vec3,
        sh_range: (f32, f32),
    ) -> Self {
        Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            reserved0: [0; 2],
            max_section_count: U32::new(max_section_count),
            section_count: U32::new(section_count),
            max_splat_count: U32::new(max_splat_count),
            splat_count: U32::new(splat_count),
            compression_level: U16::new(compression_level as u16),
            reserved1: [0; 2],
            scene_center: scene_center.to_array().map(F32::new),
            min_sh: F32::new(sh_range.0),
            max_sh: F32::new(sh_range.1),
        }
    }

    /// Parses the header, rejecting unsupported versions before anything else
    /// is interpreted.
    pub fn read(bytes: &[u8]) -> Result<Self, SplatBufferError> {
        if bytes.len() >= 2 {
            check_version(bytes[0], bytes[1])?;
        }
        if bytes.len() < HEADER_SIZE_BYTES {
            return Err(SplatBufferError::Truncated {
                needed: HEADER_SIZE_BYTES,
                available: bytes.len(),
            });
        }
        let (header, _) = BufferHeader::read_from_prefix(bytes)
            .map_err(|e| SplatBufferError::CorruptHeader(format!("{:?}", e)))?;
        CompressionLevel::try_from(header.compression_level.get())?;
        if header.section_count.get() > header.max_section_count.get()
            || header.splat_count.get() > header.max_splat_count.get()
        {
            return Err(SplatBufferError::CorruptHeader(
                "Loaded counts exceed capacity".to_string(),
            ));
        }
        Ok(header)
    }

    pub fn write(&self, bytes: &mut [u8]) {
        let raw = self.as_bytes();
        bytes[..raw.len()].copy_from_slice(raw);
    }

    pub fn level(&self) -> CompressionLevel {
        // Validated in `read`, and `new` only accepts a typed level.
        CompressionLevel::try_from(self.compression_level.get()).unwrap_or_default()
    }

    pub fn scene_center(&self) -> Vec3 {
        Vec3::from_array(self.scene_center.map(|c| c.get()))
    }
}

impl SectionHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_splat_count: u32,
        splat_count: u32,
        bucket_size: u32,
        bucket_count: u32,
        block_size: f32,
        bucket_storage_size_bytes: u16,
        scale_range: u32,
        storage_size_bytes: u32,
        full_bucket_count: u32,
        partially_filled_bucket_count: u32,
        sh_degree: u16,
    ) -> Self {
        Self {
            max_splat_count: U32::new(max_splat_count),
            splat_count: U32::new(splat_count),
            bucket_size: U32::new(bucket_size),
            bucket_count: U32::new(bucket_count),
            block_size: F32::new(block_size),
            bucket_storage_size_bytes: U16::new(bucket_storage_size_bytes),
            reserved0: [0; 2],
            scale_range: U32::new(scale_range),
            storage_size_bytes: U32::new(storage_size_bytes),
            full_bucket_count: U32::new(full_bucket_count),
            partially_filled_bucket_count: U32::new(partially_filled_bucket_count),
            sh_degree: U16::new(sh_degree),
            reserved1: [0; 2],
        }
    }

    /// Parses the `index`-th section header from the full buffer bytes.
    pub fn read(bytes: &[u8], index: usize) -> Result<Self, SplatBufferError> {
        let start = section_header_offset(index);
        let end = start + SECTION_HEADER_SIZE_BYTES;
        if bytes.len() < end {
            return Err(SplatBufferError::Truncated {
                needed: end,
                available: bytes.len(),
            });
        }
        let (header, _) = SectionHeader::read_from_prefix(&bytes[start..end])
            .map_err(|e| SplatBufferError::CorruptHeader(format!("{:?}", e)))?;
        if header.splat_count.get() > header.max_splat_count.get() {
            return Err(SplatBufferError::CorruptHeader(format!(
                "Section {} loaded count exceeds capacity",
                index
            )));
        }
        Ok(header)
    }

    pub fn write(&self, bytes: &mut [u8], index: usize) {
        let start = section_header_offset(index);
        let raw = self.as_bytes();
        bytes[start..start + raw.len()].copy_from_slice(raw);
    }
}

pub fn check_version(major: u8, minor: u8) -> Result<(), SplatBufferError> {
    if major != VERSION_MAJOR || minor < MIN_SUPPORTED_VERSION_MINOR {
        return Err(SplatBufferError::VersionMismatch { major, minor });
    }
    Ok(())
}

#[inline]
pub const fn section_header_offset(index: usize) -> usize {
    HEADER_SIZE_BYTES + index * SECTION_HEADER_SIZE_BYTES
}

/// Offset of the first section data region.
#[inline]
pub const fn section_data_start(max_section_count: usize) -> usize {
    HEADER_SIZE_BYTES + max_section_count * SECTION_HEADER_SIZE_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_field_offsets() {
        let header = BufferHeader::new(
            3,
            2,
            100,
            50,
            CompressionLevel::Eighth,
            Vec3::new(1.0, 2.0, 3.0),
            (-2.0, 2.0),
        );
        let mut bytes = vec![0u8; HEADER_SIZE_BYTES];
        header.write(&mut bytes);

        assert_eq!(bytes[0], VERSION_MAJOR);
        assert_eq!(bytes[1], VERSION_MINOR);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 3);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 100);
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 50);
        assert_eq!(u16::from_le_bytes(bytes[20..22].try_into().unwrap()), 2);
        assert_eq!(f32::from_le_bytes(bytes[24..28].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(bytes[32..36].try_into().unwrap()), 3.0);
        assert_eq!(f32::from_le_bytes(bytes[36..40].try_into().unwrap()), -2.0);
        assert_eq!(f32::from_le_bytes(bytes[40..44].try_into().unwrap()), 2.0);

        let parsed = BufferHeader::read(&bytes).unwrap();
        assert_eq!(parsed.level(), CompressionLevel::Eighth);
        assert_eq!(parsed.scene_center(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_section_header_field_offsets() {
        let header = SectionHeader::new(10, 4, 256, 2, 5.0, 12, 32767, 999, 1, 1, 2);
        let mut bytes = vec![0u8; section_data_start(1)];
        header.write(&mut bytes, 0);
        let s = &bytes[HEADER_SIZE_BYTES..];
        assert_eq!(u32::from_le_bytes(s[0..4].try_into().unwrap()), 10);
        assert_eq!(u32::from_le_bytes(s[4..8].try_into().unwrap()), 4);
        assert_eq!(u32::from_le_bytes(s[8..12].try_into().unwrap()), 256);
        assert_eq!(u32::from_le_bytes(s[12..16].try_into().unwrap()), 2);
        assert_eq!(f32::from_le_bytes(s[16..20].try_into().unwrap()), 5.0);
        assert_eq!(u16::from_le_bytes(s[20..22].try_into().unwrap()), 12);
        assert_eq!(u32::from_le_bytes(s[24..28].try_into().unwrap()), 32767);
        assert_eq!(u32::from_le_bytes(s[28..32].try_into().unwrap()), 999);
        assert_eq!(u32::from_le_bytes(s[32..36].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(s[36..40].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(s[40..42].try_into().unwrap()), 2);
        assert_eq!(SectionHeader::read(&bytes, 0).unwrap().storage_size_bytes.get(), 999);
    }

    #[test]
    fn test_version_rejected_before_length() {
        let mut bytes = vec![0u8; 8];
        bytes[0] = VERSION_MAJOR + 1;
        bytes[1] = VERSION_MINOR;
        assert!(matches!(
            BufferHeader::read(&bytes),
            Err(SplatBufferError::VersionMismatch { .. })
        ));

        bytes[0] = VERSION_MAJOR;
        bytes[1] = MIN_SUPPORTED_VERSION_MINOR - 1;
        assert!(matches!(
            BufferHeader::read(&bytes),
            Err(SplatBufferError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let mut bytes = vec![0u8; 100];
        bytes[0] = VERSION_MAJOR;
        bytes[1] = VERSION_MINOR;
        assert!(matches!(
            BufferHeader::read(&bytes),
            Err(SplatBufferError::Truncated { .. })
        ));
    }
}
