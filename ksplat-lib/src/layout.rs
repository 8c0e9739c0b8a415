use crate::common::{sh_component_count, MAX_SH_DEGREE};
use crate::error::SplatBufferError;

/// On-disk attribute encoding shared by every section of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
pub enum CompressionLevel {
    /// f32 position/scale/rotation/SH.
    #[default]
    Raw = 0,
    /// Bucket-relative u16 positions, f16 scale/rotation/SH.
    Half = 1,
    /// As `Half`, with SH quantized to u8 over the buffer-wide range.
    Eighth = 2,
}

impl TryFrom<u16> for CompressionLevel {
    type Error = SplatBufferError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressionLevel::Raw),
            1 => Ok(CompressionLevel::Half),
            2 => Ok(CompressionLevel::Eighth),
            other => Err(SplatBufferError::UnsupportedCompressionLevel(other)),
        }
    }
}

/// Byte widths of each attribute at one compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeWidths {
    pub center: usize,
    pub scale: usize,
    pub rotation: usize,
    pub color: usize,
    pub sh_component: usize,
    pub scale_range: u32,
}

const ATTRIBUTE_WIDTHS: [AttributeWidths; 3] = [
    AttributeWidths {
        center: 12,
        scale: 12,
        rotation: 16,
        color: 4,
        sh_component: 4,
        scale_range: 1,
    },
    AttributeWidths {
        center: 6,
        scale: 6,
        rotation: 8,
        color: 4,
        sh_component: 2,
        scale_range: 32767,
    },
    AttributeWidths {
        center: 6,
        scale: 6,
        rotation: 8,
        color: 4,
        sh_component: 1,
        scale_range: 32767,
    },
];

impl CompressionLevel {
    #[inline]
    pub const fn widths(self) -> AttributeWidths {
        ATTRIBUTE_WIDTHS[self as usize]
    }

    /// Bytes used per bucket centre; zero when positions are stored verbatim.
    #[inline]
    pub const fn bucket_storage_bytes(self) -> usize {
        match self {
            CompressionLevel::Raw => 0,
            CompressionLevel::Half | CompressionLevel::Eighth => 12,
        }
    }

    #[inline]
    pub const fn uses_buckets(self) -> bool {
        self.bucket_storage_bytes() > 0
    }
}

/// Byte layout of a single splat record for a (level, SH degree) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplatLayout {
    pub level: CompressionLevel,
    pub sh_degree: u32,
    pub center_offset: usize,
    pub scale_offset: usize,
    pub rotation_offset: usize,
    pub color_offset: usize,
    pub sh_offset: usize,
    pub sh_components: usize,
    pub bytes_per_splat: usize,
}

impl SplatLayout {
    pub const fn new(level: CompressionLevel, sh_degree: u32) -> Self {
        let w = level.widths();
        let center_offset = 0;
        let scale_offset = center_offset + w.center;
        let rotation_offset = scale_offset + w.scale;
        let color_offset = rotation_offset + w.rotation;
        let sh_offset = color_offset + w.color;
        let sh_components = sh_component_count(sh_degree);
        Self {
            level,
            sh_degree,
            center_offset,
            scale_offset,
            rotation_offset,
            color_offset,
            sh_offset,
            sh_components,
            bytes_per_splat: sh_offset + sh_components * w.sh_component,
        }
    }

    pub fn checked(level: CompressionLevel, sh_degree: u32) -> Result<Self, SplatBufferError> {
        if sh_degree > MAX_SH_DEGREE {
            return Err(SplatBufferError::UnsupportedShDegree(sh_degree));
        }
        Ok(Self::new(level, sh_degree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_splat() {
        assert_eq!(SplatLayout::new(CompressionLevel::Raw, 0).bytes_per_splat, 44);
        assert_eq!(SplatLayout::new(CompressionLevel::Raw, 1).bytes_per_splat, 44 + 36);
        assert_eq!(SplatLayout::new(CompressionLevel::Half, 0).bytes_per_splat, 24);
        assert_eq!(SplatLayout::new(CompressionLevel::Half, 2).bytes_per_splat, 24 + 48);
        assert_eq!(SplatLayout::new(CompressionLevel::Eighth, 3).bytes_per_splat, 24 + 45);
    }

    #[test]
    fn test_offsets_follow_widths() {
        let l = SplatLayout::new(CompressionLevel::Half, 1);
        assert_eq!(l.scale_offset, 6);
        assert_eq!(l.rotation_offset, 12);
        assert_eq!(l.color_offset, 20);
        assert_eq!(l.sh_offset, 24);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(CompressionLevel::try_from(2).unwrap(), CompressionLevel::Eighth);
        assert!(matches!(
            CompressionLevel::try_from(3),
            Err(SplatBufferError::UnsupportedCompressionLevel(3))
        ));
        assert!(matches!(
            SplatLayout::checked(CompressionLevel::Raw, 4),
            Err(SplatBufferError::UnsupportedShDegree(4))
        ));
    }
}
