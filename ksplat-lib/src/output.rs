use crate::common::{float_to_half, quantize_sh_u8};
use crate::layout::CompressionLevel;

/// Caller-owned destination for scale, rotation and covariance reads. The
/// variant selects the output compression level.
#[derive(Debug)]
pub enum AttributeOutput<'a> {
    Float(&'a mut [f32]),
    /// IEEE half-float bit patterns.
    Half(&'a mut [u16]),
}

impl AttributeOutput<'_> {
    pub fn level(&self) -> CompressionLevel {
        match self {
            AttributeOutput::Float(_) => CompressionLevel::Raw,
            AttributeOutput::Half(_) => CompressionLevel::Half,
        }
    }

    #[inline]
    pub(crate) fn put(&mut self, index: usize, value: f32) {
        match self {
            AttributeOutput::Float(out) => out[index] = value,
            AttributeOutput::Half(out) => out[index] = float_to_half(value),
        }
    }
}

/// Destination for spherical harmonics reads. `Byte` quantizes over the
/// buffer-wide SH range.
#[derive(Debug)]
pub enum ShOutput<'a> {
    Float(&'a mut [f32]),
    Half(&'a mut [u16]),
    Byte(&'a mut [u8]),
}

impl ShOutput<'_> {
    pub fn level(&self) -> CompressionLevel {
        match self {
            ShOutput::Float(_) => CompressionLevel::Raw,
            ShOutput::Half(_) => CompressionLevel::Half,
            ShOutput::Byte(_) => CompressionLevel::Eighth,
        }
    }

    #[inline]
    pub(crate) fn put(&mut self, index: usize, value: f32, sh_range: (f32, f32)) {
        match self {
            ShOutput::Float(out) => out[index] = value,
            ShOutput::Half(out) => out[index] = float_to_half(value),
            ShOutput::Byte(out) => out[index] = quantize_sh_u8(value, sh_range.0, sh_range.1),
        }
    }
}
