use glam::Quat;
use half::f16;

pub const ZSTD_MAX_COMPRESSION_LVL: u32 = 22;

/// Zeroth-order SH basis constant used to map DC colour terms to RGB.
pub const SH_C0: f32 = 0.282_094_8;

/// Highest spherical harmonics degree the container can store.
pub const MAX_SH_DEGREE: u32 = 3;

#[inline]
pub(crate) fn clamp_u8(x: f32) -> u8 {
    x.round().clamp(0.0, 255.0) as u8
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub(crate) fn inv_sigmoid(x: f32) -> f32 {
    (x / (1.0 - x)).ln()
}

/// Coefficients per colour channel for a SH degree.
#[inline]
pub const fn dim_for_degree(deg: u32) -> usize {
    match deg {
        0 => 0,
        1 => 3,
        2 => 8,
        _ => 15,
    }
}

/// Total stored SH components (three colour channels) for a SH degree.
#[inline]
pub const fn sh_component_count(deg: u32) -> usize {
    dim_for_degree(deg) * 3
}

#[inline]
pub(crate) const fn degree_for_dim(dim: usize) -> u32 {
    if dim < 3 {
        0
    } else if dim < 8 {
        1
    } else if dim < 15 {
        2
    } else {
        3
    }
}

#[inline]
pub(crate) fn half_to_float(bits: u16) -> f32 {
    f16::from_bits(bits).to_f32()
}

#[inline]
pub(crate) fn float_to_half(x: f32) -> u16 {
    f16::from_f32(x).to_bits()
}

/// Maps `x` from `[min, max]` onto `0..=255`.
#[inline]
pub(crate) fn quantize_sh_u8(x: f32, min: f32, max: f32) -> u8 {
    clamp_u8((x - min) / (max - min) * 255.0)
}

#[inline]
pub(crate) fn dequantize_sh_u8(x: u8, min: f32, max: f32) -> f32 {
    min + (x as f32 / 255.0) * (max - min)
}

/// Bucket-relative 16-bit position quantization.
#[inline]
pub(crate) fn quantize_position(value: f32, bucket_center: f32, scale_factor: f32, scale_range: u32) -> u16 {
    let q = ((value - bucket_center) * scale_factor).round() + scale_range as f32;
    q.clamp(0.0, (2 * scale_range + 1) as f32) as u16
}

#[inline]
pub(crate) fn dequantize_position(q: u16, bucket_center: f32, scale_factor: f32, scale_range: u32) -> f32 {
    (q as f32 - scale_range as f32) / scale_factor + bucket_center
}

/// Normalizes and flips the quaternion so that its scalar part is non-negative.
#[inline]
pub(crate) fn canonical_quat(q: Quat) -> Quat {
    let q = q.normalize();
    if q.w < 0.0 {
        -q
    } else {
        q
    }
}

#[inline]
pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[inline]
pub(crate) fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32(bytes, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_quantization_bound() {
        let block_size = 5.0_f32;
        let range = 32767;
        let factor = range as f32 / (block_size / 2.0);
        for &v in &[-2.5_f32, -1.234, 0.0, 0.0001, 1.9, 2.5] {
            let q = quantize_position(v + 10.0, 10.0, factor, range);
            let back = dequantize_position(q, 10.0, factor, range);
            assert!((back - (v + 10.0)).abs() <= block_size / (2.0 * range as f32));
        }
    }

    #[test]
    fn test_position_quantization_clamps() {
        let factor = 32767.0 / 2.5;
        assert_eq!(quantize_position(-100.0, 0.0, factor, 32767), 0);
        assert_eq!(quantize_position(100.0, 0.0, factor, 32767), u16::MAX);
    }

    #[test]
    fn test_sh_u8_range() {
        assert_eq!(quantize_sh_u8(-1.5, -1.5, 1.5), 0);
        assert_eq!(quantize_sh_u8(1.5, -1.5, 1.5), 255);
        let x = dequantize_sh_u8(quantize_sh_u8(0.3, -1.5, 1.5), -1.5, 1.5);
        assert!((x - 0.3).abs() <= 3.0 / 255.0);
    }

    #[test]
    fn test_degree_dims() {
        for deg in 0..=MAX_SH_DEGREE {
            assert_eq!(degree_for_dim(dim_for_degree(deg)), deg);
        }
        assert_eq!(sh_component_count(1), 9);
        assert_eq!(sh_component_count(2), 24);
        assert_eq!(sh_component_count(3), 45);
    }

    #[test]
    fn test_canonical_quat_flips_sign() {
        let q = canonical_quat(Quat::from_xyzw(0.0, 0.0, 0.0, -2.0));
        assert_eq!(q, Quat::IDENTITY);
    }
}
