use crate::bucket::{compute_buckets, BucketSet};
use crate::buffer::SplatBuffer;
use crate::common::{float_to_half, quantize_position, quantize_sh_u8, sh_component_count, MAX_SH_DEGREE};
use crate::error::SplatBufferError;
use crate::layout::{CompressionLevel, SplatLayout};
use crate::partition::SectionPartition;
use crate::record::SplatRecord;
use crate::structures::{
    section_data_start, BufferHeader, SectionHeader, DEFAULT_BLOCK_SIZE, DEFAULT_BUCKET_SIZE,
    DEFAULT_SH_8BIT_HALF_RANGE, PARTIAL_BUCKET_LENGTH_BYTES,
};
use glam::Vec3;

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub compression_level: CompressionLevel,
    /// Upper bound on the stored SH degree; each section stores
    /// `min(sh_degree, highest degree present in the section)`.
    pub sh_degree: u32,
    /// Records with opacity below this value are dropped.
    pub minimum_alpha: u8,
    pub block_size: f32,
    pub bucket_size: u32,
    pub partition: SectionPartition,
    /// Defaults to the centre of the kept splats' bounding box.
    pub scene_center: Option<Vec3>,
    /// Overrides the 8-bit SH range computed from the input.
    pub sh_range: Option<(f32, f32)>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            compression_level: CompressionLevel::Half,
            sh_degree: 0,
            minimum_alpha: 1,
            block_size: DEFAULT_BLOCK_SIZE,
            bucket_size: DEFAULT_BUCKET_SIZE,
            partition: SectionPartition::Single,
            scene_center: None,
            sh_range: None,
        }
    }
}

/// Encoded payload of one section before it is placed in a buffer.
struct EncodedSection {
    header: SectionHeader,
    data: Vec<u8>,
}

/// Builds fully populated splat buffers from uncompressed records.
#[derive(Debug, Clone, Default)]
pub struct SplatBufferGenerator {
    options: GeneratorOptions,
}

impl SplatBufferGenerator {
    pub fn new(options: GeneratorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Partitions `records` per the configured policy and encodes them.
    pub fn generate(&self, records: Vec<SplatRecord>) -> Result<SplatBuffer, SplatBufferError> {
        let sections = self.options.partition.split(records);
        self.generate_sections(sections)
    }

    /// Encodes caller-provided sections in order.
    pub fn generate_sections(
        &self,
        sections: Vec<Vec<SplatRecord>>,
    ) -> Result<SplatBuffer, SplatBufferError> {
        let opts = &self.options;
        if opts.sh_degree > MAX_SH_DEGREE {
            return Err(SplatBufferError::UnsupportedShDegree(opts.sh_degree));
        }
        if !(opts.block_size > 0.0) || opts.bucket_size == 0 {
            return Err(SplatBufferError::InvalidOptions(format!(
                "block size {} and bucket size {} must be positive",
                opts.block_size, opts.bucket_size
            )));
        }

        let sh_range = match opts.sh_range {
            Some(range) => widen_sh_range(range),
            None => compute_sh_range(sections.iter().flatten(), opts.sh_degree),
        };

        let input_count: usize = sections.iter().map(Vec::len).sum();
        let kept: Vec<Vec<SplatRecord>> = sections
            .into_iter()
            .map(|section| {
                section
                    .into_iter()
                    .filter(|r| r.opacity() >= opts.minimum_alpha)
                    .map(|r| r.sanitized())
                    .collect::<Vec<_>>()
            })
            .filter(|section| !section.is_empty())
            .collect();

        let splat_count: usize = kept.iter().map(Vec::len).sum();
        if splat_count == 0 {
            return Err(SplatBufferError::EmptySplatSet);
        }

        let scene_center = opts.scene_center.unwrap_or_else(|| {
            let (min, max) = kept.iter().flatten().fold(
                (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
                |(lo, hi), r| (lo.min(r.position), hi.max(r.position)),
            );
            (min + max) * 0.5
        });

        let encoded: Vec<EncodedSection> = kept
            .iter()
            .enumerate()
            .map(|(i, records)| {
                let section = self.encode_section(records, sh_range)?;
                tracing::debug!(
                    section = i,
                    splats = records.len(),
                    buckets = section.header.bucket_count.get(),
                    sh_degree = section.header.sh_degree.get(),
                    bytes = section.data.len(),
                    "encoded section"
                );
                Ok(section)
            })
            .collect::<Result<_, SplatBufferError>>()?;

        let section_count = encoded.len();
        let data_start = section_data_start(section_count);
        let total = data_start + encoded.iter().map(|s| s.data.len()).sum::<usize>();

        let mut bytes = vec![0u8; total];
        let header = BufferHeader::new(
            section_count as u32,
            section_count as u32,
            splat_count as u32,
            splat_count as u32,
            opts.compression_level,
            scene_center,
            sh_range,
        );
        header.write(&mut bytes);

        let mut offset = data_start;
        for (i, section) in encoded.iter().enumerate() {
            section.header.write(&mut bytes, i);
            bytes[offset..offset + section.data.len()].copy_from_slice(&section.data);
            offset += section.data.len();
        }

        tracing::info!(
            input = input_count,
            kept = splat_count,
            sections = section_count,
            level = ?opts.compression_level,
            bytes = total,
            "generated splat buffer"
        );
        SplatBuffer::from_bytes(bytes)
    }

    fn encode_section(
        &self,
        records: &[SplatRecord],
        sh_range: (f32, f32),
    ) -> Result<EncodedSection, SplatBufferError> {
        let opts = &self.options;
        let level = opts.compression_level;
        let sh_degree = records
            .iter()
            .map(SplatRecord::sh_degree)
            .max()
            .unwrap_or(0)
            .min(opts.sh_degree);
        let layout = SplatLayout::checked(level, sh_degree)?;
        let scale_range = level.widths().scale_range;
        let scale_factor = scale_range as f32 / (opts.block_size / 2.0);

        let buckets = if level.uses_buckets() {
            compute_buckets(records, opts.block_size, opts.bucket_size)
        } else {
            BucketSet {
                bucket_size: opts.bucket_size,
                block_size: opts.block_size,
                ..Default::default()
            }
        };

        let bucket_storage = level.bucket_storage_bytes();
        let partial_bytes = buckets.partial.len() * PARTIAL_BUCKET_LENGTH_BYTES;
        let centers_bytes = buckets.bucket_count() * bucket_storage;
        let splat_bytes = records.len() * layout.bytes_per_splat;
        let storage = partial_bytes + centers_bytes + splat_bytes;
        let storage_u32 = u32::try_from(storage).map_err(|_| {
            SplatBufferError::CorruptHeader(format!("Section of {} bytes exceeds 4 GiB", storage))
        })?;

        let mut data = Vec::with_capacity(storage);
        for bucket in &buckets.partial {
            data.extend_from_slice(&(bucket.indices.len() as u32).to_le_bytes());
        }
        for bucket in buckets.iter() {
            data.extend_from_slice(bytemuck::cast_slice(&bucket.center.to_array()));
        }

        let mut row = vec![0u8; layout.bytes_per_splat];
        if level.uses_buckets() {
            for bucket in buckets.iter() {
                for &i in &bucket.indices {
                    encode_splat(
                        &records[i as usize],
                        &layout,
                        bucket.center,
                        scale_factor,
                        scale_range,
                        sh_range,
                        &mut row,
                    );
                    data.extend_from_slice(&row);
                }
            }
        } else {
            for record in records {
                encode_splat(record, &layout, Vec3::ZERO, 1.0, scale_range, sh_range, &mut row);
                data.extend_from_slice(&row);
            }
        }
        debug_assert_eq!(data.len(), storage);

        let header = SectionHeader::new(
            records.len() as u32,
            records.len() as u32,
            buckets.bucket_size,
            buckets.bucket_count() as u32,
            buckets.block_size,
            bucket_storage as u16,
            scale_range,
            storage_u32,
            buckets.full.len() as u32,
            buckets.partial.len() as u32,
            sh_degree as u16,
        );
        Ok(EncodedSection { header, data })
    }
}

/// Writes one fixed-size splat row.
fn encode_splat(
    record: &SplatRecord,
    layout: &SplatLayout,
    bucket_center: Vec3,
    scale_factor: f32,
    scale_range: u32,
    sh_range: (f32, f32),
    row: &mut [u8],
) {
    let rotation = record.rotation.normalize();
    let rotation = [rotation.w, rotation.x, rotation.y, rotation.z];

    match layout.level {
        CompressionLevel::Raw => {
            put_f32s(row, layout.center_offset, &record.position.to_array());
            put_f32s(row, layout.scale_offset, &record.scale.to_array());
            put_f32s(row, layout.rotation_offset, &rotation);
        }
        CompressionLevel::Half | CompressionLevel::Eighth => {
            let center = record.position.to_array();
            let bucket = bucket_center.to_array();
            for axis in 0..3 {
                let q = quantize_position(center[axis], bucket[axis], scale_factor, scale_range);
                put_u16(row, layout.center_offset + axis * 2, q);
            }
            for (k, s) in record.scale.to_array().into_iter().enumerate() {
                put_u16(row, layout.scale_offset + k * 2, float_to_half(s));
            }
            for (k, r) in rotation.into_iter().enumerate() {
                put_u16(row, layout.rotation_offset + k * 2, float_to_half(r));
            }
        }
    }

    row[layout.color_offset..layout.color_offset + 4].copy_from_slice(&record.color);

    for c in 0..layout.sh_components {
        let value = record.sh_component(c);
        match layout.level {
            CompressionLevel::Raw => put_f32s(row, layout.sh_offset + c * 4, &[value]),
            CompressionLevel::Half => put_u16(row, layout.sh_offset + c * 2, float_to_half(value)),
            CompressionLevel::Eighth => {
                row[layout.sh_offset + c] = quantize_sh_u8(value, sh_range.0, sh_range.1)
            }
        }
    }
}

#[inline]
fn put_f32s(row: &mut [u8], offset: usize, values: &[f32]) {
    for (k, v) in values.iter().enumerate() {
        row[offset + k * 4..offset + k * 4 + 4].copy_from_slice(&v.to_le_bytes());
    }
}

#[inline]
fn put_u16(row: &mut [u8], offset: usize, value: u16) {
    row[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Global SH range over every input coefficient up to `sh_degree`.
fn compute_sh_range<'a>(records: impl Iterator<Item = &'a SplatRecord>, sh_degree: u32) -> (f32, f32) {
    let components = sh_component_count(sh_degree);
    let (min, max) = records
        .flat_map(|r| r.sh.iter().take(components))
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if min > max {
        return (-DEFAULT_SH_8BIT_HALF_RANGE, DEFAULT_SH_8BIT_HALF_RANGE);
    }
    widen_sh_range((min, max))
}

/// Keeps the 8-bit quantization step non-zero.
fn widen_sh_range((min, max): (f32, f32)) -> (f32, f32) {
    if max - min < 1e-6 {
        let mid = (min + max) * 0.5;
        (mid - DEFAULT_SH_8BIT_HALF_RANGE, mid + DEFAULT_SH_8BIT_HALF_RANGE)
    } else {
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn record(i: usize, sh_len: usize) -> SplatRecord {
        let f = i as f32;
        SplatRecord {
            position: Vec3::new((f * 0.37).sin() * 20.0, (f * 0.11).cos() * 7.0, f * 0.05),
            scale: Vec3::new(0.01 + f * 0.001, 0.02, 0.5),
            rotation: Quat::from_euler(glam::EulerRot::XYZ, f * 0.1, f * 0.2, -f * 0.05),
            color: [(i % 256) as u8, 10, 200, 255],
            sh: (0..sh_len).map(|k| ((i + k) % 13) as f32 * 0.1 - 0.6).collect(),
        }
    }

    #[test]
    fn test_minimum_alpha_drops_records() {
        let mut records: Vec<_> = (0..10).map(|i| record(i, 0)).collect();
        records[3].color[3] = 5;
        records[7].color[3] = 0;
        let generator = SplatBufferGenerator::new(GeneratorOptions {
            minimum_alpha: 6,
            ..Default::default()
        });
        let buffer = generator.generate(records).unwrap();
        assert_eq!(buffer.splat_count(), 8);
        for i in 0..buffer.splat_count() {
            assert!(buffer.splat_color(i)[3] >= 6);
        }
        let section = buffer.section(0).unwrap();
        assert_eq!(section.max_splat_count(), 8);
        assert_eq!(section.bucket_lengths().iter().sum::<usize>(), section.max_splat_count());
    }

    #[test]
    fn test_rejects_non_positive_grid() {
        for (block_size, bucket_size) in [(0.0, 256), (-1.0, 256), (5.0, 0)] {
            let result = SplatBufferGenerator::new(GeneratorOptions {
                block_size,
                bucket_size,
                ..Default::default()
            })
            .generate(vec![record(0, 0)]);
            assert!(matches!(result, Err(SplatBufferError::InvalidOptions(_))));
        }
    }

    #[test]
    fn test_all_filtered_is_error() {
        let mut r = record(0, 0);
        r.color[3] = 0;
        let result = SplatBufferGenerator::default().generate(vec![r]);
        assert!(matches!(result, Err(SplatBufferError::EmptySplatSet)));
    }

    #[test]
    fn test_rejects_unsupported_sh_degree() {
        let generator = SplatBufferGenerator::new(GeneratorOptions {
            sh_degree: 4,
            ..Default::default()
        });
        assert!(matches!(
            generator.generate(vec![record(0, 0)]),
            Err(SplatBufferError::UnsupportedShDegree(4))
        ));
    }

    #[test]
    fn test_section_degree_clamped_to_content() {
        let generator = SplatBufferGenerator::new(GeneratorOptions {
            sh_degree: 3,
            ..Default::default()
        });
        let buffer = generator
            .generate_sections(vec![
                (0..4).map(|i| record(i, 9)).collect(),
                (0..4).map(|i| record(i, 45)).collect(),
            ])
            .unwrap();
        assert_eq!(buffer.section(0).unwrap().sh_degree(), 1);
        assert_eq!(buffer.section(1).unwrap().sh_degree(), 3);
        assert_eq!(buffer.min_sh_degree(), 1);
    }

    #[test]
    fn test_sh_range_from_input() {
        let records: Vec<_> = (0..20).map(|i| record(i, 24)).collect();
        let (min, max) = compute_sh_range(records.iter(), 2);
        assert!((min + 0.6).abs() < 1e-6);
        assert!((max - 0.6).abs() < 1e-6);
        assert_eq!(
            compute_sh_range(records.iter(), 0),
            (-DEFAULT_SH_8BIT_HALF_RANGE, DEFAULT_SH_8BIT_HALF_RANGE)
        );
    }

    #[test]
    fn test_storage_size_matches_layout() {
        let records: Vec<_> = (0..600).map(|i| record(i, 9)).collect();
        let generator = SplatBufferGenerator::new(GeneratorOptions {
            sh_degree: 1,
            compression_level: CompressionLevel::Eighth,
            bucket_size: 64,
            ..Default::default()
        });
        let buffer = generator.generate(records).unwrap();
        let s = buffer.section(0).unwrap();
        let expected = s.partially_filled_bucket_count() * 4
            + s.bucket_count() * 12
            + 600 * SplatLayout::new(CompressionLevel::Eighth, 1).bytes_per_splat;
        assert_eq!(s.storage_size_bytes(), expected);
        assert_eq!(
            buffer.as_bytes().len(),
            section_data_start(1) + expected
        );
    }
}
