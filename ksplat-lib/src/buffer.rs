use crate::common::{
    canonical_quat, dequantize_position, dequantize_sh_u8, half_to_float, read_f32, read_u16,
    read_u32, sh_component_count, MAX_SH_DEGREE,
};
use crate::error::SplatBufferError;
use crate::layout::{CompressionLevel, SplatLayout};
use crate::output::{AttributeOutput, ShOutput};
use crate::record::SplatRecord;
use crate::sh_rotation::ShRotation;
use crate::structures::{
    section_data_start, BufferHeader, SectionHeader, PARTIAL_BUCKET_LENGTH_BYTES,
};
use glam::{Mat3, Mat4, Quat, Vec3};
use std::ops::Range;

/// One section's geometry, resolved from its header.
#[derive(Debug, Clone)]
pub struct Section {
    header: SectionHeader,
    layout: SplatLayout,
    max_splat_count: usize,
    splat_count: usize,
    bucket_size: usize,
    block_size: f32,
    scale_range: u32,
    scale_factor: f32,
    full_bucket_count: usize,
    partial_bucket_count: usize,
    bucket_storage_bytes: usize,
    /// Absolute byte range of the section region.
    data: Range<usize>,
    /// Offsets relative to `data.start`.
    buckets_offset: usize,
    splats_offset: usize,
    /// Global index of local splat 0.
    global_base: usize,
    /// Start of each partial bucket, relative to the first partial splat.
    partial_starts: Vec<usize>,
}

impl Section {
    fn new(
        header: SectionHeader,
        level: CompressionLevel,
        data_start: usize,
        global_base: usize,
    ) -> Result<Self, SplatBufferError> {
        let sh_degree = header.sh_degree.get() as u32;
        if sh_degree > MAX_SH_DEGREE {
            return Err(SplatBufferError::UnsupportedShDegree(sh_degree));
        }
        let layout = SplatLayout::new(level, sh_degree);
        let max_splat_count = header.max_splat_count.get() as usize;
        let bucket_count = header.bucket_count.get() as usize;
        let full_bucket_count = header.full_bucket_count.get() as usize;
        let partial_bucket_count = header.partially_filled_bucket_count.get() as usize;
        let bucket_size = header.bucket_size.get() as usize;
        let block_size = header.block_size.get();
        let scale_range = header.scale_range.get();
        let bucket_storage_bytes = header.bucket_storage_size_bytes.get() as usize;

        if bucket_count != full_bucket_count + partial_bucket_count {
            return Err(SplatBufferError::CorruptHeader(format!(
                "Bucket count {} != {} full + {} partial",
                bucket_count, full_bucket_count, partial_bucket_count
            )));
        }
        if level.uses_buckets()
            && max_splat_count > 0
            && (bucket_size == 0 || !(block_size > 0.0) || bucket_storage_bytes < 12)
        {
            return Err(SplatBufferError::CorruptHeader(
                "Bucketed section with invalid bucket geometry".to_string(),
            ));
        }

        let buckets_offset = partial_bucket_count * PARTIAL_BUCKET_LENGTH_BYTES;
        let splats_offset = buckets_offset + bucket_count * bucket_storage_bytes;
        let needed = splats_offset + max_splat_count * layout.bytes_per_splat;
        let storage = header.storage_size_bytes.get() as usize;
        if storage < needed {
            return Err(SplatBufferError::CorruptHeader(format!(
                "Section storage {} smaller than its layout {}",
                storage, needed
            )));
        }

        Ok(Self {
            header,
            layout,
            max_splat_count,
            splat_count: header.splat_count.get() as usize,
            bucket_size,
            block_size,
            scale_range,
            scale_factor: scale_range as f32 / (block_size / 2.0),
            full_bucket_count,
            partial_bucket_count,
            bucket_storage_bytes,
            data: data_start..data_start + storage,
            buckets_offset,
            splats_offset,
            global_base,
            partial_starts: Vec::new(),
        })
    }

    pub fn max_splat_count(&self) -> usize {
        self.max_splat_count
    }

    pub fn splat_count(&self) -> usize {
        self.splat_count
    }

    pub fn sh_degree(&self) -> u32 {
        self.layout.sh_degree
    }

    pub fn layout(&self) -> &SplatLayout {
        &self.layout
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    pub fn block_size(&self) -> f32 {
        self.block_size
    }

    pub fn bucket_count(&self) -> usize {
        self.full_bucket_count + self.partial_bucket_count
    }

    pub fn full_bucket_count(&self) -> usize {
        self.full_bucket_count
    }

    pub fn partially_filled_bucket_count(&self) -> usize {
        self.partial_bucket_count
    }

    pub fn storage_size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Absolute byte range of the section region.
    pub fn data_range(&self) -> Range<usize> {
        self.data.clone()
    }

    /// Absolute offset of the first splat row.
    pub fn splat_data_offset(&self) -> usize {
        self.data.start + self.splats_offset
    }

    pub fn global_base(&self) -> usize {
        self.global_base
    }

    /// Reads the partial bucket length table; requires the section's
    /// metadata bytes to be present.
    fn load_partial_starts(&mut self, bytes: &[u8]) -> Result<(), SplatBufferError> {
        let region = &bytes[self.data.clone()];
        let mut starts = Vec::with_capacity(self.partial_bucket_count);
        let mut acc = 0usize;
        for i in 0..self.partial_bucket_count {
            starts.push(acc);
            acc += read_u32(region, i * PARTIAL_BUCKET_LENGTH_BYTES) as usize;
        }
        if self.layout.level.uses_buckets()
            && self.full_bucket_count * self.bucket_size + acc != self.max_splat_count
        {
            return Err(SplatBufferError::CorruptHeader(format!(
                "Bucket lengths cover {} splats, section holds {}",
                self.full_bucket_count * self.bucket_size + acc,
                self.max_splat_count
            )));
        }
        self.partial_starts = starts;
        Ok(())
    }

    fn bucket_index(&self, local: usize) -> usize {
        let full_splats = self.full_bucket_count * self.bucket_size;
        if local < full_splats {
            local / self.bucket_size
        } else {
            let rel = local - full_splats;
            self.full_bucket_count + self.partial_starts.partition_point(|&s| s <= rel) - 1
        }
    }

    /// Global index range of the loaded splats.
    pub fn loaded_range(&self) -> Range<usize> {
        self.global_base..self.global_base + self.splat_count
    }

    /// Lengths of every bucket in serialization order.
    pub fn bucket_lengths(&self) -> Vec<usize> {
        let full_splats = self.full_bucket_count * self.bucket_size;
        let partial = self.partial_starts.iter().enumerate().map(|(i, &start)| {
            let end = self
                .partial_starts
                .get(i + 1)
                .copied()
                .unwrap_or(self.max_splat_count - full_splats);
            end - start
        });
        std::iter::repeat(self.bucket_size)
            .take(self.full_bucket_count)
            .chain(partial)
            .collect()
    }
}

/// A versioned ksplat buffer: header, section headers and section data in one
/// owned byte arena, readable by global splat index.
#[derive(Debug, Clone)]
pub struct SplatBuffer {
    bytes: Vec<u8>,
    header: BufferHeader,
    level: CompressionLevel,
    sections: Vec<Section>,
    section_count: usize,
    splat_count: usize,
    max_splat_count: usize,
    scene_center: Vec3,
    sh_range: (f32, f32),
}

impl SplatBuffer {
    /// Wraps a complete buffer. The version is checked before any section
    /// header is read.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, SplatBufferError> {
        let mut buffer = Self::parse(bytes)?;
        for i in 0..buffer.sections.len() {
            let end = buffer.sections[i].data.end;
            if end > buffer.bytes.len() {
                return Err(SplatBufferError::Truncated {
                    needed: end,
                    available: buffer.bytes.len(),
                });
            }
            if buffer.sections[i].splat_count > 0 {
                buffer.sections[i].load_partial_starts(&buffer.bytes)?;
            }
        }
        Ok(buffer)
    }

    /// Allocates a full-size, empty buffer from its header region (header plus
    /// every section header). Loaded counts start at zero.
    pub fn allocate(header_region: &[u8]) -> Result<Self, SplatBufferError> {
        let header = BufferHeader::read(header_region)?;
        let region = section_data_start(header.max_section_count.get() as usize);
        if header_region.len() < region {
            return Err(SplatBufferError::Truncated {
                needed: region,
                available: header_region.len(),
            });
        }
        let mut buffer = Self::parse(header_region[..region].to_vec())?;
        let total = buffer.total_size();
        buffer.bytes.resize(total, 0);
        buffer.header.section_count.set(0);
        buffer.header.splat_count.set(0);
        buffer.header.write(&mut buffer.bytes);
        buffer.section_count = 0;
        buffer.splat_count = 0;
        for (i, section) in buffer.sections.iter_mut().enumerate() {
            section.header.splat_count.set(0);
            section.header.write(&mut buffer.bytes, i);
            section.splat_count = 0;
        }
        Ok(buffer)
    }

    fn parse(bytes: Vec<u8>) -> Result<Self, SplatBufferError> {
        let header = BufferHeader::read(&bytes)?;
        let level = header.level();
        let max_section_count = header.max_section_count.get() as usize;

        let mut sections = Vec::with_capacity(max_section_count);
        let mut data_start = section_data_start(max_section_count);
        let mut global_base = 0;
        for i in 0..max_section_count {
            let section_header = SectionHeader::read(&bytes, i)?;
            let section = Section::new(section_header, level, data_start, global_base)?;
            data_start = section.data.end;
            global_base += section.max_splat_count;
            sections.push(section);
        }

        let max_splat_count = header.max_splat_count.get() as usize;
        if global_base != max_splat_count {
            return Err(SplatBufferError::CorruptHeader(format!(
                "Sections hold {} splats, header declares {}",
                global_base, max_splat_count
            )));
        }

        Ok(Self {
            level,
            section_count: header.section_count.get() as usize,
            splat_count: header.splat_count.get() as usize,
            max_splat_count,
            scene_center: header.scene_center(),
            sh_range: (header.min_sh.get(), header.max_sh.get()),
            header,
            sections,
            bytes,
        })
    }

    /// Size of the header plus section headers, readable from the first
    /// `HEADER_SIZE_BYTES` of a stream.
    pub fn header_region_size(header_bytes: &[u8]) -> Result<usize, SplatBufferError> {
        let header = BufferHeader::read(header_bytes)?;
        Ok(section_data_start(header.max_section_count.get() as usize))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn total_size(&self) -> usize {
        self.sections
            .last()
            .map(|s| s.data.end)
            .unwrap_or_else(|| section_data_start(0))
    }

    pub fn splat_count(&self) -> usize {
        self.splat_count
    }

    pub fn max_splat_count(&self) -> usize {
        self.max_splat_count
    }

    pub fn section_count(&self) -> usize {
        self.section_count
    }

    pub fn max_section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn compression_level(&self) -> CompressionLevel {
        self.level
    }

    pub fn scene_center(&self) -> Vec3 {
        self.scene_center
    }

    pub fn sh_range(&self) -> (f32, f32) {
        self.sh_range
    }

    pub fn version(&self) -> (u8, u8) {
        (self.header.version_major, self.header.version_minor)
    }

    /// Lowest SH degree stored by any section.
    pub fn min_sh_degree(&self) -> u32 {
        self.sections.iter().map(Section::sh_degree).min().unwrap_or(0)
    }

    // ---- progressive population -------------------------------------------

    /// Copies `data` into the section data area. Counts are not touched; the
    /// writer publishes them afterwards with the update calls.
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), SplatBufferError> {
        let start = section_data_start(self.sections.len());
        let end = offset.checked_add(data.len()).unwrap_or(usize::MAX);
        if offset < start || end > self.bytes.len() {
            return Err(SplatBufferError::WriteOutOfBounds {
                offset,
                len: data.len(),
                capacity: self.bytes.len(),
            });
        }
        self.bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Raises the buffer-wide loaded section and splat counts.
    pub fn update_loaded_counts(
        &mut self,
        section_count: usize,
        splat_count: usize,
    ) -> Result<(), SplatBufferError> {
        check_growth(self.section_count, section_count, self.sections.len())?;
        check_growth(self.splat_count, splat_count, self.max_splat_count)?;
        self.section_count = section_count;
        self.splat_count = splat_count;
        self.header.section_count.set(section_count as u32);
        self.header.splat_count.set(splat_count as u32);
        self.header.write(&mut self.bytes);
        Ok(())
    }

    /// Raises the loaded splat count of one section. Its bytes up to the new
    /// count must already have been written.
    pub fn update_section_loaded_counts(
        &mut self,
        section_index: usize,
        splat_count: usize,
    ) -> Result<(), SplatBufferError> {
        let count = self.sections.len();
        let section = self
            .sections
            .get_mut(section_index)
            .ok_or(SplatBufferError::SectionOutOfRange {
                index: section_index,
                count,
            })?;
        check_growth(section.splat_count, splat_count, section.max_splat_count)?;
        if section.splat_count == 0 && splat_count > 0 {
            section.load_partial_starts(&self.bytes)?;
        }
        section.splat_count = splat_count;
        section.header.splat_count.set(splat_count as u32);
        section.header.write(&mut self.bytes, section_index);
        Ok(())
    }

    // ---- random access ------------------------------------------------------

    /// Section holding a global splat index. Section bases are fixed by their
    /// capacities, so the map never moves as counts grow.
    pub fn section_index_of(&self, index: usize) -> usize {
        debug_assert!(
            index < self.splat_count,
            "splat index {} out of range ({} loaded)",
            index,
            self.splat_count
        );
        self.sections.partition_point(|s| s.global_base <= index) - 1
    }

    /// Owning section and local index of a global splat index.
    fn locate(&self, index: usize) -> (&Section, usize) {
        let section = &self.sections[self.section_index_of(index)];
        (section, index - section.global_base)
    }

    #[inline]
    fn row(&self, section: &Section, local: usize) -> &[u8] {
        let region = &self.bytes[section.data.clone()];
        let start = section.splats_offset + local * section.layout.bytes_per_splat;
        &region[start..start + section.layout.bytes_per_splat]
    }

    fn bucket_center(&self, section: &Section, local: usize) -> Vec3 {
        let region = &self.bytes[section.data.clone()];
        let offset = section.buckets_offset + section.bucket_index(local) * section.bucket_storage_bytes;
        Vec3::new(
            read_f32(region, offset),
            read_f32(region, offset + 4),
            read_f32(region, offset + 8),
        )
    }

    fn decode_center(&self, section: &Section, local: usize) -> Vec3 {
        let row = self.row(section, local);
        let o = section.layout.center_offset;
        match self.level {
            CompressionLevel::Raw => Vec3::new(read_f32(row, o), read_f32(row, o + 4), read_f32(row, o + 8)),
            CompressionLevel::Half | CompressionLevel::Eighth => {
                let center = self.bucket_center(section, local).to_array();
                Vec3::from_array(std::array::from_fn(|axis| {
                    dequantize_position(
                        read_u16(row, o + axis * 2),
                        center[axis],
                        section.scale_factor,
                        section.scale_range,
                    )
                }))
            }
        }
    }

    fn decode_scale(&self, section: &Section, local: usize) -> Vec3 {
        let row = self.row(section, local);
        let o = section.layout.scale_offset;
        Vec3::from_array(std::array::from_fn(|k| match self.level {
            CompressionLevel::Raw => read_f32(row, o + k * 4),
            _ => half_to_float(read_u16(row, o + k * 2)),
        }))
    }

    /// Stored rotation, normalized.
    fn decode_rotation(&self, section: &Section, local: usize) -> Quat {
        let row = self.row(section, local);
        let o = section.layout.rotation_offset;
        let [w, x, y, z]: [f32; 4] = std::array::from_fn(|k| match self.level {
            CompressionLevel::Raw => read_f32(row, o + k * 4),
            _ => half_to_float(read_u16(row, o + k * 2)),
        });
        let q = Quat::from_xyzw(x, y, z, w);
        if q.length_squared() > 0.0 {
            q.normalize()
        } else {
            Quat::IDENTITY
        }
    }

    fn decode_color(&self, section: &Section, local: usize) -> [u8; 4] {
        let row = self.row(section, local);
        let o = section.layout.color_offset;
        [row[o], row[o + 1], row[o + 2], row[o + 3]]
    }

    /// Decodes the first `components` SH values into `out`.
    fn decode_sh(&self, section: &Section, local: usize, components: usize, out: &mut [f32]) {
        let row = self.row(section, local);
        let o = section.layout.sh_offset;
        for (c, value) in out.iter_mut().enumerate().take(components) {
            *value = match self.level {
                CompressionLevel::Raw => read_f32(row, o + c * 4),
                CompressionLevel::Half => half_to_float(read_u16(row, o + c * 2)),
                CompressionLevel::Eighth => dequantize_sh_u8(row[o + c], self.sh_range.0, self.sh_range.1),
            };
        }
    }

    pub fn splat_center(&self, index: usize, transform: Option<&Mat4>) -> Vec3 {
        let (section, local) = self.locate(index);
        let center = self.decode_center(section, local);
        match transform {
            Some(t) => t.transform_point3(center),
            None => center,
        }
    }

    /// Scale and rotation; a transform is applied to the local scale·rotation
    /// frame and decomposed again, so non-uniform transforms change both.
    pub fn splat_scale_and_rotation(&self, index: usize, transform: Option<&Mat4>) -> (Vec3, Quat) {
        let (section, local) = self.locate(index);
        let scale = self.decode_scale(section, local);
        let rotation = self.decode_rotation(section, local);
        match transform {
            Some(t) => transform_scale_rotation(t, scale, rotation),
            None => (scale, rotation),
        }
    }

    pub fn splat_color(&self, index: usize) -> [u8; 4] {
        let (section, local) = self.locate(index);
        self.decode_color(section, local)
    }

    /// Reconstructs the full record at its section's stored SH degree.
    pub fn splat_record(&self, index: usize) -> SplatRecord {
        let (section, local) = self.locate(index);
        let components = section.layout.sh_components;
        let mut sh = vec![0.0; components];
        self.decode_sh(section, local, components, &mut sh);
        SplatRecord {
            position: self.decode_center(section, local),
            scale: self.decode_scale(section, local),
            rotation: self.decode_rotation(section, local),
            color: self.decode_color(section, local),
            sh,
        }
    }

    /// Writes `x, y, z` per splat of `range` starting at splat slot `dest_offset`.
    pub fn fill_center_array(
        &self,
        out: &mut [f32],
        transform: Option<&Mat4>,
        range: Range<usize>,
        dest_offset: usize,
    ) {
        for (n, index) in range.enumerate() {
            let center = self.splat_center(index, transform);
            let d = (dest_offset + n) * 3;
            out[d..d + 3].copy_from_slice(&center.to_array());
        }
    }

    /// Writes scales (`x, y, z`) and rotations (`w, x, y, z`). Either output may
    /// be omitted. Half output from a half-encoded buffer without a transform
    /// copies the stored bits.
    pub fn fill_scale_rotation_array(
        &self,
        mut scales: Option<AttributeOutput<'_>>,
        mut rotations: Option<AttributeOutput<'_>>,
        transform: Option<&Mat4>,
        range: Range<usize>,
        dest_offset: usize,
    ) {
        let copy_bits = transform.is_none() && self.level != CompressionLevel::Raw;
        for (n, index) in range.enumerate() {
            let (section, local) = self.locate(index);
            let slot = dest_offset + n;
            let row = self.row(section, local);
            let (scale, rotation) = match transform {
                Some(t) => transform_scale_rotation(
                    t,
                    self.decode_scale(section, local),
                    self.decode_rotation(section, local),
                ),
                None => (
                    self.decode_scale(section, local),
                    self.decode_rotation(section, local),
                ),
            };

            match scales.as_mut() {
                Some(AttributeOutput::Half(out)) if copy_bits => {
                    let o = section.layout.scale_offset;
                    for k in 0..3 {
                        out[slot * 3 + k] = read_u16(row, o + k * 2);
                    }
                }
                Some(out) => {
                    for (k, v) in scale.to_array().into_iter().enumerate() {
                        out.put(slot * 3 + k, v);
                    }
                }
                None => {}
            }

            match rotations.as_mut() {
                Some(AttributeOutput::Half(out)) if copy_bits => {
                    let o = section.layout.rotation_offset;
                    for k in 0..4 {
                        out[slot * 4 + k] = read_u16(row, o + k * 2);
                    }
                }
                Some(out) => {
                    let wxyz = [rotation.w, rotation.x, rotation.y, rotation.z];
                    for (k, v) in wxyz.into_iter().enumerate() {
                        out.put(slot * 4 + k, v);
                    }
                }
                None => {}
            }
        }
    }

    /// Writes rgba per splat; splats below `minimum_alpha` get alpha zero.
    pub fn fill_color_array(&self, out: &mut [u8], minimum_alpha: u8, range: Range<usize>, dest_offset: usize) {
        for (n, index) in range.enumerate() {
            let mut color = self.splat_color(index);
            if color[3] < minimum_alpha {
                color[3] = 0;
            }
            let d = (dest_offset + n) * 4;
            out[d..d + 4].copy_from_slice(&color);
        }
    }

    /// Writes the six upper-triangular covariance terms
    /// `[xx, xy, xz, yy, yz, zz]` of `M (R S)(R S)ᵀ Mᵀ`, where `M` is the
    /// transform's linear part.
    pub fn fill_covariance_array(
        &self,
        mut out: AttributeOutput<'_>,
        transform: Option<&Mat4>,
        range: Range<usize>,
        dest_offset: usize,
    ) {
        let linear = transform.map(|t| Mat3::from_mat4(*t));
        for (n, index) in range.enumerate() {
            let (section, local) = self.locate(index);
            let scale = self.decode_scale(section, local);
            let rotation = self.decode_rotation(section, local);
            let cov = covariance(scale, rotation, linear.as_ref());
            let d = (dest_offset + n) * 6;
            for (k, v) in cov.into_iter().enumerate() {
                out.put(d + k, v);
            }
        }
    }

    /// Writes SH coefficients for `range`, rotated by the transform's rotation
    /// when one is given. The degree is clamped to the lowest degree stored by
    /// the touched sections and returned; the output stride per splat is
    /// `sh_component_count(returned degree)`.
    pub fn fill_spherical_harmonics_array(
        &self,
        mut out: ShOutput<'_>,
        degree: u32,
        transform: Option<&Mat4>,
        range: Range<usize>,
        dest_offset: usize,
    ) -> Result<u32, SplatBufferError> {
        if degree > MAX_SH_DEGREE {
            return Err(SplatBufferError::UnsupportedShDegree(degree));
        }
        if range.is_empty() {
            return Ok(degree);
        }
        let first = self.section_index_of(range.start);
        let last = self.section_index_of(range.end - 1);
        let requested = degree;
        let degree = self.sections[first..=last]
            .iter()
            .map(Section::sh_degree)
            .fold(requested, u32::min);
        if degree < requested {
            tracing::warn!(requested, stored = degree, "clamping SH degree to the stored degree");
        }
        let components = sh_component_count(degree);
        if components == 0 {
            return Ok(degree);
        }

        let rotation = transform.map(ShRotation::from_transform);
        let raw_copy = rotation.is_none() && out.level() == self.level;
        let mut decoded = [0.0f32; 45];
        let mut rotated = [0.0f32; 45];

        for (n, index) in range.enumerate() {
            let (section, local) = self.locate(index);
            let d = (dest_offset + n) * components;

            if raw_copy {
                let row = self.row(section, local);
                let o = section.layout.sh_offset;
                match &mut out {
                    ShOutput::Half(dst) => {
                        for c in 0..components {
                            dst[d + c] = read_u16(row, o + c * 2);
                        }
                        continue;
                    }
                    ShOutput::Byte(dst) => {
                        dst[d..d + components].copy_from_slice(&row[o..o + components]);
                        continue;
                    }
                    ShOutput::Float(_) => {}
                }
            }

            self.decode_sh(section, local, components, &mut decoded);
            let values = match &rotation {
                Some(r) => {
                    r.rotate(&decoded, &mut rotated, degree);
                    &rotated
                }
                None => &decoded,
            };
            for (c, &v) in values.iter().enumerate().take(components) {
                out.put(d + c, v, self.sh_range);
            }
        }
        Ok(degree)
    }
}

fn check_growth(current: usize, requested: usize, capacity: usize) -> Result<(), SplatBufferError> {
    if requested < current {
        return Err(SplatBufferError::NonMonotonicCount { current, requested });
    }
    if requested > capacity {
        return Err(SplatBufferError::CountExceedsCapacity { requested, capacity });
    }
    Ok(())
}

fn transform_scale_rotation(transform: &Mat4, scale: Vec3, rotation: Quat) -> (Vec3, Quat) {
    let local = Mat4::from_scale_rotation_translation(scale, rotation, Vec3::ZERO);
    let (scale, rotation, _) = (*transform * local).to_scale_rotation_translation();
    (scale, canonical_quat(rotation))
}

fn covariance(scale: Vec3, rotation: Quat, linear: Option<&Mat3>) -> [f32; 6] {
    let rs = Mat3::from_quat(rotation) * Mat3::from_diagonal(scale);
    let mut cov = rs * rs.transpose();
    if let Some(m) = linear {
        cov = *m * cov * m.transpose();
    }
    [
        cov.x_axis.x,
        cov.y_axis.x,
        cov.z_axis.x,
        cov.y_axis.y,
        cov.z_axis.y,
        cov.z_axis.z,
    ]
}
