use crate::buffer::SplatBuffer;
use crate::common::{clamp_u8, degree_for_dim, dim_for_degree, inv_sigmoid, sigmoid, SH_C0};
use crate::error::SplatBufferError;
use crate::record::{SplatRecord, DEFAULT_SCALE};
use foldhash::HashMap;
use foldhash::HashMapExt;
use glam::{Quat, Vec3};
use std::io::Write;

const PROPERTY_FLOAT: &[u8] = b"property float ";
const ELEMENT_VERTEX: &[u8] = b"element vertex ";

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    let line = match memchr::memchr(b'\n', &buffer[start..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            &buffer[start..start + pos]
        }
        None => {
            *offset = buffer.len();
            &buffer[start..]
        }
    };
    Some(line.trim_ascii_end())
}

#[inline(always)]
fn idx_of(hm: &HashMap<&str, usize>, name: &str) -> Result<usize, SplatBufferError> {
    hm.get(name)
        .copied()
        .ok_or_else(|| SplatBufferError::ParseSplat(format!("Missing required field: {}", name)))
}

#[inline(always)]
fn f32_at(vertex: &[u8], field: usize) -> f32 {
    let b = &vertex[field * 4..field * 4 + 4];
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Reads an optional field, falling back to `default` when the column is absent.
#[inline(always)]
fn f32_or(vertex: &[u8], field: Option<usize>, default: f32) -> f32 {
    field.map_or(default, |i| f32_at(vertex, i))
}

fn utf8(bytes: &[u8]) -> Result<&str, SplatBufferError> {
    std::str::from_utf8(bytes).map_err(|e| SplatBufferError::ParseSplat(format!("UTF-8 error: {}", e)))
}

/// Parses a binary little-endian 3DGS `.ply` into splat records.
///
/// Only `x`, `y` and `z` are required. Missing scales fall back to
/// `DEFAULT_SCALE`, missing rotations to identity, missing colour terms to
/// black and missing opacity to fully opaque.
#[inline(never)]
pub fn parse_ply(raw_data: &[u8]) -> Result<Vec<SplatRecord>, SplatBufferError> {
    let mut offset = 0;

    let line = next_line(raw_data, &mut offset)
        .ok_or_else(|| SplatBufferError::ParseSplat("No 'ply' line".to_string()))?;
    if line != b"ply" {
        return Err(SplatBufferError::ParseSplat(
            "Not a .ply file (missing 'ply' header)".to_string(),
        ));
    }

    let mut format_seen = false;
    let mut num_points: Option<usize> = None;
    let mut field_names: Vec<&[u8]> = Vec::new();
    loop {
        let line = next_line(raw_data, &mut offset).ok_or_else(|| {
            SplatBufferError::ParseSplat("No 'end_header' found before EOF".to_string())
        })?;

        if line.starts_with(b"end_header") {
            break;
        } else if line.starts_with(b"comment") || line.starts_with(b"obj_info") {
            continue;
        } else if line.starts_with(b"format ") {
            if line != b"format binary_little_endian 1.0" {
                return Err(SplatBufferError::ParseSplat(
                    "Unsupported .ply format (only binary_little_endian 1.0 is supported)".to_string(),
                ));
            }
            format_seen = true;
        } else if let Some(count) = line.strip_prefix(ELEMENT_VERTEX) {
            let count = utf8(count)?
                .trim()
                .parse()
                .map_err(|e| SplatBufferError::ParseSplat(format!("Parse error: {}", e)))?;
            num_points = Some(count);
        } else if let Some(name) = line.strip_prefix(PROPERTY_FLOAT) {
            if num_points.is_none() {
                return Err(SplatBufferError::ParseSplat(
                    "Property declared before 'element vertex'".to_string(),
                ));
            }
            field_names.push(name);
        } else {
            return Err(SplatBufferError::ParseSplat(format!(
                "Unsupported header line: {}",
                String::from_utf8_lossy(line)
            )));
        }
    }

    if !format_seen {
        return Err(SplatBufferError::ParseSplat("Missing format line".to_string()));
    }
    let num_points = num_points.ok_or_else(|| {
        SplatBufferError::ParseSplat("Missing 'element vertex' definition".to_string())
    })?;
    if num_points == 0 {
        return Ok(Vec::new());
    }

    let mut field_map: HashMap<&str, usize> = HashMap::with_capacity(field_names.len());
    for (i, &name) in field_names.iter().enumerate() {
        field_map.insert(utf8(name)?, i);
    }
    let opt = |name: &str| field_map.get(name).copied();

    let ix = idx_of(&field_map, "x")?;
    let iy = idx_of(&field_map, "y")?;
    let iz = idx_of(&field_map, "z")?;
    let scale_idx = [opt("scale_0"), opt("scale_1"), opt("scale_2")];
    let rot_idx = [opt("rot_0"), opt("rot_1"), opt("rot_2"), opt("rot_3")];
    let dc_idx = [opt("f_dc_0"), opt("f_dc_1"), opt("f_dc_2")];
    let iop = opt("opacity");

    let mut sh_idx = Vec::new();
    for i in 0..45 {
        match field_map.get(format!("f_rest_{}", i).as_str()) {
            Some(&found) => sh_idx.push(found),
            None => break,
        }
    }
    if sh_idx.len() % 3 != 0 {
        return Err(SplatBufferError::ParseSplat(
            "Incomplete spherical harmonics fields".to_string(),
        ));
    }
    // Keep whole bands only.
    let sh_dim = dim_for_degree(degree_for_dim(sh_idx.len() / 3));
    let file_dim = sh_idx.len() / 3;

    let stride = field_names.len() * 4;
    let expected_bytes = num_points
        .checked_mul(stride)
        .ok_or_else(|| SplatBufferError::ParseSplat("Overflow in byte calculation".to_string()))?;
    if raw_data.len() < offset + expected_bytes {
        return Err(SplatBufferError::ParseSplat(format!(
            "Binary data is too short, need {} bytes, have {}",
            expected_bytes,
            raw_data.len() - offset
        )));
    }

    // File SH columns are channel-major; records interleave channels per coefficient.
    let sh_indices: Vec<_> = (0..sh_dim)
        .map(|j| [sh_idx[j], sh_idx[j + file_dim], sh_idx[j + 2 * file_dim]])
        .collect();

    let data = &raw_data[offset..offset + expected_bytes];
    let mut records = Vec::with_capacity(num_points);
    for vertex in data.chunks_exact(stride) {
        let position = Vec3::new(f32_at(vertex, ix), f32_at(vertex, iy), f32_at(vertex, iz));

        let scale = Vec3::from_array(scale_idx.map(|i| match i {
            Some(i) => f32_at(vertex, i).exp(),
            None => DEFAULT_SCALE,
        }));

        let rotation = if rot_idx.iter().all(Option::is_some) {
            let [w, x, y, z] = rot_idx.map(|i| f32_or(vertex, i, 0.0));
            Quat::from_xyzw(x, y, z, w)
        } else {
            Quat::IDENTITY
        };

        let [r, g, b] = dc_idx.map(|i| match i {
            Some(i) => clamp_u8((0.5 + SH_C0 * f32_at(vertex, i)) * 255.0),
            None => 0,
        });
        let alpha = match iop {
            Some(i) => clamp_u8(sigmoid(f32_at(vertex, i)) * 255.0),
            None => 255,
        };

        let mut sh = Vec::with_capacity(sh_dim * 3);
        for channels in &sh_indices {
            sh.extend(channels.iter().map(|&i| f32_at(vertex, i)));
        }

        records.push(SplatRecord {
            position,
            scale,
            rotation,
            color: [r, g, b, alpha],
            sh,
        });
    }

    tracing::debug!(
        splats = records.len(),
        sh_degree = degree_for_dim(sh_dim),
        "parsed ply"
    );
    Ok(records)
}

/// Writes every loaded splat of `buffer` as a binary little-endian 3DGS
/// `.ply`. The SH degree is the highest stored by any section; splats from
/// lower-degree sections are zero padded.
pub fn write_ply(
    buffer: &SplatBuffer,
    include_normals: bool,
    output: &mut Vec<u8>,
) -> Result<(), SplatBufferError> {
    let num_points = buffer.splat_count();
    let sh_degree = buffer
        .sections()
        .iter()
        .map(|s| s.sh_degree())
        .max()
        .unwrap_or(0);
    let sh_dim = dim_for_degree(sh_degree);

    output.clear();
    output.extend_from_slice(b"ply\nformat binary_little_endian 1.0\n");
    writeln!(output, "element vertex {}", num_points)?;
    output.extend_from_slice(b"property float x\nproperty float y\nproperty float z\n");
    if include_normals {
        output.extend_from_slice(b"property float nx\nproperty float ny\nproperty float nz\n");
    }
    output.extend_from_slice(
        b"property float f_dc_0\nproperty float f_dc_1\nproperty float f_dc_2\n",
    );
    for i in 0..(sh_dim * 3) {
        writeln!(output, "property float f_rest_{}", i)?;
    }
    output.extend_from_slice(
        b"property float opacity\n\
          property float scale_0\nproperty float scale_1\nproperty float scale_2\n\
          property float rot_0\nproperty float rot_1\nproperty float rot_2\nproperty float rot_3\n\
          end_header\n",
    );

    let point_size = (3 + if include_normals { 3 } else { 0 } + 3 + (sh_dim * 3) + 1 + 3 + 4) * 4;
    output.reserve(num_points * point_size);

    let normals: &[u8] = bytemuck::bytes_of(&[0.0f32; 3]);
    let mut sh_coeffs = Vec::with_capacity(3 * sh_dim);
    for i in 0..num_points {
        let record = buffer.splat_record(i);

        output.extend_from_slice(bytemuck::cast_slice(&record.position.to_array()));
        if include_normals {
            output.extend_from_slice(normals);
        }

        let [r, g, b, a] = record.color;
        let dc = [r, g, b].map(|c| (c as f32 / 255.0 - 0.5) / SH_C0);
        output.extend_from_slice(bytemuck::cast_slice(&dc));

        sh_coeffs.clear();
        for channel in 0..3 {
            for j in 0..sh_dim {
                sh_coeffs.push(record.sh_component(j * 3 + channel));
            }
        }
        output.extend_from_slice(bytemuck::cast_slice(&sh_coeffs));

        let alpha = (a as f32 / 255.0).clamp(1e-4, 1.0 - 1e-4);
        output.extend_from_slice(bytemuck::bytes_of(&inv_sigmoid(alpha)));

        let scale = record.scale.to_array().map(|s| s.max(1e-9).ln());
        output.extend_from_slice(bytemuck::cast_slice(&scale));

        let q = record.rotation;
        output.extend_from_slice(bytemuck::cast_slice(&[q.w, q.x, q.y, q.z]));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{GeneratorOptions, SplatBufferGenerator};
    use crate::layout::CompressionLevel;

    fn create_test_ply() -> Vec<u8> {
        let header = b"ply
format binary_little_endian 1.0
comment exported for tests
element vertex 2
property float x
property float y
property float z
property float scale_0
property float scale_1
property float scale_2
property float rot_0
property float rot_1
property float rot_2
property float rot_3
property float opacity
property float f_dc_0
property float f_dc_1
property float f_dc_2
property float f_rest_0
property float f_rest_1
property float f_rest_2
property float f_rest_3
property float f_rest_4
property float f_rest_5
property float f_rest_6
property float f_rest_7
property float f_rest_8
end_header
";

        #[rustfmt::skip]
        let floats = [
            // x, y, z
            0.0f32, 0.1, 0.2,
            // log scale
            -4.0, -3.0, -2.0,
            // rot w, x, y, z
            1.0, 0.0, 0.0, 0.0,
            // opacity logit
            0.0,
            // f_dc
            0.0, 1.0, -1.0,
            // f_rest, channel-major: r0 r1 r2 g0 g1 g2 b0 b1 b2
            0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9,

            1.0, 2.0, 3.0,
            0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
            10.0,
            0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ];

        let mut raw_ply = Vec::new();
        raw_ply.extend_from_slice(header);
        raw_ply.extend_from_slice(bytemuck::cast_slice(&floats));
        raw_ply
    }

    #[test]
    fn test_parse_empty_ply() {
        let data = b"ply\nformat binary_little_endian 1.0\nelement vertex 0\nproperty float x\nend_header";
        let records = parse_ply(data).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_fields() {
        let records = parse_ply(&create_test_ply()).unwrap();
        assert_eq!(records.len(), 2);

        let r = &records[0];
        assert_eq!(r.position, Vec3::new(0.0, 0.1, 0.2));
        assert!((r.scale.x - (-4.0f32).exp()).abs() < 1e-7);
        assert_eq!(r.rotation, Quat::IDENTITY);
        assert_eq!(r.color[0], 128);
        assert_eq!(r.color[1], clamp_u8((0.5 + SH_C0) * 255.0));
        assert_eq!(r.color[3], 128);
        // Interleaved per coefficient.
        assert_eq!(r.sh, vec![0.1, 0.4, 0.7, 0.2, 0.5, 0.8, 0.3, 0.6, 0.9]);
        assert_eq!(r.sh_degree(), 1);

        let r = &records[1];
        assert_eq!(r.rotation, Quat::from_xyzw(0.0, 0.0, 1.0, 0.0));
        assert_eq!(r.color[3], 255);
    }

    #[test]
    fn test_parse_defaults_for_missing_fields() {
        let mut ply = b"ply\nformat binary_little_endian 1.0\nelement vertex 1\n\
property float x\nproperty float y\nproperty float z\nend_header\n"
            .to_vec();
        ply.extend_from_slice(bytemuck::cast_slice(&[1.0f32, 2.0, 3.0]));

        let records = parse_ply(&ply).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(r.scale, Vec3::splat(DEFAULT_SCALE));
        assert_eq!(r.rotation, Quat::IDENTITY);
        assert_eq!(r.color, [0, 0, 0, 255]);
        assert!(r.sh.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_ply(b"plx\n").is_err());
        assert!(parse_ply(b"ply\nformat ascii 1.0\nelement vertex 1\nend_header\n").is_err());

        let missing_y = b"ply\nformat binary_little_endian 1.0\nelement vertex 1\n\
property float x\nproperty float z\nend_header\n\0\0\0\0\0\0\0\0";
        assert!(matches!(parse_ply(missing_y), Err(SplatBufferError::ParseSplat(_))));

        let mut short = create_test_ply();
        short.truncate(short.len() - 4);
        assert!(matches!(parse_ply(&short), Err(SplatBufferError::ParseSplat(_))));
    }

    #[test]
    fn test_write_then_parse() {
        let records = parse_ply(&create_test_ply()).unwrap();
        let buffer = SplatBufferGenerator::new(GeneratorOptions {
            compression_level: CompressionLevel::Raw,
            sh_degree: 1,
            ..Default::default()
        })
        .generate(records.clone())
        .unwrap();

        let mut out = Vec::new();
        write_ply(&buffer, true, &mut out).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("element vertex 2"));
        assert!(text.contains("property float nx"));
        assert!(text.contains("property float f_rest_8"));

        let reparsed = parse_ply(&out).unwrap();
        assert_eq!(reparsed.len(), records.len());
        for (a, b) in records.iter().zip(&reparsed) {
            assert!(a.position.abs_diff_eq(b.position, 1e-6));
            assert!(a.scale.abs_diff_eq(b.scale, 1e-6));
            assert!(a.rotation.abs_diff_eq(b.rotation, 1e-6));
            assert_eq!(a.color, b.color);
            for (x, y) in a.sh.iter().zip(&b.sh) {
                assert!((x - y).abs() < 1e-6);
            }
        }
    }
}
