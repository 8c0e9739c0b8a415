pub mod bucket;
pub mod buffer;
pub mod common;
pub mod encoder;
pub mod error;
pub mod layout;
pub mod output;
pub mod partition;
pub mod ply;
pub mod progressive;
pub mod record;
pub mod sh_rotation;
pub mod structures;

pub use buffer::{Section, SplatBuffer};
pub use encoder::{GeneratorOptions, SplatBufferGenerator};
pub use error::SplatBufferError;
pub use layout::CompressionLevel;
pub use output::{AttributeOutput, ShOutput};
pub use partition::SectionPartition;
pub use ply::{parse_ply, write_ply};
pub use progressive::ProgressiveLoader;
pub use record::SplatRecord;
pub use sh_rotation::ShRotation;

use std::io::{Cursor, Write};
use zstd::stream::{decode_all, Encoder};

/// Frame magic of a zstd stream, little-endian `0xFD2FB528`.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// True when `data` starts with a zstd frame.
pub fn is_zstd(data: &[u8]) -> bool {
    data.starts_with(&ZSTD_MAGIC)
}

#[inline(never)]
pub fn compress_zstd(data: &[u8], level: u32, workers: u32) -> Result<Vec<u8>, SplatBufferError> {
    let mut encoder = Encoder::new(Vec::new(), level as i32).map_err(|e| {
        SplatBufferError::ZstdCompress(format!("Encoder creation failed: {}", e))
    })?;
    encoder.multithread(workers).map_err(|e| {
        SplatBufferError::ZstdCompress(format!("Setting multithread failed: {}", e))
    })?;
    encoder
        .write_all(data)
        .map_err(|e| SplatBufferError::ZstdCompress(format!("Writing data failed: {}", e)))?;

    let compressed_data = encoder.finish().map_err(|e| {
        SplatBufferError::ZstdCompress(format!("Finalizing compression failed: {}", e))
    })?;
    Ok(compressed_data)
}

#[inline(never)]
pub fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>, SplatBufferError> {
    decode_all(Cursor::new(data))
        .map_err(|e| SplatBufferError::ZstdDecompress(format!("Decompression failed: {}", e)))
}

/// Builds a splat buffer from `.ply` bytes.
pub fn prepare_buffer(
    raw_data: &[u8],
    options: &GeneratorOptions,
) -> Result<SplatBuffer, SplatBufferError> {
    let records = parse_ply(raw_data)?;
    if records.is_empty() {
        return Err(SplatBufferError::EmptySplatSet);
    }
    SplatBufferGenerator::new(options.clone()).generate(records)
}

/// Opens a complete splat buffer, unwrapping zstd transport if present.
pub fn load(data: &[u8]) -> Result<SplatBuffer, SplatBufferError> {
    if is_zstd(data) {
        SplatBuffer::from_bytes(decompress_zstd(data)?)
    } else {
        SplatBuffer::from_bytes(data.to_vec())
    }
}

/// Converts `.ply` bytes to a splat buffer, zstd-wrapped when `zstd_level` is set.
pub fn compress(
    raw_data: &[u8],
    options: &GeneratorOptions,
    zstd_level: Option<u32>,
    workers: u32,
    output: &mut Vec<u8>,
) -> Result<(), SplatBufferError> {
    let buffer = prepare_buffer(raw_data, options)?;
    let bytes = match zstd_level {
        Some(level) => compress_zstd(buffer.as_bytes(), level, workers)?,
        None => buffer.into_bytes(),
    };
    output.clear();
    output.extend_from_slice(&bytes);
    Ok(())
}

/// Converts a (possibly zstd-wrapped) splat buffer back to `.ply` bytes.
pub fn decompress(
    data: &[u8],
    include_normals: bool,
    output: &mut Vec<u8>,
) -> Result<(), SplatBufferError> {
    let buffer = load(data)?;
    if buffer.splat_count() == 0 {
        return Err(SplatBufferError::EmptySplatSet);
    }
    write_ply(&buffer, include_normals, output)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use async_compression::zstd::CParameter;
    use async_compression::Level;
    use async_compression::tokio::bufread::ZstdDecoder;
    use async_compression::tokio::write::ZstdEncoder;
    use std::pin::Pin;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};

    const STREAM_CHUNK_SIZE: usize = 64 * 1024;

    #[inline(never)]
    async fn compress_zstd_async(
        data: &[u8],
        level: u32,
        workers: u32,
    ) -> Result<Vec<u8>, SplatBufferError> {
        let mut compressed = Vec::new();
        let params = &[CParameter::nb_workers(workers)];
        let mut encoder = ZstdEncoder::with_quality_and_params(
            &mut compressed,
            Level::Precise(level as i32),
            params,
        );

        encoder.write_all(data)
            .await
            .map_err(|e| SplatBufferError::ZstdCompress(e.to_string()))?;

        encoder.shutdown()
            .await
            .map_err(|e| SplatBufferError::ZstdCompress(e.to_string()))?;

        Ok(compressed)
    }

    /// Streams a splat buffer from `reader` through a `ProgressiveLoader`.
    /// `on_progress` sees the buffer after every chunk once its header region
    /// has arrived; splats below its `splat_count()` are safe to read.
    pub async fn load_async<'a, R, F>(
        reader: R,
        zstd: bool,
        mut on_progress: F,
    ) -> Result<SplatBuffer, SplatBufferError>
    where
        R: AsyncRead + 'a,
        F: FnMut(&SplatBuffer),
    {
        let mut reader: Pin<Box<dyn AsyncRead + 'a>> = if zstd {
            Box::pin(ZstdDecoder::new(BufReader::new(reader)))
        } else {
            Box::pin(reader)
        };

        let mut loader = ProgressiveLoader::new();
        let mut chunk = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut chunk).await.map_err(|e| {
                if zstd {
                    SplatBufferError::ZstdDecompress(e.to_string())
                } else {
                    SplatBufferError::IoError(e)
                }
            })?;
            if n == 0 {
                break;
            }
            loader.push(&chunk[..n])?;
            if let Some(buffer) = loader.buffer() {
                on_progress(buffer);
            }
        }
        loader.finish()
    }

    #[inline(never)]
    pub async fn compress_async(
        raw_data: &[u8],
        options: &GeneratorOptions,
        zstd_level: Option<u32>,
        workers: u32,
        output: &mut Vec<u8>,
    ) -> Result<(), SplatBufferError> {
        let buffer = prepare_buffer(raw_data, options)?;
        let bytes = match zstd_level {
            Some(level) => compress_zstd_async(buffer.as_bytes(), level, workers).await?,
            None => buffer.into_bytes(),
        };
        output.clear();
        output.extend_from_slice(&bytes);
        Ok(())
    }

    #[inline(never)]
    pub async fn decompress_async(
        data: &[u8],
        include_normals: bool,
        output: &mut Vec<u8>,
    ) -> Result<(), SplatBufferError> {
        let buffer = load_async(data, is_zstd(data), |_| {}).await?;
        if buffer.splat_count() == 0 {
            return Err(SplatBufferError::EmptySplatSet);
        }
        write_ply(&buffer, include_normals, output)
    }
}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_ply(count: usize) -> Vec<u8> {
        let mut raw_ply = format!(
            "ply\nformat binary_little_endian 1.0\nelement vertex {}\n\
             property float x\nproperty float y\nproperty float z\n\
             property float scale_0\nproperty float scale_1\nproperty float scale_2\n\
             property float rot_0\nproperty float rot_1\nproperty float rot_2\nproperty float rot_3\n\
             property float opacity\n\
             property float f_dc_0\nproperty float f_dc_1\nproperty float f_dc_2\n\
             end_header\n",
            count
        )
        .into_bytes();

        for i in 0..count {
            let t = i as f32;
            #[rustfmt::skip]
            let floats = [
                t * 0.05, (t * 0.7).sin() * 3.0, -t * 0.02,
                -4.0, -4.5, -5.0,
                1.0, 0.0, 0.0, 0.0,
                2.0,
                0.2, 0.3, 0.4,
            ];
            raw_ply.extend_from_slice(bytemuck::cast_slice(&floats));
        }
        raw_ply
    }

    fn validate_output_ply(out_ply: &[u8], count: usize) {
        let text = String::from_utf8_lossy(out_ply);
        assert!(
            text.contains(&format!("element vertex {}", count)),
            "Output .ply missing 'element vertex {}'",
            count
        );
    }

    #[test]
    fn test_compress_decompress() {
        let raw_ply = create_test_ply(300);

        for zstd_level in [None, Some(3)] {
            let mut data = Vec::new();
            compress(&raw_ply, &GeneratorOptions::default(), zstd_level, 1, &mut data)
                .expect("compress(...) failed");
            assert_eq!(is_zstd(&data), zstd_level.is_some());

            let mut out_ply = Vec::new();
            decompress(&data, false, &mut out_ply).expect("decompress(...) failed");
            validate_output_ply(&out_ply, 300);
        }
    }

    #[test]
    fn test_load_unwraps_zstd() {
        let raw_ply = create_test_ply(40);
        let buffer = prepare_buffer(&raw_ply, &GeneratorOptions::default()).unwrap();
        let wrapped = compress_zstd(buffer.as_bytes(), 1, 1).unwrap();
        assert!(is_zstd(&wrapped));
        assert_eq!(decompress_zstd(&wrapped).unwrap(), buffer.as_bytes());

        let loaded = load(&wrapped).unwrap();
        assert_eq!(loaded.splat_count(), 40);
        assert_eq!(loaded.as_bytes(), buffer.as_bytes());
    }

    #[test]
    fn test_empty_ply_rejected() {
        let raw_ply = create_test_ply(0);
        let mut data = Vec::new();
        assert!(matches!(
            compress(&raw_ply, &GeneratorOptions::default(), None, 1, &mut data),
            Err(SplatBufferError::EmptySplatSet)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let mut out = Vec::new();
        assert!(decompress(&[0x28, 0xB5, 0x2F, 0xFD, 1, 2, 3], false, &mut out).is_err());
        assert!(decompress(&[9, 9, 9, 9], false, &mut out).is_err());
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_compress_decompress_async() {
        let raw_ply = create_test_ply(300);

        let mut data = Vec::new();
        compress_async(&raw_ply, &GeneratorOptions::default(), Some(1), 1, &mut data)
            .await
            .expect("compress_async failed");

        let mut out_ply = Vec::new();
        decompress_async(&data, false, &mut out_ply)
            .await
            .expect("decompress_async failed");
        validate_output_ply(&out_ply, 300);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_load_async_reports_progress() {
        let raw_ply = create_test_ply(5000);
        let options = GeneratorOptions {
            partition: SectionPartition::Chunks(1000),
            ..Default::default()
        };
        let buffer = prepare_buffer(&raw_ply, &options).unwrap();

        let mut seen = Vec::new();
        let loaded = load_async(buffer.as_bytes(), false, |b| seen.push(b.splat_count()))
            .await
            .unwrap();

        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(5000));
        assert_eq!(loaded.as_bytes(), buffer.as_bytes());
    }
}
