use clap::{ArgGroup, Parser};
use ksplat_lib::common::ZSTD_MAX_COMPRESSION_LVL;
use ksplat_lib::{
    compress, compress_async, decompress, decompress_async, is_zstd, load, CompressionLevel,
    GeneratorOptions, SectionPartition, SplatBuffer,
};
use std::cmp::min;
use std::error::Error;
use std::fs;
use std::process;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ksplat",
    version = "0.1",
    author = "Denis Avvakumov",
    about = "Converts PLY splats to and from progressive ksplat buffers"
)]
#[command(group(
    ArgGroup::new("mode").required(true).args(&["compress", "decompress", "info"])
))]
struct Cli {
    #[arg(short = 'e', long = "compress", help = "Convert a PLY file to a ksplat buffer.")]
    compress: bool,

    #[arg(short = 'd', long = "decompress", help = "Convert a ksplat buffer to a PLY file.")]
    decompress: bool,

    #[arg(long = "info", help = "Print the header and sections of a ksplat buffer.")]
    info: bool,

    #[arg(
        short = 'n',
        value_name = "INCLUDE_NORMALS",
        default_value = "false",
        long = "normals",
        help = "Include normals in the output PLY file (only valid with decompression)."
    )]
    include_normals: bool,

    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input file."
    )]
    input: String,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT",
        required_unless_present = "info",
        help = "Path to the output file."
    )]
    output: Option<String>,

    #[arg(
        short = 'l',
        long = "level",
        value_name = "LEVEL",
        default_value = "1",
        help = "Attribute compression level: 0 (f32), 1 (f16), 2 (f16 + 8-bit SH)."
    )]
    level: u16,

    #[arg(
        short = 's',
        long = "sh-degree",
        value_name = "DEGREE",
        default_value = "0",
        help = "Highest spherical harmonics degree to store (0-3)."
    )]
    sh_degree: u32,

    #[arg(
        long = "alpha",
        value_name = "ALPHA",
        default_value = "1",
        help = "Drop splats with opacity below this value (0-255)."
    )]
    minimum_alpha: u8,

    #[arg(
        long = "block-size",
        value_name = "SIZE",
        default_value = "5.0",
        help = "Edge length of the spatial bucketing grid cells."
    )]
    block_size: f32,

    #[arg(
        long = "bucket-size",
        value_name = "COUNT",
        default_value = "256",
        help = "Splats per full bucket."
    )]
    bucket_size: u32,

    #[arg(
        short = 'p',
        long = "partition",
        value_name = "POLICY",
        default_value = "single",
        help = "Section partition: single, parity or chunks:N."
    )]
    partition: SectionPartition,

    #[arg(
        short = 'c',
        long = "compression-level",
        value_name = "ZSTD_LEVEL",
        help = "Wrap the output in zstd at this level."
    )]
    zstd_level: Option<u32>,

    #[arg(
        short = 'w',
        long = "workers",
        value_name = "WORKERS",
        default_value = "3",
        help = "Set the workers count for ZSTD."
    )]
    workers: u32,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Enable asynchronous compression/decompression mode."
    )]
    async_mode: bool,
}

fn print_info(buffer: &SplatBuffer) {
    let (major, minor) = buffer.version();
    let center = buffer.scene_center();
    println!("Version: {}.{}", major, minor);
    println!("Compression level: {:?}", buffer.compression_level());
    println!(
        "Splats: {} / {} | Sections: {} / {}",
        buffer.splat_count(),
        buffer.max_splat_count(),
        buffer.section_count(),
        buffer.max_section_count()
    );
    println!("Scene center: ({}, {}, {})", center.x, center.y, center.z);
    let (min_sh, max_sh) = buffer.sh_range();
    println!("SH range: [{}, {}]", min_sh, max_sh);
    for (i, section) in buffer.sections().iter().enumerate() {
        println!(
            "  Section {}: {} splats, SH degree {}, {} buckets ({} partial), block {}, {} bytes",
            i,
            section.splat_count(),
            section.sh_degree(),
            section.bucket_count(),
            section.partially_filled_bucket_count(),
            section.block_size(),
            section.storage_size_bytes()
        );
    }
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.include_normals && !cli.decompress {
        eprintln!("Error: --normals (-n) can only be used with decompression (-d).");
        process::exit(1);
    }

    let raw_data = fs::read(&cli.input).unwrap_or_else(|e| {
        eprintln!("Error reading input file {}: {}", cli.input, e);
        process::exit(1);
    });

    if cli.info {
        let buffer = load(&raw_data)?;
        println!(
            "Input: {}{}",
            cli.input,
            if is_zstd(&raw_data) { " (zstd)" } else { "" }
        );
        print_info(&buffer);
        return Ok(());
    }

    let level = CompressionLevel::try_from(cli.level)?;
    let options = GeneratorOptions {
        compression_level: level,
        sh_degree: cli.sh_degree,
        minimum_alpha: cli.minimum_alpha,
        block_size: cli.block_size,
        bucket_size: cli.bucket_size,
        partition: cli.partition,
        ..Default::default()
    };
    let zstd_level = cli.zstd_level.map(|l| min(l, ZSTD_MAX_COMPRESSION_LVL));
    let output = cli.output.as_deref().unwrap_or_default();

    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    let op = if cli.compress {
        "Compression"
    } else {
        "Decompression"
    };

    print!("Mode: {} {}\nInput: {} | Output: {}", mode, op, cli.input, output);
    if cli.compress {
        print!(" | Level: {:?} | SH degree: {}", level, cli.sh_degree);
        match zstd_level {
            Some(l) => println!(" | zstd: {}", l),
            None => println!(),
        }
    } else {
        println!(
            " | {} normals from output",
            if cli.include_normals {
                "Including"
            } else {
                "Excluding"
            }
        );
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let start = Instant::now();

    let result: Vec<u8> = if cli.async_mode {
        rt.block_on(async {
            let mut buf = Vec::new();
            if cli.compress {
                compress_async(&raw_data, &options, zstd_level, cli.workers, &mut buf)
                    .await
                    .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
            } else {
                decompress_async(&raw_data, cli.include_normals, &mut buf)
                    .await
                    .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
            }
            Ok::<Vec<u8>, Box<dyn Error + Send + Sync>>(buf)
        })?
    } else {
        let mut buf = Vec::new();
        if cli.compress {
            compress(&raw_data, &options, zstd_level, cli.workers, &mut buf)
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
        } else {
            decompress(&raw_data, cli.include_normals, &mut buf)
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
        }
        buf
    };

    let elapsed = start.elapsed().as_millis();
    println!("{} Time: {} ms", op, elapsed);

    fs::write(output, &result).unwrap_or_else(|e| {
        eprintln!("Error writing output '{}': {}", output, e);
        process::exit(1);
    });
    println!("Successfully wrote to '{}'.", output);

    Ok(())
}
