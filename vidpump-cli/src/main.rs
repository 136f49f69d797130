//! vidpump CLI entrypoint.
//!
//! ```bash
//! vidpump encode out.vpic vpic --frames 25
//! vidpump decode out.vpic frame vpic
//! vidpump hwdecode emulated out.vpic frames.raw --json
//! vidpump codecs
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use vidpump_codec::config::EncoderConfig;
use vidpump_codec::registry;
use vidpump_core::codec_traits::{CodecDescriptor, CodecKind};
use vidpump_core::context::DeviceType;
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::PixelFormat;
use vidpump_io::{ArtifactFormat, DEFAULT_CHUNK_SIZE};
use vidpump_pipeline::{
    DecodeRunConfig, EncodeRunConfig, HwDecodeRunConfig, PumpReport, run_decode, run_encode,
    run_hwdecode,
};

#[derive(Parser, Debug)]
#[command(
    name = "vidpump",
    version,
    about = "Streaming decode/encode pump",
    arg_required_else_help = true,
    after_help = "Examples:\n  vidpump encode out.vpic vpic --frames 25\n  vidpump decode out.vpic frame vpic --format raw\n  vidpump hwdecode emulated out.vpic frames.raw --json\n  vidpump codecs --json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split a raw bitstream into packets and write one file per decoded frame.
    Decode(DecodeArgs),
    /// Encode a synthetic test pattern into a raw bitstream.
    Encode(EncodeArgs),
    /// Decode on a hardware device and append every frame to one raw file.
    Hwdecode(HwDecodeArgs),
    /// List codecs and device types available in this build.
    Codecs(CodecsArgs),
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Raw elementary stream to read.
    input: PathBuf,
    /// Artifacts are written to `<prefix>-<frame number>`.
    output_prefix: PathBuf,
    /// Decoder name (see `vidpump codecs`).
    codec: String,

    #[arg(long = "format", value_enum, default_value_t = FormatArg::Pnm)]
    format: FormatArg,

    /// Bytes read from the input per parser call.
    #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Packets the reference decoder holds back before emitting a picture.
    #[arg(long = "reorder-depth", default_value_t = 0)]
    reorder_depth: usize,

    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Output bitstream file.
    output: PathBuf,
    /// Encoder name (see `vidpump codecs`).
    codec: String,

    #[arg(long = "width", default_value_t = 352)]
    width: u32,

    #[arg(long = "height", default_value_t = 288)]
    height: u32,

    /// Number of pattern frames to encode.
    #[arg(long = "frames", default_value_t = 25)]
    frames: u64,

    #[arg(long = "fps", default_value_t = 25)]
    fps: u32,

    /// Frames between keyframes.
    #[arg(long = "gop", default_value_t = 10)]
    gop: u32,

    #[arg(long = "max-b-frames", default_value_t = 0)]
    max_b_frames: u32,

    /// Target bitrate in bits/sec.
    #[arg(long = "bitrate", default_value_t = 400_000)]
    bitrate: u64,

    /// Input pixel format: gray, yuv420p, nv12 or rgb24.
    #[arg(long = "pix-fmt", default_value = "yuv420p")]
    pix_fmt: String,

    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct HwDecodeArgs {
    /// Device type, e.g. `emulated`, `cuda`, `vaapi`.
    device_type: String,
    /// Raw elementary stream or, with `ffmpeg-runtime`, any container file.
    input: PathBuf,
    /// File every packed frame is appended to.
    output: PathBuf,

    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct CodecsArgs {
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    /// Binary PGM/PPM of the picture.
    Pnm,
    /// Packed planes, no header.
    Raw,
}

impl From<FormatArg> for ArtifactFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Pnm => ArtifactFormat::Pnm,
            FormatArg::Raw => ArtifactFormat::Raw,
        }
    }
}

const JSON_SCHEMA_VERSION: u32 = 1;

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json_error_command = match &cli.command {
        Commands::Decode(args) if args.json => Some("decode"),
        Commands::Encode(args) if args.json => Some("encode"),
        Commands::Hwdecode(args) if args.json => Some("hwdecode"),
        Commands::Codecs(args) if args.json => Some("codecs"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Decode(args) => cmd_decode(args),
        Commands::Encode(args) => cmd_encode(args),
        Commands::Hwdecode(args) => cmd_hwdecode(args),
        Commands::Codecs(args) => cmd_codecs(args),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if err.is_startup() {
                tracing::error!(error = %err, code = err.error_code(), "Startup failed");
            } else {
                tracing::error!(error = %err, code = err.error_code(), "Command failed");
            }
            if let Some(command) = json_error_command {
                print_json(&CommandError {
                    schema_version: JSON_SCHEMA_VERSION,
                    command,
                    ok: false,
                    error: err.to_string(),
                    code: err.error_code(),
                });
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn cmd_decode(args: DecodeArgs) -> Result<()> {
    let config = DecodeRunConfig {
        input: args.input,
        output_prefix: args.output_prefix,
        codec: args.codec,
        format: args.format.into(),
        chunk_size: args.chunk_size,
        reorder_depth: args.reorder_depth,
    };
    let report = run_decode(&config)?;
    emit_report(&report, args.json);
    Ok(())
}

fn cmd_encode(args: EncodeArgs) -> Result<()> {
    let pix_fmt = PixelFormat::from_name(&args.pix_fmt).ok_or_else(|| {
        PumpError::Configuration(format!(
            "unknown pixel format '{}' (expected one of: {})",
            args.pix_fmt,
            PixelFormat::SOFTWARE.map(PixelFormat::name).join(", ")
        ))
    })?;
    let config = EncodeRunConfig {
        output: args.output,
        codec: args.codec,
        encoder: EncoderConfig {
            width: args.width,
            height: args.height,
            fps: args.fps,
            gop_size: args.gop,
            max_b_frames: args.max_b_frames,
            bit_rate: args.bitrate,
            pix_fmt,
        },
        frames: args.frames,
    };
    let report = run_encode(&config)?;
    emit_report(&report, args.json);
    Ok(())
}

fn cmd_hwdecode(args: HwDecodeArgs) -> Result<()> {
    let config = HwDecodeRunConfig {
        device_type: args.device_type,
        input: args.input,
        output: args.output,
    };
    let report = run_hwdecode(&config)?;
    emit_report(&report, args.json);
    Ok(())
}

fn cmd_codecs(args: CodecsArgs) -> Result<()> {
    let codecs = registry::list_codecs();
    if args.json {
        print_json(&CodecListing {
            schema_version: JSON_SCHEMA_VERSION,
            command: "codecs",
            ok: true,
            ffmpeg_runtime: vidpump_codec::ffmpeg::AVAILABLE,
            codecs: &codecs,
            device_types: DeviceType::ALL.map(DeviceType::name).to_vec(),
        });
        return Ok(());
    }

    for codec in &codecs {
        let kind = match codec.kind {
            CodecKind::Decoder => "D",
            CodecKind::Encoder => "E",
        };
        println!("{kind} {:<16} {}", codec.name, codec.long_name);
        for hw in &codec.hw_configs {
            println!("    hw: {} -> {}", hw.device_type, hw.pix_fmt);
        }
    }
    println!(
        "device types: {}",
        DeviceType::ALL.map(DeviceType::name).join(" ")
    );
    if !vidpump_codec::ffmpeg::AVAILABLE {
        println!("built without ffmpeg-runtime: only vpic and the emulated device are usable");
    }
    Ok(())
}

// ─── Output ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CommandSummary<'a> {
    schema_version: u32,
    ok: bool,
    #[serde(flatten)]
    report: &'a PumpReport,
}

#[derive(Serialize)]
struct CommandError {
    schema_version: u32,
    command: &'static str,
    ok: bool,
    error: String,
    code: u32,
}

#[derive(Serialize)]
struct CodecListing<'a> {
    schema_version: u32,
    command: &'static str,
    ok: bool,
    ffmpeg_runtime: bool,
    codecs: &'a [CodecDescriptor],
    device_types: Vec<&'static str>,
}

fn emit_report(report: &PumpReport, json: bool) {
    if json {
        print_json(&CommandSummary {
            schema_version: JSON_SCHEMA_VERSION,
            ok: true,
            report,
        });
        return;
    }
    match report.command {
        "encode" => println!(
            "encoded {} frames into {} packets ({} bytes)",
            report.frames, report.packets, report.bytes_written
        ),
        _ => println!(
            "decoded {} frames from {} packets ({} bytes written)",
            report.frames, report.packets, report.bytes_written
        ),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::error!(error = %err, "Failed to serialize JSON summary"),
    }
}
