use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use vidpump_codec::config::{DecoderConfig, EncoderConfig};
use vidpump_codec::registry;
use vidpump_core::codec_traits::{ContainerSource, FrameSink};
use vidpump_core::error::Result;
use vidpump_core::types::{PackedImage, PixelFormat};
use vidpump_io::{ArtifactFormat, ElementaryDemuxer};
use vidpump_pipeline::{
    DecodePump, DecodeRunConfig, EncodeRunConfig, HwDecodeRunConfig, pack_frame, pattern_frame,
    run_decode, run_encode, run_hwdecode,
};

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "vidpump_pipeline_{label}_{}_{}",
        std::process::id(),
        nanos
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn encode_stream(dir: &Path, format: PixelFormat, frames: u64) -> PathBuf {
    let output = dir.join("stream.vpic");
    let report = run_encode(&EncodeRunConfig {
        output: output.clone(),
        codec: "vpic".into(),
        encoder: EncoderConfig {
            width: 48,
            height: 32,
            max_b_frames: 2,
            pix_fmt: format,
            ..EncoderConfig::default()
        },
        frames,
    })
    .expect("encode");
    assert_eq!(report.frames, frames);
    assert_eq!(report.packets, frames);
    assert_eq!(report.flush_outputs, 2.min(frames));
    assert_eq!(report.bytes_written, fs::metadata(&output).expect("stat").len());
    output
}

fn raw_decode(input: &Path, prefix: &Path, chunk_size: usize) -> Vec<Vec<u8>> {
    let mut config = DecodeRunConfig::new(input.to_path_buf(), prefix.to_path_buf(), "vpic");
    config.format = ArtifactFormat::Raw;
    config.chunk_size = chunk_size;
    config.reorder_depth = 1;
    let report = run_decode(&config).expect("decode");
    (1..=report.frames)
        .map(|n| {
            let mut name = prefix.as_os_str().to_owned();
            name.push(format!("-{n}"));
            fs::read(PathBuf::from(name)).expect("artifact")
        })
        .collect()
}

#[test]
fn encoded_pattern_decodes_to_identical_samples() {
    let dir = unique_temp_dir("round-trip");
    for format in PixelFormat::SOFTWARE {
        let input = encode_stream(&dir, format, 5);
        let bytes = fs::read(&input).expect("read stream");
        assert!(bytes.ends_with(&[0, 0, 1, 0xB7]));

        let frames = raw_decode(&input, &dir.join(format.name()), 4096);
        assert_eq!(frames.len(), 5, "{format}");
        for (i, decoded) in frames.iter().enumerate() {
            let source = pattern_frame(format, 48, 32, i as u64).expect("pattern");
            let expected = pack_frame(&source).expect("pack");
            assert_eq!(decoded, &expected.data, "{format} frame {i}");
        }
    }
    let _ = fs::remove_dir_all(dir);
}

#[derive(Clone, Default)]
struct Timestamps(Arc<Mutex<Vec<(u64, Option<i64>)>>>);

impl FrameSink for Timestamps {
    fn write_frame(&mut self, image: &PackedImage, frame_number: u64) -> Result<()> {
        self.0.lock().expect("lock").push((frame_number, image.pts));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn decoded_timestamps_never_decrease() {
    let dir = unique_temp_dir("timestamps");
    let input = encode_stream(&dir, PixelFormat::Gray8, 7);
    let decoder = registry::open_decoder(
        "vpic",
        &DecoderConfig {
            reorder_depth: 3,
            device: None,
        },
    )
    .expect("decoder");
    let sink = Timestamps::default();
    let mut pump = DecodePump::new(decoder, Box::new(sink.clone()));
    let mut demuxer = ElementaryDemuxer::open(&input).expect("open");
    while let Some(packet) = demuxer.read_packet().expect("read") {
        pump.submit(Some(&packet)).expect("submit");
    }
    pump.flush().expect("flush");

    let seen = sink.0.lock().expect("lock").clone();
    let numbers: Vec<u64> = seen.iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, (1..=7).collect::<Vec<_>>());
    let pts: Vec<i64> = seen.iter().map(|(_, pts)| pts.expect("pts")).collect();
    assert!(pts.windows(2).all(|w| w[0] <= w[1]), "{pts:?}");
    // The last held unit is the sequence end code, which yields no frame.
    assert_eq!(pump.metrics().flush_outputs, 2);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn chunk_size_does_not_change_output() {
    let dir = unique_temp_dir("chunking");
    let input = encode_stream(&dir, PixelFormat::Nv12, 4);
    let reference = raw_decode(&input, &dir.join("ref"), 4096);
    assert_eq!(reference.len(), 4);
    for (i, chunk_size) in [1usize, 3, 7, 64, 1000].into_iter().enumerate() {
        let frames = raw_decode(&input, &dir.join(format!("c{i}")), chunk_size);
        assert_eq!(frames, reference, "chunk size {chunk_size}");
    }
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn emulated_hardware_decode_matches_host_decode() {
    let dir = unique_temp_dir("hwdecode");
    let input = encode_stream(&dir, PixelFormat::Yuv420p, 6);
    let host: Vec<u8> = raw_decode(&input, &dir.join("host"), 4096).concat();

    let output = dir.join("hw.raw");
    let report = run_hwdecode(&HwDecodeRunConfig {
        device_type: "emulated".into(),
        input: input.clone(),
        output: output.clone(),
    })
    .expect("hwdecode");
    assert_eq!(report.frames, 6);
    assert_eq!(report.device.as_deref(), Some("emulated"));
    assert!(report.peak_device_bytes.unwrap_or(0) > 0);
    assert_eq!(fs::read(&output).expect("raw output"), host);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn empty_input_decodes_to_nothing() {
    let dir = unique_temp_dir("empty");
    let input = dir.join("empty.vpic");
    fs::write(&input, b"").expect("write");
    let report = run_decode(&DecodeRunConfig::new(input, dir.join("out"), "vpic")).expect("decode");
    assert_eq!(report.packets, 0);
    assert_eq!(report.frames, 0);
    assert_eq!(report.bytes_written, 0);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn unknown_codec_fails_before_reading_input() {
    let dir = unique_temp_dir("unknown-codec");
    let err = run_decode(&DecodeRunConfig::new(
        dir.join("missing.bin"),
        dir.join("out"),
        "no-such-codec",
    ))
    .expect_err("unknown codec");
    assert_eq!(err.error_code(), 500);
    assert!(err.to_string().contains("no-such-codec"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn unknown_device_type_lists_available_types() {
    let dir = unique_temp_dir("unknown-device");
    let err = run_hwdecode(&HwDecodeRunConfig {
        device_type: "warp".into(),
        input: dir.join("in.vpic"),
        output: dir.join("out.raw"),
    })
    .expect_err("unknown device");
    let msg = err.to_string();
    assert!(msg.contains("warp"));
    assert!(msg.contains("emulated"));
    let _ = fs::remove_dir_all(dir);
}

#[cfg(not(feature = "ffmpeg-runtime"))]
#[test]
fn non_elementary_input_needs_container_runtime() {
    let dir = unique_temp_dir("container");
    let input = dir.join("clip.mp4");
    fs::write(&input, b"ftypisom not a start-coded stream").expect("write");
    let err = run_hwdecode(&HwDecodeRunConfig {
        device_type: "emulated".into(),
        input,
        output: dir.join("out.raw"),
    })
    .expect_err("no container support");
    assert_eq!(err.error_code(), 500);
    assert!(err.to_string().contains("ffmpeg-runtime"));
    let _ = fs::remove_dir_all(dir);
}

#[cfg(not(feature = "ffmpeg-runtime"))]
#[test]
fn long_non_elementary_input_falls_back_to_container_demux() {
    let dir = unique_temp_dir("long-container");
    let input = dir.join("clip.mp4");
    let mut data = b"ftypisom\0\0\x01\x42".to_vec();
    data.resize(9 * 1024 * 1024, 0xAA);
    fs::write(&input, &data).expect("write");
    let err = run_hwdecode(&HwDecodeRunConfig {
        device_type: "emulated".into(),
        input,
        output: dir.join("out.raw"),
    })
    .expect_err("no container support");
    assert_eq!(err.error_code(), 500, "{err}");
    assert!(err.to_string().contains("ffmpeg-runtime"));
    let _ = fs::remove_dir_all(dir);
}
