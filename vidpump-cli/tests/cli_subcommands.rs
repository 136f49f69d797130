use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "vidpump_cli_{label}_{}_{}",
        std::process::id(),
        nanos
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn vidpump(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vidpump"))
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("run vidpump")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

fn stdout_json(output: &Output, command: &str, ok: bool) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(lines.len(), 1, "stdout must be one JSON line, got:\n{stdout}");
    let value: serde_json::Value = serde_json::from_str(lines[0])
        .unwrap_or_else(|e| panic!("stdout is not JSON: {e}\n{stdout}"));
    assert_eq!(
        value.get("schema_version").and_then(|v| v.as_u64()),
        Some(1),
        "missing schema_version=1 field"
    );
    assert_eq!(value.get("command").and_then(|v| v.as_str()), Some(command));
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(ok));
    value
}

#[test]
fn help_lists_subcommands() {
    let output = vidpump(&["help"]);
    assert!(
        output.status.success(),
        "vidpump help failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    for sub in ["decode", "encode", "hwdecode", "codecs"] {
        assert!(stdout.contains(sub), "missing {sub} in help output");
    }
}

#[test]
fn missing_arguments_is_usage_error() {
    let output = vidpump(&["decode", "only-input"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn encode_then_decode_round_trip() {
    let dir = unique_temp_dir("round_trip");
    let stream = dir.join("pattern.vpic");

    let encoded = vidpump(&[
        "encode",
        path_arg(&stream),
        "vpic",
        "--width",
        "32",
        "--height",
        "16",
        "--frames",
        "4",
        "--max-b-frames",
        "1",
        "--json",
    ]);
    assert!(
        encoded.status.success(),
        "encode failed: {}",
        String::from_utf8_lossy(&encoded.stderr)
    );
    let summary = stdout_json(&encoded, "encode", true);
    assert_eq!(summary["frames"], 4);
    assert_eq!(summary["packets"], 4);
    let bytes = fs::read(&stream).expect("bitstream");
    assert!(bytes.ends_with(&[0, 0, 1, 0xB7]));
    assert_eq!(summary["bytes_written"], bytes.len() as u64);

    let prefix = dir.join("frame");
    let decoded = vidpump(&[
        "decode",
        path_arg(&stream),
        path_arg(&prefix),
        "vpic",
        "--chunk-size",
        "5",
        "--json",
    ]);
    assert!(
        decoded.status.success(),
        "decode failed: {}",
        String::from_utf8_lossy(&decoded.stderr)
    );
    let summary = stdout_json(&decoded, "decode", true);
    assert_eq!(summary["frames"], 4);

    for n in 1..=4 {
        let artifact = fs::read(dir.join(format!("frame-{n}"))).expect("pgm artifact");
        let header = b"P5\n32 16\n255\n";
        assert_eq!(&artifact[..header.len()], header);
        assert_eq!(artifact.len(), header.len() + 32 * 16);
    }
    assert!(!dir.join("frame-5").exists());

    let stderr = String::from_utf8_lossy(&decoded.stderr);
    assert!(stderr.contains("saving frame"), "missing progress log:\n{stderr}");
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn hwdecode_on_emulated_device_reports_device() {
    let dir = unique_temp_dir("hwdecode");
    let stream = dir.join("pattern.vpic");
    let encoded = vidpump(&["encode", path_arg(&stream), "vpic", "--frames", "3"]);
    assert!(encoded.status.success());

    let raw = dir.join("frames.raw");
    let output = vidpump(&[
        "hwdecode",
        "emulated",
        path_arg(&stream),
        path_arg(&raw),
        "--json",
    ]);
    assert!(
        output.status.success(),
        "hwdecode failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary = stdout_json(&output, "hwdecode", true);
    assert_eq!(summary["device"], "emulated");
    assert_eq!(summary["frames"], 3);
    assert!(summary["peak_device_bytes"].as_u64().unwrap_or(0) > 0);
    // 352x288 yuv420p packs to 152064 bytes per frame.
    assert_eq!(fs::metadata(&raw).expect("raw output").len(), 3 * 152_064);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn unknown_codec_exits_with_failure() {
    let dir = unique_temp_dir("unknown_codec");
    let output = vidpump(&[
        "encode",
        path_arg(&dir.join("out.bin")),
        "nonexistent-codec",
        "--json",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let summary = stdout_json(&output, "encode", false);
    assert_eq!(summary["code"], 500);
    assert!(
        summary["error"]
            .as_str()
            .unwrap_or_default()
            .contains("nonexistent-codec")
    );
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn unknown_device_type_lists_available_types() {
    let dir = unique_temp_dir("unknown_device");
    let output = vidpump(&[
        "hwdecode",
        "hologram",
        path_arg(&dir.join("in.vpic")),
        path_arg(&dir.join("out.raw")),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("hologram"), "missing device name:\n{stderr}");
    assert!(stderr.contains("Available device types"), "missing list:\n{stderr}");
    assert!(stderr.contains("emulated"));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn missing_input_is_io_failure() {
    let dir = unique_temp_dir("missing_input");
    let output = vidpump(&[
        "decode",
        path_arg(&dir.join("absent.vpic")),
        path_arg(&dir.join("frame")),
        "vpic",
        "--json",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let summary = stdout_json(&output, "decode", false);
    assert_eq!(summary["code"], 600);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn codecs_lists_reference_codec_and_devices() {
    let output = vidpump(&["codecs", "--json"]);
    assert!(output.status.success());
    let summary = stdout_json(&output, "codecs", true);
    let codecs = summary["codecs"].as_array().expect("codecs array");
    assert!(
        codecs
            .iter()
            .any(|c| c["name"] == "vpic" && c["kind"] == "decoder")
    );
    let devices = summary["device_types"].as_array().expect("device types");
    assert!(devices.iter().any(|d| d == "emulated"));
    assert!(devices.iter().any(|d| d == "cuda"));
}
