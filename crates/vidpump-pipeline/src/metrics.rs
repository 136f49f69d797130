//! Pump counters and the end-of-run report.

use serde::Serialize;
use tracing::info;

/// Counters kept by one pump over its lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PumpMetrics {
    /// Units sent to the engine (packets for decode, frames for encode).
    pub units_in: u64,
    /// Units drained from the engine.
    pub units_out: u64,
    /// Units drained after the flush request.
    pub flush_outputs: u64,
    /// Receive calls that reported the engine starved.
    pub starved: u64,
    /// Bytes the sink had accepted when the pump finished.
    pub bytes_written: u64,
}

impl PumpMetrics {
    /// Log the counters at `info` under `pump`.
    pub fn report(&self, pump: &'static str) {
        info!(
            pump,
            units_in = self.units_in,
            units_out = self.units_out,
            flush_outputs = self.flush_outputs,
            starved = self.starved,
            bytes_written = self.bytes_written,
            "Pump finished"
        );
    }
}

/// Summary of one command run; printed as JSON with `--json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    pub command: &'static str,
    pub codec: String,
    /// Packets read from input (decode) or written to output (encode).
    pub packets: u64,
    /// Frames written to the sink (decode) or fed to the encoder (encode).
    pub frames: u64,
    pub flush_outputs: u64,
    pub bytes_written: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_device_bytes: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_omits_device_fields_for_host_runs() {
        let report = PumpReport {
            command: "decode",
            codec: "vpic".into(),
            packets: 3,
            frames: 3,
            flush_outputs: 1,
            bytes_written: 99,
            device: None,
            peak_device_bytes: None,
        };
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["command"], "decode");
        assert_eq!(json["frames"], 3);
        assert!(json.get("device").is_none());
    }
}
