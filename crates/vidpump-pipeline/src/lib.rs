#![doc = include_str!("../README.md")]

pub mod decode;
pub mod encode;
/// Pump counters and run reports.
pub mod metrics;
pub mod resolver;
/// Command composition over readers, engines, pumps and sinks.
pub mod runtime;
pub mod synthetic;

pub use decode::DecodePump;
pub use encode::EncodePump;
pub use metrics::{PumpMetrics, PumpReport};
pub use resolver::{HwSurfaceResolver, pack_frame};
pub use runtime::{
    DecodeRunConfig, EncodeRunConfig, HwDecodeRunConfig, run_decode, run_encode, run_hwdecode,
};
pub use synthetic::pattern_frame;
