pub mod convert;
pub mod engine;
pub mod format;

pub use engine::{default_output_path, CaptureConfig, CaptureEngine, CaptureSummary};
