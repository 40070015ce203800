//! Trace export: format auto-detection plus conversion to the Chrome JSON
//! trace format Perfetto loads natively.

pub mod external;
pub mod format;
pub mod perfetto;

pub use external::{convert_via_external_tool, default_tool_name};
pub use format::{detect_trace_format, TraceFormat};
pub use perfetto::{rttbin_to_perfetto, PerfettoSummary};
