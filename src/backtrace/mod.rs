pub mod resolve;
pub mod symbols;
pub mod toolchain;

pub use resolve::{BacktraceDecoder, BacktraceEntry, BacktraceFormat, BacktraceResult};
pub use symbols::{resolve_symbol, ResolvedSymbol};
pub use toolchain::which_or_sdk;
