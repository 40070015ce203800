pub mod comparator;
pub mod halting_template;
pub mod poller;

pub use comparator::{Comparator, ComparatorAllocator, WatchMode, DWT_CTRL};
pub use halting_template::{default_result_file, generate_halting_watchpoint_script, HaltingWatchpointSpec};
pub use poller::{warn_if_poll_rate_high, WatchpointHit, WatchpointPoller, WatchpointPollerConfig};
