pub mod backtrace;
pub mod capture;
pub mod cli;
pub mod daemon;
pub mod device;
pub mod error;
pub mod fault;
pub mod health;
pub mod regmap;
pub mod shared;
pub mod trace;
pub mod transport;
pub mod watchpoint;
