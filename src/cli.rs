use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "eabctl",
    version,
    about = r#"
eabctl attaches to a microcontroller over a debug probe (SWD/JTAG) or a
plain serial UART and gives you one daemon plus a CLI for watching it.

EXAMPLES:
    # Register a device once, then start its session daemon:
    eabctl device add my-board --chip nrf5340 --probe-kind jlink --port 000123456
    eabctl daemon start my-board

    # Watch its status and recent alerts:
    eabctl daemon status my-board

    # Export a capture to a format Perfetto's UI loads natively:
    eabctl trace export capture.rttbin --output capture.json
"#
)]
pub struct Opt {
    #[command(subcommand)]
    pub action: Action,

    /// Emit a single JSON object instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Manage the device registry.
    #[command(subcommand)]
    Device(DeviceAction),

    /// Control a device's session daemon.
    #[command(subcommand)]
    Daemon(DaemonAction),

    /// Binary RTT-style capture to/from file.
    #[command(subcommand)]
    Capture(CaptureAction),

    /// Non-halting DWT data watchpoints.
    #[command(subcommand)]
    Dwt(DwtAction),

    /// Register-map-driven peripheral register access.
    #[command(subcommand)]
    Reg(RegAction),

    /// Fault-status register decoding.
    Fault(FaultArgs),

    /// Crash backtrace symbol resolution.
    Backtrace(BacktraceArgs),

    /// Trace export to Perfetto's Chrome JSON format.
    Trace(TraceArgs),
}

#[derive(Debug, Subcommand)]
pub enum DeviceAction {
    /// Register a new device.
    Add(DeviceAddArgs),
    /// Remove a registered device.
    Remove(DeviceNameArgs),
    /// List registered devices.
    List,
}

#[derive(Debug, Args)]
pub struct DeviceAddArgs {
    pub name: String,
    #[arg(long)]
    pub chip: String,
    #[arg(long)]
    pub probe_kind: String,
    #[arg(long)]
    pub port: String,
    #[arg(long)]
    pub firmware: Option<String>,
}

#[derive(Debug, Args)]
pub struct DeviceNameArgs {
    pub name: String,
}

#[derive(Debug, Subcommand)]
pub enum DaemonAction {
    /// Start the session daemon for a device.
    Start(DaemonStartArgs),
    /// Stop the session daemon for a device.
    Stop(DeviceNameArgs),
    /// Suspend recovery actions for a duration.
    Pause(DaemonPauseArgs),
    /// Resume recovery actions.
    Resume(DeviceNameArgs),
    /// Print the current status snapshot.
    Status(DeviceNameArgs),
}

#[derive(Debug, Args)]
pub struct DaemonStartArgs {
    pub name: String,
    /// Terminate any existing holder of the device's singleton/port locks first.
    #[arg(long)]
    pub force: bool,
    #[arg(long, default_value = "SWD")]
    pub interface: String,
    #[arg(long, default_value_t = 4000)]
    pub speed: u32,
}

#[derive(Debug, Args)]
pub struct DaemonPauseArgs {
    pub name: String,
    #[arg(long, default_value_t = 60)]
    pub seconds: u64,
}

#[derive(Debug, Subcommand)]
pub enum CaptureAction {
    /// Start a binary capture in the foreground until interrupted.
    Start(CaptureStartArgs),
    /// Convert a `.rttbin` capture to csv/wav/numeric.
    Convert(CaptureConvertArgs),
}

#[derive(Debug, Args)]
pub struct CaptureStartArgs {
    pub name: String,
    #[arg(long, value_delimiter = ',', default_value = "0")]
    pub channels: Vec<u8>,
    /// Defaults to `<device>.rttbin` under the device's state directory.
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long, default_value_t = 2)]
    pub sample_width: u8,
    #[arg(long, default_value_t = 0)]
    pub sample_rate: u32,
    #[arg(long, default_value_t = 0)]
    pub timestamp_hz: u32,
}

#[derive(Debug, Args)]
pub struct CaptureConvertArgs {
    pub input: PathBuf,
    #[arg(long)]
    pub output: PathBuf,
    #[arg(long, default_value = "csv")]
    pub format: String,
    /// Channel to extract for the "wav" format.
    #[arg(long, default_value_t = 0)]
    pub channel: u8,
}

#[derive(Debug, Subcommand)]
pub enum DwtAction {
    /// Install a non-halting poll-based watchpoint.
    Watch(DwtWatchArgs),
    /// List active watchpoints for a device.
    List(DeviceNameArgs),
    /// Release a watchpoint by comparator index.
    Release(DwtReleaseArgs),
    /// Print the GDB Python script for a halting watchpoint.
    Explain(DwtExplainArgs),
}

#[derive(Debug, Args)]
pub struct DwtWatchArgs {
    pub name: String,
    /// Raw hex ("0x...") or decimal address. Mutually exclusive with --symbol.
    #[arg(long)]
    pub address: Option<String>,
    /// Variable name to resolve via --elf instead of a raw --address.
    #[arg(long)]
    pub symbol: Option<String>,
    /// ELF file to resolve --symbol against.
    #[arg(long)]
    pub elf: Option<PathBuf>,
    #[arg(long, default_value = "write")]
    pub mode: String,
    /// Overrides the size detected from the ELF symbol, or the default for a raw address.
    #[arg(long)]
    pub size: Option<u8>,
    #[arg(long, default_value_t = 100)]
    pub poll_hz: u32,
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Debug, Args)]
pub struct DwtReleaseArgs {
    pub name: String,
    pub index: u8,
}

#[derive(Debug, Args)]
pub struct DwtExplainArgs {
    pub var_name: String,
    #[arg(long, default_value = "write")]
    pub mode: String,
    #[arg(long)]
    pub condition: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub max_hits: u32,
    #[arg(long)]
    pub backtrace: bool,
}

#[derive(Debug, Subcommand)]
pub enum RegAction {
    /// Read and decode one register from a register map.
    Read(RegReadArgs),
    /// Decode a raw value against a register map entry without reading hardware.
    Decode(RegDecodeArgs),
}

#[derive(Debug, Args)]
pub struct RegReadArgs {
    pub name: String,
    #[arg(long)]
    pub regmap: PathBuf,
    pub register: String,
}

#[derive(Debug, Args)]
pub struct RegDecodeArgs {
    #[arg(long)]
    pub regmap: PathBuf,
    pub register: String,
    pub value: String,
}

#[derive(Debug, Args)]
pub struct FaultArgs {
    pub name: String,
    /// "cortex-m", or a path to a register map for "c2000".
    #[arg(long, default_value = "cortex-m")]
    pub decoder: String,
    #[arg(long)]
    pub regmap: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct BacktraceArgs {
    pub input: PathBuf,
    #[arg(long)]
    pub elf: PathBuf,
    #[arg(long, default_value = "cortex-m")]
    pub arch: String,
    #[arg(long)]
    pub toolchain_path: Option<PathBuf>,
    #[arg(long)]
    pub show_raw: bool,
}

#[derive(Debug, Args)]
pub struct TraceArgs {
    pub input: PathBuf,
    #[arg(long)]
    pub output: PathBuf,
    /// Override auto-detection.
    #[arg(long)]
    pub format: Option<String>,
    /// External converter binary for systemview/ctf, if not on PATH under its default name.
    #[arg(long)]
    pub tool: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Opt::command().debug_assert();
    }

    #[test]
    fn parses_device_add() {
        let opt = Opt::parse_from([
            "eabctl", "device", "add", "board-a", "--chip", "nrf5340", "--probe-kind", "jlink", "--port", "000123",
        ]);
        match opt.action {
            Action::Device(DeviceAction::Add(args)) => {
                assert_eq!(args.name, "board-a");
                assert_eq!(args.chip, "nrf5340");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn parses_daemon_start_with_force() {
        let opt = Opt::parse_from(["eabctl", "daemon", "start", "board-a", "--force"]);
        match opt.action {
            Action::Daemon(DaemonAction::Start(args)) => {
                assert_eq!(args.name, "board-a");
                assert!(args.force);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }
}
