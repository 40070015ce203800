use std::path::{Path, PathBuf};
use std::time::SystemTime;

use clap::Parser;
use serde_json::{json, Value};

use eab::{backtrace, capture, cli, daemon, device, error, fault, regmap, shared, trace, transport, watchpoint};

use cli::{
    Action, BacktraceArgs, CaptureAction, DaemonAction, DeviceAction, DwtAction, FaultArgs, Opt, RegAction, TraceArgs,
};
use device::{base_dir, registry_dir, Device, DeviceRegistry};
use error::{EabError, Result};
use transport::Transport;

const SCHEMA_VERSION: u32 = 1;

fn now_rfc3339() -> String {
    humantime::format_rfc3339(SystemTime::now()).to_string()
}

fn print_result(json_mode: bool, mut payload: Value) -> i32 {
    let obj = payload.as_object_mut().expect("payload must be a JSON object");
    obj.entry("schema_version").or_insert(json!(SCHEMA_VERSION));
    obj.entry("timestamp").or_insert(json!(now_rfc3339()));
    let exit_code = if obj.contains_key("error") { 2 } else { 0 };

    if json_mode {
        println!("{}", serde_json::to_string(&payload).unwrap());
    } else if let Some(error) = obj.get("error") {
        eprintln!("error: {error}");
    } else {
        println!("{}", serde_json::to_string_pretty(&payload).unwrap());
    }
    exit_code
}

fn err_payload(e: &EabError) -> Value {
    json!({"error": e.kind().as_str(), "message": e.to_string()})
}

fn main() {
    env_logger::init();
    let opt = Opt::parse();

    let result = match &opt.action {
        Action::Device(action) => run_device(action),
        Action::Daemon(action) => run_daemon(action),
        Action::Capture(action) => run_capture(action),
        Action::Dwt(action) => run_dwt(action),
        Action::Reg(action) => run_reg(action),
        Action::Fault(args) => run_fault(args),
        Action::Backtrace(args) => run_backtrace(args),
        Action::Trace(args) => run_trace(args),
    };

    let payload = match result {
        Ok(value) => value,
        Err(e) => err_payload(&e),
    };
    std::process::exit(print_result(opt.json, payload));
}

/// Builds a `Transport` from a device's `probe_kind`. Only backends this
/// crate's own dependency stack can drive without an external vendor SDK
/// binding are supported from the CLI; `native` requires a `ProbeSession`
/// implementation supplied by a separate binding crate and is therefore
/// reachable only from library code, not `eabctl` directly.
fn build_transport(probe_kind: &str) -> Result<Box<dyn Transport>> {
    let (kind, rest) = probe_kind.split_once(':').unwrap_or((probe_kind, ""));
    match kind {
        "serial" => {
            let baud: u32 = rest.parse().unwrap_or(115_200);
            Ok(Box::new(transport::serial::SerialTransport::new(baud)))
        }
        "cli_subprocess" => {
            if rest.is_empty() {
                return Err(EabError::InvalidArgument("cli_subprocess probe-kind needs ':<binary>'".into()));
            }
            Ok(Box::new(transport::cli_subprocess::CliSubprocessTransport::new(rest)))
        }
        "scripting_server" => {
            let command = shlex::split(rest)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| EabError::InvalidArgument("scripting_server probe-kind needs ':<command>'".into()))?;
            Ok(Box::new(transport::scripting_server::ScriptingServerTransport::new(command)))
        }
        other => Err(EabError::Unsupported(format!(
            "probe-kind '{other}' needs an in-process ProbeSession binding crate, not available to eabctl directly"
        ))),
    }
}

fn load_device(name: &str) -> Result<(Device, PathBuf, PathBuf)> {
    let reg_dir = registry_dir()?;
    let registry = DeviceRegistry::load(&reg_dir)?;
    let dev = registry.get(name).ok_or_else(|| EabError::NotFound(format!("device '{name}' not registered")))?.clone();
    let base = base_dir(&reg_dir, name);
    Ok((dev, reg_dir, base))
}

fn run_device(action: &DeviceAction) -> Result<Value> {
    let reg_dir = registry_dir()?;
    match action {
        DeviceAction::Add(args) => {
            let mut registry = DeviceRegistry::load(&reg_dir)?;
            registry.add(Device {
                name: args.name.clone(),
                chip: args.chip.clone(),
                probe_kind: args.probe_kind.clone(),
                port_selector: args.port.clone(),
                firmware: args.firmware.clone(),
            })?;
            registry.save(&reg_dir)?;
            Ok(json!({"added": args.name}))
        }
        DeviceAction::Remove(args) => {
            let mut registry = DeviceRegistry::load(&reg_dir)?;
            registry.remove(&args.name)?;
            registry.save(&reg_dir)?;
            Ok(json!({"removed": args.name}))
        }
        DeviceAction::List => {
            let registry = DeviceRegistry::load(&reg_dir)?;
            Ok(json!({"devices": registry.list()}))
        }
    }
}

fn run_daemon(action: &DaemonAction) -> Result<Value> {
    match action {
        DaemonAction::Start(args) => {
            let (dev, reg_dir, base) = load_device(&args.name)?;
            let outcome = device::lifecycle::prepare_start(&base, &reg_dir, args.force);
            if !outcome.started {
                return Ok(serde_json::to_value(&outcome)?);
            }

            let _port_guard = device::port_lock::PortLockGuard::acquire(&reg_dir, &dev.port_selector)?;
            let _singleton_guard = device::singleton::SingletonGuard::acquire(&base)?;

            let transport = build_transport(&dev.probe_kind)?;
            let config = daemon::SessionConfig::new(base.clone(), dev.name.clone(), dev.port_selector.clone());
            let session = daemon::Session::new(config);

            let stop = session.stop_handle();
            let ctrl_c = shared::ctrl_c::CtrlC::observe_oneshot();
            std::thread::spawn(move || {
                if ctrl_c.recv().is_ok() {
                    stop.store(true, std::sync::atomic::Ordering::SeqCst);
                }
            });

            session.run(transport, &args.interface, args.speed)?;
            Ok(json!({"started": true, "stopped_cleanly": true}))
        }
        DaemonAction::Stop(args) => {
            let (_dev, _reg_dir, base) = load_device(&args.name)?;
            let (stopped, pid) = device::lifecycle::stop(&base);
            Ok(json!({"stopped": stopped, "pid": pid}))
        }
        DaemonAction::Pause(args) => {
            let (_dev, _reg_dir, base) = load_device(&args.name)?;
            let until = device::lifecycle::pause(&base, args.seconds)?;
            Ok(json!({"paused_until": until}))
        }
        DaemonAction::Resume(args) => {
            let (_dev, _reg_dir, base) = load_device(&args.name)?;
            device::lifecycle::resume(&base)?;
            Ok(json!({"resumed": true}))
        }
        DaemonAction::Status(args) => {
            let (_dev, _reg_dir, base) = load_device(&args.name)?;
            let path = daemon::session::status_path(&base);
            match std::fs::read_to_string(&path) {
                Ok(raw) => Ok(serde_json::from_str(&raw)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Ok(json!({"connection": {"status": "stopped"}}))
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

fn run_capture(action: &CaptureAction) -> Result<Value> {
    match action {
        CaptureAction::Start(args) => {
            let (dev, _reg_dir, base) = load_device(&args.name)?;
            let transport = build_transport(&dev.probe_kind)?;
            std::fs::create_dir_all(&base)?;
            let output_path = args
                .output
                .clone()
                .unwrap_or_else(|| capture::default_output_path(&base, &dev.name));
            let config = capture::CaptureConfig {
                channels: args.channels.clone(),
                output_path,
                sample_width: args.sample_width,
                sample_rate: args.sample_rate,
                timestamp_hz: args.timestamp_hz,
                interface: "SWD".into(),
                speed: 4000,
                block_address: None,
                poll_interval: std::time::Duration::from_millis(1),
            };
            let mut engine = capture::CaptureEngine::start(transport, dev.port_selector.clone(), config)?;
            let ctrl_c = shared::ctrl_c::CtrlC::observe_oneshot();
            while engine.is_running() {
                if ctrl_c.recv_timeout(std::time::Duration::from_millis(100)).is_ok() {
                    break;
                }
            }
            let summary = engine.stop()?;
            Ok(serde_json::to_value(&summary)?)
        }
        CaptureAction::Convert(args) => {
            match args.format.as_str() {
                "csv" => capture::convert::csv::to_csv(&args.input, &args.output)?,
                "wav" => capture::convert::wav::to_wav(&args.input, &args.output, args.channel, None, None)?,
                "numeric" => {
                    let samples = capture::convert::numeric::to_samples(&args.input, None)?;
                    let as_json: std::collections::BTreeMap<u8, Vec<i64>> = samples
                        .into_iter()
                        .map(|(ch, s)| {
                            let values = match s {
                                capture::convert::numeric::Samples::U8(v) => v.into_iter().map(i64::from).collect(),
                                capture::convert::numeric::Samples::I16(v) => v.into_iter().map(i64::from).collect(),
                                capture::convert::numeric::Samples::I32(v) => v.into_iter().map(i64::from).collect(),
                            };
                            (ch, values)
                        })
                        .collect();
                    std::fs::write(&args.output, serde_json::to_vec_pretty(&as_json)?)?;
                }
                other => return Err(EabError::InvalidArgument(format!("unknown convert format '{other}'"))),
            }
            Ok(json!({"output": args.output.display().to_string()}))
        }
    }
}

fn run_dwt(action: &DwtAction) -> Result<Value> {
    use watchpoint::{ComparatorAllocator, WatchMode, WatchpointPollerConfig};

    let active_path = |base: &Path| base.join("dwt_active.json");

    match action {
        DwtAction::Watch(args) => {
            let (dev, _reg_dir, base) = load_device(&args.name)?;
            std::fs::create_dir_all(&base)?;

            let (address, detected_size) = match (&args.address, &args.symbol) {
                (Some(raw), _) => (parse_u64(raw)?, None),
                (None, Some(symbol)) => {
                    let elf = args.elf.as_ref().ok_or_else(|| {
                        EabError::InvalidArgument(format!(
                            "symbol '{symbol}' requires --elf for address lookup, or pass --address directly"
                        ))
                    })?;
                    let resolved = backtrace::resolve_symbol(symbol, elf)?;
                    (resolved.address, Some(resolved.size as u8))
                }
                (None, None) => {
                    return Err(EabError::InvalidArgument("specify --symbol (with --elf) or --address".into()))
                }
            };
            let size = args.size.or(detected_size).unwrap_or(4);
            let mode = match args.mode.as_str() {
                "read" => WatchMode::Read,
                "write" => WatchMode::Write,
                "readwrite" | "access" => WatchMode::ReadWrite,
                other => return Err(EabError::InvalidArgument(format!("unknown watch mode '{other}'"))),
            };
            let label = args
                .label
                .clone()
                .or_else(|| args.symbol.clone())
                .unwrap_or_else(|| format!("0x{address:08X}"));

            let mut transport = build_transport(&dev.probe_kind)?;
            transport.connect(&dev.name, "SWD", 4000)?;

            let mut allocator = ComparatorAllocator::discover(|addr, size| transport.memory_read(addr, size))?;
            let comparator = allocator.allocate(address, label.clone(), mode, size, |addr, data| {
                transport.memory_write(addr, data)
            })?;

            let (hits_tx, hits_rx) = crossbeam_channel::unbounded();
            let poller_config = WatchpointPollerConfig {
                poll_hz: args.poll_hz,
                events_file: Some(base.join("events.jsonl")),
                write_to_clear_matched: false,
            };
            let poller = watchpoint::WatchpointPoller::start(transport, comparator.clone(), poller_config, hits_tx)?;

            let snapshot = json!({
                "pid": std::process::id(), "label": label, "address_hex": format!("0x{address:08X}"),
                "comparator_index": comparator.index, "mode": args.mode,
            });
            let tmp = active_path(&base).with_extension("json.tmp");
            std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
            std::fs::rename(&tmp, active_path(&base))?;

            let ctrl_c = shared::ctrl_c::CtrlC::observe_oneshot();
            let mut hit_count = 0u64;
            loop {
                if ctrl_c.try_recv().is_ok() {
                    break;
                }
                if hits_rx.recv_timeout(std::time::Duration::from_millis(200)).is_ok() {
                    hit_count += 1;
                }
            }

            poller.stop()?;
            let _ = std::fs::remove_file(active_path(&base));
            Ok(json!({"hits": hit_count}))
        }
        DwtAction::List(args) => {
            let (_dev, _reg_dir, base) = load_device(&args.name)?;
            match std::fs::read_to_string(active_path(&base)) {
                Ok(raw) => Ok(json!({"active": [serde_json::from_str::<Value>(&raw)?]})),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(json!({"active": []})),
                Err(e) => Err(e.into()),
            }
        }
        DwtAction::Release(args) => {
            let (_dev, _reg_dir, base) = load_device(&args.name)?;
            let raw = std::fs::read_to_string(active_path(&base))
                .map_err(|_| EabError::NotFound("no active watchpoint for this device".into()))?;
            let active: Value = serde_json::from_str(&raw)?;
            let recorded_index = active["comparator_index"].as_u64().unwrap_or(u64::MAX);
            if recorded_index != args.index as u64 {
                return Err(EabError::NotFound(format!("comparator {} is not active", args.index)));
            }
            let pid = active["pid"].as_u64().unwrap_or(0) as u32;
            #[cfg(unix)]
            {
                let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGTERM);
            }
            Ok(json!({"released": args.index, "signaled_pid": pid}))
        }
        DwtAction::Explain(args) => {
            let watch_mode = match args.mode.as_str() {
                "read" => WatchMode::Read,
                "write" => WatchMode::Write,
                "readwrite" | "access" => WatchMode::ReadWrite,
                other => return Err(EabError::InvalidArgument(format!("unknown watch mode '{other}'"))),
            };
            let result_file = watchpoint::default_result_file(&args.var_name);
            let spec = watchpoint::HaltingWatchpointSpec {
                var_name: &args.var_name,
                mode: watch_mode,
                condition: args.condition.as_deref(),
                max_hits: args.max_hits,
                backtrace: args.backtrace,
                result_file: &result_file,
            };
            let script = watchpoint::generate_halting_watchpoint_script(&spec);
            Ok(json!({"script": script, "result_file": result_file}))
        }
    }
}

fn parse_u64(s: &str) -> Result<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| EabError::InvalidArgument(format!("bad hex address '{s}': {e}")))
    } else {
        s.parse().map_err(|e| EabError::InvalidArgument(format!("bad address '{s}': {e}")))
    }
}

fn find_register<'a>(map: &'a regmap::RegisterMap, name: &str) -> Result<&'a regmap::Register> {
    map.all_registers()
        .into_iter()
        .find(|r| r.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| EabError::NotFound(format!("register '{name}' not found in register map")))
}

fn run_reg(action: &RegAction) -> Result<Value> {
    match action {
        cli::RegAction::Read(args) => {
            let (dev, _reg_dir, _base) = load_device(&args.name)?;
            let map = regmap::load_register_map(&args.regmap)?;
            let register = find_register(&map, &args.register)?;

            let mut transport = build_transport(&dev.probe_kind)?;
            transport.connect(&dev.name, "SWD", 4000)?;
            let raw = transport.memory_read(register.address, register.size)?;
            let value = regmap::decode::bytes_to_int(&raw, register.size, false);
            let decoded = regmap::decode_register(register, value);
            let mut json = serde_json::to_value(&decoded)?;
            json["raw_value_hex"] = json!(decoded.hex_value());
            Ok(json)
        }
        cli::RegAction::Decode(args) => {
            let map = regmap::load_register_map(&args.regmap)?;
            let register = find_register(&map, &args.register)?;
            let value = parse_u64(&args.value)?;
            let decoded = regmap::decode_register(register, value);
            let mut json = serde_json::to_value(&decoded)?;
            json["raw_value_hex"] = json!(decoded.hex_value());
            Ok(json)
        }
    }
}

fn run_fault(args: &FaultArgs) -> Result<Value> {
    use fault::FaultDecoder;

    let (dev, _reg_dir, _base) = load_device(&args.name)?;
    let mut transport = build_transport(&dev.probe_kind)?;
    transport.connect(&dev.name, "SWD", 4000)?;

    let mut memory_reader = |address: u64, size: u8| -> Option<Vec<u8>> { transport.memory_read(address, size).ok() };

    let c2000_map;
    let decoder: Box<dyn FaultDecoder + '_> = match args.decoder.as_str() {
        "cortex-m" => Box::new(fault::cortex_m::CortexMDecoder),
        "c2000" => {
            let regmap_path = args
                .regmap
                .as_ref()
                .ok_or_else(|| EabError::InvalidArgument("c2000 decoder requires --regmap".into()))?;
            c2000_map = regmap::load_register_map(regmap_path)?;
            Box::new(fault::c2000::C2000Decoder::new(&c2000_map))
        }
        other => return Err(EabError::InvalidArgument(format!("unknown fault decoder '{other}'"))),
    };
    let report = decoder.analyze(&mut memory_reader)?;
    Ok(decoder.to_json(&report))
}

fn run_backtrace(args: &BacktraceArgs) -> Result<Value> {
    let text = std::fs::read_to_string(&args.input)?;
    let decoder = backtrace::BacktraceDecoder::new(args.elf.clone(), args.arch.clone(), args.toolchain_path.clone());
    let result = decoder.decode(&text);
    let formatted = decoder.format_result(&result, args.show_raw);

    let entries: Vec<Value> = result
        .entries
        .iter()
        .map(|e| {
            json!({
                "address": format!("0x{:08x}", e.address),
                "pc_address": e.pc_address.map(|a| format!("0x{a:08x}")),
                "function": e.function,
                "file": e.file,
                "line": e.line,
                "raw_line": e.raw_line,
            })
        })
        .collect();

    Ok(json!({
        "result": {"format": result.format.as_str(), "entries": entries, "error": result.error},
        "formatted": formatted,
    }))
}

fn run_trace(args: &TraceArgs) -> Result<Value> {
    let format = match &args.format {
        Some(f) => match f.as_str() {
            "rttbin" => trace::TraceFormat::RttBin,
            "systemview" => trace::TraceFormat::SystemView,
            "ctf" => trace::TraceFormat::Ctf,
            "log" => trace::TraceFormat::Log,
            other => return Err(EabError::InvalidArgument(format!("unknown trace format '{other}'"))),
        },
        None => trace::detect_trace_format(&args.input),
    };

    let summary = match format {
        trace::TraceFormat::RttBin => trace::rttbin_to_perfetto(&args.input, &args.output)?,
        trace::TraceFormat::SystemView | trace::TraceFormat::Ctf => {
            trace::convert_via_external_tool(format, &args.input, &args.output, args.tool.as_deref())?
        }
        trace::TraceFormat::Log => {
            return Err(EabError::Unsupported("plain log files have no trace events to export".into()))
        }
    };
    Ok(json!({"format": format.as_str(), "summary": serde_json::to_value(&summary)?}))
}
