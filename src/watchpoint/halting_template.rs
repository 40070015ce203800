//! Generates a GDB Python script for a halting watchpoint: unlike the
//! polling engine, this relies on GDB actually breaking into the target on
//! a hardware watchpoint hit, running a short snippet, and resuming.
//!
//! We don't execute GDB ourselves here — that lives in whatever invokes the
//! external `gdb` binary — this module only builds the script text.

use crate::watchpoint::comparator::WatchMode;

fn gdb_watchpoint_class(mode: WatchMode) -> &'static str {
    match mode {
        WatchMode::Read => "rwatch",
        WatchMode::Write => "watch",
        WatchMode::ReadWrite => "awatch",
    }
}

fn gdb_wp_class_constant(mode: WatchMode) -> &'static str {
    match mode {
        WatchMode::Read => "gdb.WP_READ",
        WatchMode::Write => "gdb.WP_WRITE",
        WatchMode::ReadWrite => "gdb.WP_ACCESS",
    }
}

fn py_str_literal(s: &str) -> String {
    format!("{:?}", s)
}

pub struct HaltingWatchpointSpec<'a> {
    pub var_name: &'a str,
    pub mode: WatchMode,
    pub condition: Option<&'a str>,
    pub max_hits: u32,
    pub backtrace: bool,
    pub result_file: &'a str,
}

/// Build the GDB Python script text for a one-shot halting watchpoint on
/// `spec.var_name`. The resulting script defines a `gdb.Breakpoint`
/// subclass whose `stop()` method always returns `False` (never actually
/// halts the target for the user), logs each qualifying hit as a JSON line
/// to `spec.result_file`, and asks GDB to quit once `spec.max_hits` is hit.
pub fn generate_halting_watchpoint_script(spec: &HaltingWatchpointSpec) -> String {
    let wp_class = gdb_wp_class_constant(spec.mode);
    let var_lit = py_str_literal(spec.var_name);
    let result_file_lit = py_str_literal(spec.result_file);

    let cond_check = match spec.condition {
        Some(condition) => format!(
            r#"
        try:
            cond_val = gdb.parse_and_eval({cond_lit})
            if not cond_val:
                return
        except Exception:
            pass
"#,
            cond_lit = py_str_literal(condition)
        ),
        None => String::new(),
    };

    let bt_code = if spec.backtrace {
        r#"
        try:
            bt_lines = []
            frame = gdb.selected_frame()
            while frame:
                sal = frame.find_sal()
                fn = frame.name() or '??'
                f_line = sal.line if sal.symtab else 0
                f_file = sal.symtab.filename if sal.symtab else '??'
                bt_lines.append(f'{fn} ({f_file}:{f_line})')
                frame = frame.older()
            hit_data['backtrace'] = bt_lines
        except Exception as bt_exc:
            hit_data['backtrace'] = str(bt_exc)
"#
        .to_string()
    } else {
        String::new()
    };

    format!(
        r#"
import gdb
import json
import time

_hit_count = [0]
_result_file = {result_file_lit}
_max_hits = {max_hits}

class _DwtHaltWatchpoint(gdb.Breakpoint):
    def __init__(self):
        super().__init__({var_lit}, gdb.BP_WATCHPOINT, wp_class={wp_class}, internal=False)
        self.silent = False

    def stop(self):
        if _hit_count[0] >= _max_hits:
            return False
{cond_check}
        ts_us = int(time.time() * 1_000_000)
        try:
            val = gdb.parse_and_eval({var_lit})
            value_str = str(val)
        except Exception as ve:
            value_str = str(ve)

        hit_data = {{
            'ts': ts_us,
            'label': {var_lit},
            'value': value_str,
            'hit': _hit_count[0] + 1,
        }}
{bt_code}
        with open(_result_file, 'a') as fh:
            fh.write(json.dumps(hit_data) + '\n')

        _hit_count[0] += 1
        if _hit_count[0] >= _max_hits:
            gdb.post_event(lambda: gdb.execute('quit 0'))
        return False

_DwtHaltWatchpoint()
"#,
        result_file_lit = result_file_lit,
        max_hits = spec.max_hits,
        var_lit = var_lit,
        wp_class = wp_class,
        cond_check = cond_check,
        bt_code = bt_code,
    )
}

pub fn default_result_file(var_name: &str) -> String {
    format!("/tmp/eab-dwt-halt-{var_name}.jsonl")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mode_maps_to_expected_gdb_watchpoint_class() {
        assert_eq!(gdb_watchpoint_class(WatchMode::Read), "rwatch");
        assert_eq!(gdb_watchpoint_class(WatchMode::Write), "watch");
        assert_eq!(gdb_watchpoint_class(WatchMode::ReadWrite), "awatch");
    }

    #[test]
    fn script_contains_var_name_and_result_file() {
        let spec = HaltingWatchpointSpec {
            var_name: "g_counter",
            mode: WatchMode::Write,
            condition: None,
            max_hits: 10,
            backtrace: false,
            result_file: "/tmp/out.jsonl",
        };
        let script = generate_halting_watchpoint_script(&spec);
        assert!(script.contains("g_counter"));
        assert!(script.contains("/tmp/out.jsonl"));
        assert!(script.contains("gdb.WP_WRITE"));
        assert!(!script.contains("cond_val"));
        assert!(!script.contains("bt_lines"));
    }

    #[test]
    fn condition_and_backtrace_blocks_appear_when_requested() {
        let spec = HaltingWatchpointSpec {
            var_name: "flag",
            mode: WatchMode::Read,
            condition: Some("flag == 1"),
            max_hits: 5,
            backtrace: true,
            result_file: "/tmp/out2.jsonl",
        };
        let script = generate_halting_watchpoint_script(&spec);
        assert!(script.contains("cond_val"));
        assert!(script.contains("bt_lines"));
        assert!(script.contains("gdb.WP_READ"));
    }

    #[test]
    fn default_result_file_is_under_tmp() {
        let path = default_result_file("x");
        assert_eq!(path, "/tmp/eab-dwt-halt-x.jsonl");
    }
}
