use crate::{property_key, render_time, Event, TimeMode, TimeReference, Value};
use id_registry::Registries;
use serde::{Deserialize, Serialize};
use time::UtcOffset;

/// Layout of an output line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Tab separated columns.
    #[default]
    Std,
    /// `key: value` pairs.
    Kv,
    /// `"key": value` pairs with string values quoted.
    Kvq,
}

/// Replace non-printable bytes: CR and LF become `\r` and `\n`, any other byte
/// outside 0x20..=0x7e becomes `#{XX}` with two uppercase hex digits.
pub fn escape_nonprintable(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            0x20..=0x7e => out.push(char::from(b)),
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            _ => out.push_str(&format!("#{{{b:02X}}}")),
        }
    }
    out
}

/// Renders events as output lines and records every device, property and
/// state name it sees in the registries.
#[derive(Debug, Clone)]
pub struct Formatter {
    format: OutputFormat,
    time_mode: TimeMode,
    local_offset: UtcOffset,
}

impl Formatter {
    pub fn new(format: OutputFormat, time_mode: TimeMode) -> Self {
        Self {
            format,
            time_mode,
            local_offset: UtcOffset::UTC,
        }
    }

    pub fn with_local_offset(mut self, offset: UtcOffset) -> Self {
        self.local_offset = offset;
        self
    }

    pub fn format(&self, event: &Event, time: &TimeReference, registries: &mut Registries) -> String {
        let ts = render_time(time, self.time_mode, self.local_offset);
        match event {
            Event::StateChange { device, state } => {
                let state_id = registries.states.lookup_or_assign(state);
                registries.devices.lookup_or_assign(device);
                self.state_line(&escape_nonprintable(device), &escape_nonprintable(state), state_id, &ts)
            }
            Event::PropertyChange {
                device,
                property,
                value,
            } => {
                let key = property_key(device, property.as_deref());
                registries.devices.lookup_or_assign(&key);
                let label = property.as_deref().unwrap_or("value");
                self.property_line(
                    &escape_nonprintable(device),
                    &escape_nonprintable(&key),
                    &escape_nonprintable(label),
                    &render_value(value),
                    &ts,
                )
            }
            Event::Update { values } => {
                let mut out = ts;
                for value in values {
                    out.push('\t');
                    out.push_str(&escape_nonprintable(&value.to_string()));
                }
                out
            }
            Event::RawText { payload } => payload.clone(),
        }
    }

    fn state_line(&self, device: &str, state: &str, state_id: u32, ts: &str) -> String {
        match self.format {
            OutputFormat::Std => format!("{ts}\t{device}\t{state}\t{state_id}"),
            OutputFormat::Kv => format!("machine: {device}, state: {state}, timestamp: {ts}"),
            OutputFormat::Kvq => format!(
                "\"machine\": \"{device}\", \"state\": \"{state}\", \"timestamp\": {}",
                self.quoted_time(ts)
            ),
        }
    }

    fn property_line(&self, device: &str, key: &str, label: &str, value: &str, ts: &str) -> String {
        match self.format {
            OutputFormat::Std => format!("{ts}\t{key}\tvalue\t{value}"),
            OutputFormat::Kv => format!("machine: {device}, {label}: {value}, timestamp: {ts}"),
            OutputFormat::Kvq => format!(
                "\"machine\": \"{device}\", \"{label}\": {value}, \"timestamp\": {}",
                self.quoted_time(ts)
            ),
        }
    }

    fn quoted_time(&self, ts: &str) -> String {
        if self.time_mode.is_wallclock() {
            format!("\"{ts}\"")
        } else {
            ts.to_string()
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Text(s) => format!("\"{}\"", escape_nonprintable(s)),
        other => escape_nonprintable(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn at_1500us() -> TimeReference {
        TimeReference::new(1_500, datetime!(2026-10-19 08:05:03 UTC))
    }

    fn state_change() -> Event {
        Event::StateChange {
            device: "pump1".into(),
            state: "running".into(),
        }
    }

    #[test]
    fn test_escape_nonprintable() {
        assert_eq!(escape_nonprintable("a\tb"), "a#{09}b");
        assert_eq!(escape_nonprintable("a\nb\r"), "a\\nb\\r");
        assert_eq!(escape_nonprintable("plain text!"), "plain text!");
        assert_eq!(escape_nonprintable("\u{7f}"), "#{7F}");
        assert_eq!(escape_nonprintable("é"), "#{C3}#{A9}");
    }

    #[test]
    fn test_std_state_line_uses_state_id() {
        let mut regs = Registries::in_memory();
        for s in ["idle", "stopped", "faulted"] {
            regs.states.lookup_or_assign(s);
        }
        let f = Formatter::new(OutputFormat::Std, TimeMode::OffsetMillis);
        assert_eq!(f.format(&state_change(), &at_1500us(), &mut regs), "1\tpump1\trunning\t3");
        assert_eq!(regs.devices.get("pump1"), Some(0));
    }

    #[test]
    fn test_kv_and_kvq_state_lines() {
        let mut regs = Registries::in_memory();
        let kv = Formatter::new(OutputFormat::Kv, TimeMode::OffsetMicros);
        assert_eq!(
            kv.format(&state_change(), &at_1500us(), &mut regs),
            "machine: pump1, state: running, timestamp: 1500"
        );
        let kvq = Formatter::new(OutputFormat::Kvq, TimeMode::WallclockIso8601);
        assert_eq!(
            kvq.format(&state_change(), &at_1500us(), &mut regs),
            "\"machine\": \"pump1\", \"state\": \"running\", \"timestamp\": \"20261019T080503.000000Z\""
        );
    }

    #[test]
    fn test_property_lines() {
        let mut regs = Registries::in_memory();
        let event = Event::PropertyChange {
            device: "pump1".into(),
            property: Some("mode".into()),
            value: Value::text("auto"),
        };
        let std = Formatter::new(OutputFormat::Std, TimeMode::OffsetMillis);
        assert_eq!(std.format(&event, &at_1500us(), &mut regs), "1\tpump1.mode\tvalue\t\"auto\"");
        let kvq = Formatter::new(OutputFormat::Kvq, TimeMode::OffsetMillis);
        assert_eq!(
            kvq.format(&event, &at_1500us(), &mut regs),
            "\"machine\": \"pump1\", \"mode\": \"auto\", \"timestamp\": 1"
        );
        assert_eq!(regs.devices.get("pump1.mode"), Some(0));
    }

    #[test]
    fn test_legacy_value_escapes_newline() {
        let mut regs = Registries::in_memory();
        let event = Event::PropertyChange {
            device: "pump1".into(),
            property: None,
            value: Value::symbol("a\nb"),
        };
        let f = Formatter::new(OutputFormat::Kv, TimeMode::OffsetMillis);
        assert_eq!(
            f.format(&event, &at_1500us(), &mut regs),
            "machine: pump1, value: a\\nb, timestamp: 1"
        );
    }

    #[test]
    fn test_update_and_raw() {
        let mut regs = Registries::in_memory();
        let f = Formatter::new(OutputFormat::Std, TimeMode::OffsetMicros);
        let update = Event::Update {
            values: vec![Value::Integer(7), Value::text("x\ty")],
        };
        assert_eq!(f.format(&update, &at_1500us(), &mut regs), "1500\t7\tx#{09}y");
        let raw = Event::RawText {
            payload: "anything goes".into(),
        };
        assert_eq!(f.format(&raw, &at_1500us(), &mut regs), "anything goes");
        assert!(regs.devices.is_empty());
    }
}
