use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use tracing::warn;

/// Which per-device columns to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Columns {
    pub state_names: bool,
    pub state_ids: bool,
}

/// One line of sampler `std` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub time_us: u64,
    pub device: String,
    pub state: String,
    pub id: i64,
}

pub fn parse_sample(line: &str) -> Option<Sample> {
    let mut words = line.split_whitespace();
    let time_us = words.next()?.parse().ok()?;
    let device = words.next()?.to_string();
    let state = words.next()?.to_string();
    let id = words.next()?.parse().ok()?;
    Some(Sample {
        time_us,
        device,
        state,
        id,
    })
}

#[derive(Debug, Clone, Default)]
struct Cell {
    state: String,
    id: i64,
}

/// Holds the latest state of each tracked device and prints one row per
/// elapsed millisecond.
pub struct Scope {
    devices: BTreeMap<String, Cell>,
    columns: Columns,
    square_wave: bool,
    last_ms: u64,
}

impl Scope {
    pub fn new(devices: impl IntoIterator<Item = String>, columns: Columns, square_wave: bool) -> Self {
        Self {
            devices: devices.into_iter().map(|d| (d, Cell::default())).collect(),
            columns,
            square_wave,
            last_ms: 0,
        }
    }

    pub fn header(&self) -> String {
        let mut out = String::from("\"Time\"");
        for name in self.devices.keys() {
            if self.columns.state_names {
                out.push_str(&format!("\t\"{name}.state\""));
            }
            if self.columns.state_ids {
                out.push_str(&format!("\t\"{name}\""));
            }
        }
        out
    }

    fn row(&self) -> String {
        let mut out = self.last_ms.to_string();
        for cell in self.devices.values() {
            if self.columns.state_names {
                out.push('\t');
                out.push_str(&cell.state);
            }
            if self.columns.state_ids {
                out.push('\t');
                out.push_str(&cell.id.to_string());
            }
        }
        out
    }

    pub fn observe(&mut self, sample: Sample, out: &mut impl Write) -> io::Result<()> {
        let t = sample.time_us / 1_000;
        if t != self.last_ms {
            writeln!(out, "{}", self.row())?;
            if self.square_wave && t > self.last_ms + 1 {
                self.last_ms = t - 1;
                writeln!(out, "{}", self.row())?;
            }
            self.last_ms = t;
        }
        if let Some(cell) = self.devices.get_mut(&sample.device) {
            cell.state = sample.state;
            cell.id = sample.id;
        }
        Ok(())
    }

    pub fn finish(&mut self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{}", self.row())?;
        writeln!(out, "End of Scope")?;
        out.flush()
    }
}

/// Pivot every line of `input` into `out`, header and trailer included.
pub fn run(scope: &mut Scope, input: impl BufRead, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{}", scope.header())?;
    for (lineno, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_sample(&line) {
            Some(sample) => scope.observe(sample, out)?,
            None => warn!("skipping malformed input line {}: {line:?}", lineno + 1),
        }
    }
    scope.finish(out)
}
