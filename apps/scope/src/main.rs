use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use id_registry::{parse_entries, DEVICES_FILE};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

mod pivot;
use pivot::{Columns, Scope};

const SCOPE_FILE: &str = "scope.dat";

#[derive(Parser, Debug)]
#[command(
    name = "scope",
    version,
    about = "Pivot sampler output (time device state id) into one column per device"
)]
struct Args {
    /// Emit state names
    #[arg(short = 'S', action = ArgAction::SetTrue, overrides_with = "no_state_names")]
    state_names: bool,
    /// Do not emit state names
    #[arg(short = 's', action = ArgAction::SetTrue, overrides_with = "state_names")]
    no_state_names: bool,
    /// Emit state ids
    #[arg(short = 'I', action = ArgAction::SetTrue, overrides_with = "no_state_ids")]
    state_ids: bool,
    /// Do not emit state ids
    #[arg(short = 'i', action = ArgAction::SetTrue, overrides_with = "state_ids")]
    no_state_ids: bool,
    /// Synthesize a square wave display
    #[arg(short = 'R', action = ArgAction::SetTrue, overrides_with = "no_square_wave")]
    square_wave: bool,
    /// Do not synthesize a square wave
    #[arg(short = 'r', action = ArgAction::SetTrue, overrides_with = "square_wave")]
    no_square_wave: bool,
    /// Directory holding scope.dat or devices.dat
    #[arg(long, default_value = ".")]
    state_dir: PathBuf,
}

impl Args {
    fn columns(&self) -> Columns {
        let state_names = self.state_names && !self.no_state_names;
        let state_ids = !self.no_state_ids || !state_names;
        Columns {
            state_names,
            state_ids,
        }
    }
}

/// Device names to report: `scope.dat` if present, else `devices.dat`.
fn load_devices(dir: &Path) -> Result<Vec<String>> {
    for name in [SCOPE_FILE, DEVICES_FILE] {
        let path = dir.join(name);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let devices: Vec<String> =
                    parse_entries(&raw, &path).into_iter().map(|e| e.name).collect();
                debug!("tracking {} devices from {}", devices.len(), path.display());
                return Ok(devices);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
    warn!("no {SCOPE_FILE} or {DEVICES_FILE} in {}; no device columns", dir.display());
    Ok(Vec::new())
}

fn main() -> Result<()> {
    setup_tracing();
    let args = Args::parse();
    let devices = load_devices(&args.state_dir)?;
    let mut scope = Scope::new(devices, args.columns(), args.square_wave && !args.no_square_wave);
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    pivot::run(&mut scope, stdin.lock(), &mut stdout).context("pivoting input")?;
    Ok(())
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();
}
