use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use id_registry::Registries;
use sampler_core::{parse_start_time, Gateway, GatewayConfig, OutputFormat, TimeMode};
use sampler_transport::{Connector, MockControlPlane, MockFeed, ReplayConnector};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use time::UtcOffset;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "sampler",
    version,
    about = "Subscribe to a control-plane channel and print its events as text lines"
)]
struct Args {
    /// YAML configuration file; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Republish every output line on the publish port
    #[arg(long, action = ArgAction::SetTrue)]
    republish: bool,

    /// Host running the control plane
    #[arg(long)]
    subscribe: Option<String>,

    /// Subscription port used when the handshake does not name one
    #[arg(long)]
    subscribe_port: Option<u16>,

    /// Interface to republish on
    #[arg(long)]
    interface: Option<String>,

    #[arg(long)]
    publish_port: Option<u16>,

    /// Do not print to stdout
    #[arg(long, action = ArgAction::SetTrue)]
    quiet: bool,

    /// Print payloads without decoding them
    #[arg(long, action = ArgAction::SetTrue)]
    raw: bool,

    /// Only report state changes
    #[arg(long, action = ArgAction::SetTrue)]
    ignore_values: bool,

    /// Drop value changes that are not numbers
    #[arg(long, action = ArgAction::SetTrue)]
    only_numeric_values: bool,

    /// Report elapsed time in milliseconds
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "microsec")]
    millisec: bool,

    /// Report elapsed time in microseconds
    #[arg(long, action = ArgAction::SetTrue)]
    microsec: bool,

    /// Report wall-clock time instead of elapsed time
    #[arg(long, action = ArgAction::SetTrue)]
    timestamp: bool,

    /// Channel to subscribe to
    #[arg(long)]
    channel: Option<String>,

    /// Control-plane setup port
    #[arg(long)]
    cw_port: Option<u16>,

    #[arg(long, action = ArgAction::SetTrue)]
    debug: bool,

    /// Epoch for elapsed time: microseconds since 1970 or an ISO-8601 UTC date-time
    #[arg(long)]
    start: Option<String>,

    #[arg(long, value_enum)]
    format: Option<Format>,

    /// Wall-clock rendering; implies --timestamp
    #[arg(long, value_enum)]
    date_format: Option<DateFormat>,

    /// Directory holding devices.dat and states.dat
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::Mock)]
    backend: Backend,

    /// Replay source for the replay backend (`-` for stdin)
    #[arg(long, default_value = "-")]
    replay_from: PathBuf,

    /// File that receives republished lines on the replay backend
    #[arg(long)]
    replay_sink: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Format {
    Std,
    Kv,
    Kvq,
}

impl Format {
    fn into_core(self) -> OutputFormat {
        match self {
            Format::Std => OutputFormat::Std,
            Format::Kv => OutputFormat::Kv,
            Format::Kvq => OutputFormat::Kvq,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum DateFormat {
    Posix,
    Iso8601,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    /// In-process control plane fed from stdin
    Mock,
    /// Newline-delimited payloads from a file, commands on a local TCP port
    Replay,
}

impl Args {
    fn time_mode(&self, base: TimeMode) -> TimeMode {
        match self.date_format {
            Some(DateFormat::Posix) => return TimeMode::WallclockPosix,
            Some(DateFormat::Iso8601) => return TimeMode::WallclockIso8601,
            None => {}
        }
        if self.timestamp {
            TimeMode::WallclockIso8601
        } else if self.microsec {
            TimeMode::OffsetMicros
        } else if self.millisec {
            TimeMode::OffsetMillis
        } else {
            base
        }
    }

    /// Layer the command line over the file (or default) configuration.
    fn into_config(self) -> Result<GatewayConfig> {
        let mut cfg = match &self.config {
            Some(path) => GatewayConfig::load(path)?,
            None => GatewayConfig::default(),
        };
        cfg.time_mode = self.time_mode(cfg.time_mode);
        if let Some(host) = self.subscribe {
            cfg.subscribe_host = host;
        }
        if let Some(port) = self.subscribe_port {
            cfg.subscribe_port = port;
        }
        if let Some(interface) = self.interface {
            cfg.publish_interface = interface;
        }
        if let Some(port) = self.publish_port {
            cfg.publish_port = port;
        }
        if let Some(channel) = self.channel {
            cfg.channel = channel;
        }
        if let Some(port) = self.cw_port {
            cfg.setup_port = port;
        }
        if let Some(format) = self.format {
            cfg.format = format.into_core();
        }
        if let Some(dir) = self.state_dir {
            cfg.state_dir = dir;
        }
        if let Some(start) = &self.start {
            cfg.start_time_us = Some(parse_start_time(start)?);
        }
        cfg.republish |= self.republish;
        cfg.quiet |= self.quiet;
        cfg.raw |= self.raw;
        cfg.ignore_values |= self.ignore_values;
        cfg.only_numeric_values |= self.only_numeric_values;
        cfg.debug |= self.debug;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let backend = args.backend;
    let replay_from = args.replay_from.clone();
    let replay_sink = args.replay_sink.clone();
    let config = args.into_config()?;
    setup_tracing(config.debug);

    // must be read before any thread is spawned
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    match backend {
        Backend::Mock => {
            let plane = MockControlPlane::new();
            spawn_stdin_feed(plane.feed())?;
            info!("mock backend: reading telemetry from stdin");
            serve(plane.connector(), config, local_offset)
        }
        Backend::Replay => {
            let mut connector = ReplayConnector::new(replay_from);
            if let Some(sink) = replay_sink {
                connector = connector.with_sink(sink);
            }
            serve(connector, config, local_offset)
        }
    }
}

fn serve<C: Connector>(connector: C, config: GatewayConfig, local_offset: UtcOffset) -> Result<()> {
    let registries = Registries::open(&config.state_dir).with_context(|| {
        format!(
            "opening identifier tables in {}",
            config.state_dir.display()
        )
    })?;
    let mut gateway = Gateway::new(connector, config, registries)
        .context("starting gateway")?
        .with_local_offset(local_offset);

    let shutdown = gateway.shutdown_flag();
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
        .context("installing SIGTERM handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .context("installing SIGINT handler")?;

    gateway.run().context("gateway stopped")?;
    Ok(())
}

fn spawn_stdin_feed(feed: MockFeed) -> Result<()> {
    thread::Builder::new()
        .name("stdin-feed".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim().is_empty() => {}
                    Ok(line) => feed.push(line),
                    Err(e) => {
                        warn!("stdin feed: {e}");
                        break;
                    }
                }
            }
            debug!("stdin feed finished");
        })
        .context("spawning stdin feed")?;
    Ok(())
}

fn setup_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
