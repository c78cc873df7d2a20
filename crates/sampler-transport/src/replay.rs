use crate::{
    Address, ChannelInfo, Connector, ControlSession, LineEndpoint, Message, Publisher, Result,
    Subscriber, TransportError,
};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const IDLE_WAIT_MS: u64 = 200;

/// Replays newline-delimited payloads from a file (or stdin for `-`) as if they
/// had been published on the subscribed channel. Directives are acknowledged
/// locally and republished output is appended to an optional sink file.
pub struct ReplayConnector {
    source: PathBuf,
    sink: Option<PathBuf>,
}

impl ReplayConnector {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: impl Into<PathBuf>) -> Self {
        self.sink = Some(sink.into());
        self
    }
}

impl Connector for ReplayConnector {
    type Session = LoopbackSession;
    type Subscriber = ReplaySubscriber;
    type Publisher = FilePublisher;
    type Endpoint = LineEndpoint;

    fn handshake(&mut self, setup: &Address, channel: &str) -> Result<(LoopbackSession, ChannelInfo)> {
        debug!("replay handshake on {setup} for channel {channel}");
        Ok((
            LoopbackSession::default(),
            ChannelInfo {
                name: channel.to_string(),
                subscription_port: setup.port,
            },
        ))
    }

    fn subscribe(&mut self, _address: &Address) -> Result<ReplaySubscriber> {
        ReplaySubscriber::open(&self.source)
    }

    fn publisher(&mut self, _address: &Address) -> Result<FilePublisher> {
        match &self.sink {
            Some(path) => FilePublisher::create(path),
            None => Err(TransportError::Unsupported(
                "replay backend needs a sink file to republish",
            )),
        }
    }

    fn command_endpoint(&mut self, ports: RangeInclusive<u16>) -> Result<(LineEndpoint, u16)> {
        LineEndpoint::bind(ports)
    }
}

/// Control session that acknowledges every directive with `OK`.
#[derive(Default)]
pub struct LoopbackSession {
    pending: Option<Vec<u8>>,
}

impl ControlSession for LoopbackSession {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.pending.is_some() {
            return Err(TransportError::InvalidState("reply pending".to_string()));
        }
        info!("directive: {}", String::from_utf8_lossy(payload));
        self.pending = Some(b"OK".to_vec());
        Ok(())
    }

    fn recv(&mut self, _timeout_ms: u64) -> Result<Vec<u8>> {
        self.pending
            .take()
            .ok_or_else(|| TransportError::InvalidState("no request pending".to_string()))
    }

    fn reset(&mut self) -> Result<()> {
        self.pending = None;
        Ok(())
    }
}

pub struct ReplaySubscriber {
    reader: Box<dyn BufRead + Send>,
    exhausted: bool,
}

impl ReplaySubscriber {
    pub fn open(path: &Path) -> Result<Self> {
        let reader: Box<dyn BufRead + Send> = if path == Path::new("-") {
            Box::new(BufReader::new(std::io::stdin()))
        } else {
            let file = File::open(path)
                .map_err(|e| TransportError::InterfaceNotFound(format!("{}: {e}", path.display())))?;
            Box::new(BufReader::new(file))
        };
        Ok(Self::from_reader(reader))
    }

    pub fn from_reader(reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader,
            exhausted: false,
        }
    }
}

impl Subscriber for ReplaySubscriber {
    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<Message> {
        while !self.exhausted {
            // payloads are bytes; decoding is lossy further up
            let mut line = Vec::new();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                info!("replay source exhausted");
                self.exhausted = true;
                break;
            }
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            if !line.is_empty() {
                return Ok(Message::stamped(line));
            }
        }
        std::thread::sleep(Duration::from_millis(timeout_ms.unwrap_or(IDLE_WAIT_MS)));
        Err(TransportError::Timeout)
    }
}

/// Appends each published payload as one line of a file.
pub struct FilePublisher {
    writer: BufWriter<File>,
}

impl FilePublisher {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl Publisher for FilePublisher {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.writer.write_all(payload)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
