use crate::{CommandEndpoint, Result, TransportError};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};
use tracing::debug;

const BIND_ATTEMPTS: u32 = 3;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(100);
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Newline-delimited request/reply over TCP: one request line per connection,
/// answered with one reply line before the connection is closed.
pub struct LineEndpoint {
    listener: TcpListener,
    pending: Option<TcpStream>,
}

impl LineEndpoint {
    /// Bind the first free port in `ports`, retrying the whole range a few times.
    pub fn bind(ports: RangeInclusive<u16>) -> Result<(Self, u16)> {
        for attempt in 1..=BIND_ATTEMPTS {
            for port in ports.clone() {
                match TcpListener::bind(("0.0.0.0", port)) {
                    Ok(listener) => {
                        listener.set_nonblocking(true)?;
                        return Ok((
                            Self {
                                listener,
                                pending: None,
                            },
                            port,
                        ));
                    }
                    Err(e) => debug!("command port {port} unavailable: {e}"),
                }
            }
            if attempt < BIND_ATTEMPTS {
                std::thread::sleep(BIND_RETRY_DELAY);
            }
        }
        Err(TransportError::InterfaceNotFound(format!(
            "no free command port in {}..={}",
            ports.start(),
            ports.end()
        )))
    }

    fn read_request(&mut self, stream: TcpStream, deadline: Instant) -> Result<Option<Vec<u8>>> {
        stream.set_nonblocking(false)?;
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1));
        stream.set_read_timeout(Some(remaining))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        self.pending = Some(stream);
        Ok(Some(line.trim_end_matches(['\r', '\n']).as_bytes().to_vec()))
    }
}

impl CommandEndpoint for LineEndpoint {
    fn recv(&mut self, timeout_ms: u64) -> Result<Vec<u8>> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.read_request(stream, deadline) {
                    Ok(Some(request)) => return Ok(request),
                    Ok(None) => debug!("command client {peer} closed without a request"),
                    Err(e) => debug!("command client {peer} failed: {e}"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout);
                    }
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn reply(&mut self, payload: &[u8]) -> Result<()> {
        let mut stream = self
            .pending
            .take()
            .ok_or_else(|| TransportError::InvalidState("no request pending".to_string()))?;
        stream.write_all(payload)?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }
}
