use crate::{dispatch, CommandError, CommandRequest, CommandResult, DirectiveSink, MonitorDirective};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use sampler_transport::{CommandEndpoint, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A directive handed from the command thread to the gateway loop, which owns
/// the control-plane session and answers on `respond`.
#[derive(Debug)]
pub struct RelayRequest {
    pub directive: MonitorDirective,
    pub respond: Sender<CommandResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayPolicy {
    /// How many times to wait for the gateway loop's answer.
    pub attempts: u32,
    pub attempt_timeout: Duration,
    /// Receive timeout of the command endpoint; bounds how long a stop request
    /// goes unnoticed.
    pub poll_interval: Duration,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            attempt_timeout: Duration::from_millis(1_000),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Sends directives to the gateway loop and waits a bounded time for the outcome.
#[derive(Debug, Clone)]
pub struct ChannelRelay {
    tx: Sender<RelayRequest>,
    policy: RelayPolicy,
}

impl ChannelRelay {
    pub fn new(tx: Sender<RelayRequest>, policy: RelayPolicy) -> Self {
        Self { tx, policy }
    }
}

impl DirectiveSink for ChannelRelay {
    fn relay(&self, directive: MonitorDirective) -> CommandResult {
        let (respond, outcome) = bounded(1);
        self.tx
            .send(RelayRequest { directive, respond })
            .map_err(|_| CommandError::RelayFailed)?;
        for attempt in 1..=self.policy.attempts {
            match outcome.recv_timeout(self.policy.attempt_timeout) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    debug!("no relay outcome after attempt {attempt}");
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Err(CommandError::RelayFailed)
    }
}

/// Parse and execute one command, producing the reply text.
pub fn handle_request(raw: &[u8], sink: &impl DirectiveSink) -> String {
    debug!("command received: {}", String::from_utf8_lossy(raw));
    let result = match CommandRequest::parse(raw) {
        Some(request) => dispatch(&request, sink),
        None => Err(CommandError::Empty),
    };
    match result {
        Ok(reply) => reply,
        Err(err) => {
            info!("command failed: {err}");
            err.to_string()
        }
    }
}

/// The command actor: a thread that answers operator commands on a local
/// endpoint until stopped.
#[derive(Debug)]
pub struct CommandRelay {
    port: u16,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CommandRelay {
    pub fn spawn<E>(
        endpoint: E,
        port: u16,
        tx: Sender<RelayRequest>,
        policy: RelayPolicy,
    ) -> std::io::Result<Self>
    where
        E: CommandEndpoint + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let sink = ChannelRelay::new(tx, policy);
        let handle = thread::Builder::new()
            .name("command-relay".into())
            .spawn(move || command_loop(endpoint, sink, flag, policy.poll_interval))?;
        info!("accepting commands on port {port}");
        Ok(Self {
            port,
            stop,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Ask the thread to finish and wait for it; the endpoint is released when
    /// the thread exits.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("command relay thread panicked");
            }
            debug!("command relay stopped");
        }
    }
}

impl Drop for CommandRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

fn command_loop<E: CommandEndpoint>(
    mut endpoint: E,
    sink: ChannelRelay,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let poll_ms = u64::try_from(poll_interval.as_millis()).unwrap_or(u64::MAX);
    while !stop.load(Ordering::Relaxed) {
        let raw = match endpoint.recv(poll_ms) {
            Ok(raw) => raw,
            Err(TransportError::Timeout) => continue,
            Err(err) if err.is_transient() => {
                debug!("command endpoint: {err}");
                continue;
            }
            Err(err) => {
                error!("command endpoint failed: {err}");
                break;
            }
        };
        let reply = handle_request(&raw, &sink);
        if let Err(err) = endpoint.reply(reply.as_bytes()) {
            warn!("failed to answer command: {err}");
        }
    }
}
