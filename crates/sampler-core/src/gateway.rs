//! The gateway loop: supervise the connection, service relayed commands,
//! decode and emit telemetry, and persist identifiers on the way out.

use crate::{
    CommandRelay, ConnectionSupervisor, Formatter, GatewayConfig, GatewayError, MessageDecoder,
    MetricsHub, RelayRequest, TimeReference,
};
use crossbeam::channel::{unbounded, Receiver};
use id_registry::Registries;
use sampler_transport::{Connector, Message, Publisher};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::UtcOffset;
use tracing::{debug, info, warn};

pub struct Gateway<C: Connector> {
    config: GatewayConfig,
    supervisor: ConnectionSupervisor<C>,
    decoder: MessageDecoder,
    formatter: Formatter,
    registries: Registries,
    out: Box<dyn Write + Send>,
    publisher: Option<C::Publisher>,
    relay: Option<CommandRelay>,
    relay_rx: Receiver<RelayRequest>,
    epoch_us: Option<u64>,
    metrics: MetricsHub,
    shutdown: Arc<AtomicBool>,
}

impl<C: Connector> Gateway<C> {
    /// Open the republish socket and start the command actor. A command port
    /// that cannot be bound is logged and the gateway runs without one.
    pub fn new(
        mut connector: C,
        config: GatewayConfig,
        registries: Registries,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        if config.quiet && !config.republish {
            warn!("quiet without republish: no output will be written");
        }
        let publisher = if config.republish {
            let address = config.publish_address();
            let publisher = connector.publisher(&address)?;
            info!("republishing output on {address}");
            Some(publisher)
        } else {
            None
        };

        let (relay_tx, relay_rx) = unbounded();
        let relay = match connector.command_endpoint(config.command_ports()) {
            Ok((endpoint, port)) => Some(CommandRelay::spawn(
                endpoint,
                port,
                relay_tx,
                config.relay_policy(),
            )?),
            Err(err) => {
                warn!("command port not available: {err}");
                None
            }
        };

        let metrics = MetricsHub::new()?;
        metrics.gateway.devices_known.set(registries.devices.len() as i64);
        metrics.gateway.states_known.set(registries.states.len() as i64);

        Ok(Self {
            supervisor: ConnectionSupervisor::new(connector, config.supervisor_settings()),
            decoder: MessageDecoder::new(config.decode_options()),
            formatter: Formatter::new(config.format, config.time_mode),
            epoch_us: config.start_time_us,
            registries,
            out: Box::new(std::io::stdout()),
            publisher,
            relay,
            relay_rx,
            metrics,
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.out = out;
        self
    }

    /// Offset used for posix wall-clock timestamps.
    pub fn with_local_offset(mut self, offset: UtcOffset) -> Self {
        self.formatter = self.formatter.with_local_offset(offset);
        self
    }

    /// Setting the returned flag ends [`Gateway::run`] after the current step.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn command_port(&self) -> Option<u16> {
        self.relay.as_ref().map(CommandRelay::port)
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor<C> {
        &self.supervisor
    }

    pub fn metrics(&self) -> &MetricsHub {
        &self.metrics
    }

    /// Run until the shutdown flag is set or the control plane is given up on.
    /// Identifiers are flushed either way.
    pub fn run(&mut self) -> Result<(), GatewayError> {
        info!(
            "sampler gateway started: channel {} via {}",
            self.config.channel,
            self.config.setup_address()
        );
        let result = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested");
                break Ok(());
            }
            if let Err(err) = self.step() {
                break Err(err);
            }
        };
        self.shutdown();
        result
    }

    /// One loop iteration; blocks for at most the poll interval (or the
    /// reconnect pause when disconnected).
    pub fn step(&mut self) -> Result<(), GatewayError> {
        self.service_relay_requests();
        let before = self.supervisor.connections();
        let ready = self.supervisor.poll_readiness()?;
        if self.supervisor.connections() > before {
            self.metrics.gateway.connections.inc();
        }
        if !ready {
            std::thread::sleep(Duration::from_millis(self.config.reconnect_pause_ms));
            return Ok(());
        }
        if let Some(message) = self.supervisor.recv(self.config.poll_interval_ms) {
            self.handle_message(&message);
        }
        Ok(())
    }

    fn service_relay_requests(&mut self) {
        while let Ok(request) = self.relay_rx.try_recv() {
            let result = self.supervisor.relay(&request.directive);
            match &result {
                Ok(_) => self.metrics.gateway.directives_relayed.inc(),
                Err(_) => self.metrics.gateway.directives_failed.inc(),
            }
            // the command thread may already have given up waiting
            let _ = request.respond.send(result);
        }
    }

    /// Decode, format and emit one message. Returns the emitted line; empty
    /// renderings are not emitted.
    pub fn handle_message(&mut self, message: &Message) -> Option<String> {
        self.metrics.gateway.messages_received.inc();
        let sent_at = message.header.sent_at_us;
        let epoch = *self.epoch_us.get_or_insert(sent_at);
        let event = match self.decoder.decode(&message.payload) {
            Ok(event) => event,
            Err(err) => {
                self.metrics.gateway.messages_dropped.inc();
                debug!(size = message.payload.len(), "message dropped: {err}");
                return None;
            }
        };
        let time = TimeReference::elapsed(sent_at.saturating_sub(epoch));
        let line = self.formatter.format(&event, &time, &mut self.registries);
        if line.is_empty() {
            return None;
        }
        self.emit(&line);
        Some(line)
    }

    fn emit(&mut self, line: &str) {
        if !self.config.quiet {
            if let Err(err) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
                warn!("failed to write output: {err}");
            }
        }
        if let Some(publisher) = self.publisher.as_mut() {
            if let Err(err) = publisher.send(line.as_bytes()) {
                warn!("failed to republish: {err}");
            }
        }
        self.metrics.gateway.lines_emitted.inc();
    }

    /// Stop the command actor and write both identifier tables.
    pub fn shutdown(&mut self) {
        if let Some(mut relay) = self.relay.take() {
            relay.stop();
        }
        if let Err(err) = self.registries.flush_all() {
            warn!("failed to persist identifiers: {err}");
        }
        let gateway = &self.metrics.gateway;
        gateway.devices_known.set(self.registries.devices.len() as i64);
        gateway.states_known.set(self.registries.states.len() as i64);
        info!(
            received = gateway.messages_received.get(),
            emitted = gateway.lines_emitted.get(),
            dropped = gateway.messages_dropped.get(),
            "sampler gateway stopped"
        );
        debug!("final metrics:\n{}", self.metrics.encode_text());
    }
}
