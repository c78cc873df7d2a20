use crate::{CommandError, CommandResult, MonitorDirective, SupervisorError};
use sampler_transport::{
    Address, ChannelInfo, Connector, ControlSession, Message, Subscriber, TransportError,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Health of the control-plane session.
///
/// ```text
/// Disconnected -> Handshaking -> Connected <-> Degraded
///       ^              |                          |
///       +--------------+--------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Connected,
    /// A reply went missing; the session must be reset before it is used again.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive non-transient failures tolerated before giving up.
    pub attempts: u32,
    /// Pause after a transient handshake failure.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Where the setup handshake is sent.
    pub setup: Address,
    /// Host the channel subscription connects to; the port comes from the handshake.
    pub subscribe_host: String,
    /// Used when the handshake reports port 0.
    pub subscribe_port: u16,
    pub channel: String,
    pub retry: RetryPolicy,
    pub reply_timeout_ms: u64,
    pub reply_attempts: u32,
}

/// Owns the control-plane session and the telemetry subscription, and keeps
/// both alive.
pub struct ConnectionSupervisor<C: Connector> {
    connector: C,
    settings: SupervisorSettings,
    state: SessionState,
    session: Option<C::Session>,
    subscriber: Option<C::Subscriber>,
    channel: Option<ChannelInfo>,
    retries_left: u32,
    connections: u64,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(connector: C, settings: SupervisorSettings) -> Self {
        let retries_left = settings.retry.attempts.max(1);
        Self {
            connector,
            settings,
            state: SessionState::Disconnected,
            session: None,
            subscriber: None,
            channel: None,
            retries_left,
            connections: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_channel_name(&self) -> Option<&str> {
        self.channel.as_ref().map(|c| c.name.as_str())
    }

    /// Number of times a session has been established.
    pub fn connections(&self) -> u64 {
        self.connections
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    /// Drive the state machine one step. Returns whether the subscription is
    /// usable; fails only once the retry budget is spent.
    pub fn poll_readiness(&mut self) -> Result<bool, SupervisorError> {
        match self.state {
            SessionState::Connected => Ok(true),
            SessionState::Degraded => {
                self.recover();
                Ok(self.subscriber.is_some())
            }
            SessionState::Disconnected | SessionState::Handshaking => self.connect(),
        }
    }

    fn connect(&mut self) -> Result<bool, SupervisorError> {
        self.transition(SessionState::Handshaking);
        match self.establish() {
            Ok(()) => {
                self.reset_budget();
                self.connections += 1;
                self.transition(SessionState::Connected);
                Ok(true)
            }
            Err(err) if err.is_transient() => {
                warn!("transient handshake failure, backing off: {err}");
                self.reset_budget();
                self.transition(SessionState::Disconnected);
                std::thread::sleep(Duration::from_millis(self.settings.retry.backoff_ms));
                Ok(false)
            }
            Err(err) => {
                self.retries_left = self.retries_left.saturating_sub(1);
                self.transition(SessionState::Disconnected);
                if self.retries_left == 0 {
                    error!("giving up on control plane at {}: {err}", self.settings.setup);
                    return Err(SupervisorError::RetriesExhausted {
                        attempts: self.settings.retry.attempts,
                        last: err,
                    });
                }
                warn!(
                    retries_left = self.retries_left,
                    "connection to {} failed: {err}", self.settings.setup
                );
                Ok(false)
            }
        }
    }

    fn establish(&mut self) -> Result<(), TransportError> {
        let (session, info) = self
            .connector
            .handshake(&self.settings.setup, &self.settings.channel)?;
        let port = match info.subscription_port {
            0 => self.settings.subscribe_port,
            port => port,
        };
        let address = Address::new(self.settings.subscribe_host.clone(), port);
        let subscriber = self.connector.subscribe(&address)?;
        info!("subscribed to channel {} at {address}", info.name);
        self.session = Some(session);
        self.subscriber = Some(subscriber);
        self.channel = Some(info);
        Ok(())
    }

    fn recover(&mut self) {
        let outcome = match self.session.as_mut() {
            Some(session) => session.reset(),
            None => Err(TransportError::Closed),
        };
        match outcome {
            Ok(()) => {
                info!("control session restored");
                self.reset_budget();
                self.transition(SessionState::Connected);
            }
            Err(err) if err.is_transient() => {
                self.retries_left = self.retries_left.saturating_sub(1);
                if self.retries_left == 0 {
                    self.disconnect(&err);
                    self.reset_budget();
                } else {
                    debug!(retries_left = self.retries_left, "session reset failed: {err}");
                }
            }
            Err(err) => self.disconnect(&err),
        }
    }

    /// Drop every socket tied to the session.
    pub fn disconnect(&mut self, reason: &TransportError) {
        if self.session.is_some() || self.subscriber.is_some() {
            warn!("dropping control-plane connection: {reason}");
        }
        self.session = None;
        self.subscriber = None;
        self.channel = None;
        self.transition(SessionState::Disconnected);
    }

    /// Receive the next telemetry message, or `None` if nothing arrived in
    /// `timeout_ms` or the subscription failed.
    pub fn recv(&mut self, timeout_ms: u64) -> Option<Message> {
        let outcome = self.subscriber.as_mut()?.recv(Some(timeout_ms));
        match outcome {
            Ok(message) => Some(message),
            Err(TransportError::Timeout) => None,
            Err(err) => {
                self.on_transport_error(err);
                None
            }
        }
    }

    fn on_transport_error(&mut self, err: TransportError) {
        if err.is_transient() {
            if self.state == SessionState::Connected {
                warn!("control plane degraded: {err}");
                self.transition(SessionState::Degraded);
            }
        } else {
            self.disconnect(&err);
        }
    }

    /// Send a directive on the control session, naming the current channel,
    /// and wait a bounded time for the reply.
    pub fn relay(&mut self, directive: &MonitorDirective) -> CommandResult {
        if self.state != SessionState::Connected {
            return Err(CommandError::NotConnected);
        }
        let channel = match &self.channel {
            Some(info) => info.name.clone(),
            None => return Err(CommandError::NotConnected),
        };
        let Some(session) = self.session.as_mut() else {
            return Err(CommandError::NotConnected);
        };
        let text = directive.render(&channel);
        debug!("sending directive: {text}");
        let outcome = exchange(
            session,
            text.as_bytes(),
            self.settings.reply_attempts,
            self.settings.reply_timeout_ms,
        );
        match outcome {
            Ok(reply) => Ok(String::from_utf8_lossy(&reply).into_owned()),
            Err(err) => {
                warn!("directive {text:?} failed: {err}");
                self.on_transport_error(err);
                Err(CommandError::RelayFailed)
            }
        }
    }

    fn reset_budget(&mut self) {
        self.retries_left = self.settings.retry.attempts.max(1);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("session {:?} -> {next:?}", self.state);
            self.state = next;
        }
    }
}

fn exchange<S: ControlSession>(
    session: &mut S,
    payload: &[u8],
    attempts: u32,
    timeout_ms: u64,
) -> Result<Vec<u8>, TransportError> {
    session.send(payload)?;
    for _ in 0..attempts.max(1) {
        match session.recv(timeout_ms) {
            Err(TransportError::Timeout) => continue,
            other => return other,
        }
    }
    Err(TransportError::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MonitorAction, MonitorTarget};
    use sampler_transport::{MockConnector, MockControlPlane, ReplyMode};

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            setup: Address::new("localhost", 5555),
            subscribe_host: "localhost".into(),
            subscribe_port: 5556,
            channel: "SAMPLER_CHANNEL".into(),
            retry: RetryPolicy {
                attempts: 3,
                backoff_ms: 1,
            },
            reply_timeout_ms: 10,
            reply_attempts: 2,
        }
    }

    fn supervisor(plane: &MockControlPlane) -> ConnectionSupervisor<MockConnector> {
        ConnectionSupervisor::new(plane.connector(), settings())
    }

    fn monitor(device: &str) -> MonitorDirective {
        MonitorDirective {
            action: MonitorAction::Add,
            target: MonitorTarget::Device(device.into()),
        }
    }

    #[test]
    fn test_connects_and_relays() {
        let plane = MockControlPlane::new().with_channel_name("SAMPLER_CHANNEL_2");
        let mut sup = supervisor(&plane);
        assert_eq!(sup.poll_readiness(), Ok(true));
        assert_eq!(sup.state(), SessionState::Connected);
        assert_eq!(sup.current_channel_name(), Some("SAMPLER_CHANNEL_2"));
        assert_eq!(sup.relay(&monitor("pump1")), Ok("OK".into()));
        assert_eq!(
            plane.directives(),
            vec!["CHANNEL SAMPLER_CHANNEL_2 ADD MONITOR pump1".to_string()]
        );
    }

    #[test]
    fn test_relay_without_session() {
        let plane = MockControlPlane::new();
        let mut sup = supervisor(&plane);
        assert_eq!(sup.relay(&monitor("pump1")), Err(CommandError::NotConnected));
        assert!(plane.directives().is_empty());
    }

    #[test]
    fn test_exhausts_retries_on_hard_failures() {
        let plane = MockControlPlane::new();
        plane.fail_handshakes(vec![TransportError::Closed; 3]);
        let mut sup = supervisor(&plane);
        assert_eq!(sup.poll_readiness(), Ok(false));
        assert_eq!(sup.poll_readiness(), Ok(false));
        assert_eq!(
            sup.poll_readiness(),
            Err(SupervisorError::RetriesExhausted {
                attempts: 3,
                last: TransportError::Closed
            })
        );
        assert_eq!(plane.handshakes(), 3);
    }

    #[test]
    fn test_transient_failures_reset_budget() {
        let plane = MockControlPlane::new();
        plane.fail_handshakes([
            TransportError::Closed,
            TransportError::Closed,
            TransportError::Timeout,
            TransportError::Closed,
            TransportError::Closed,
        ]);
        let mut sup = supervisor(&plane);
        for _ in 0..5 {
            assert_eq!(sup.poll_readiness(), Ok(false));
        }
        assert_eq!(sup.retries_left(), 1);
        assert_eq!(sup.poll_readiness(), Ok(true));
        assert_eq!(sup.retries_left(), 3);
    }

    #[test]
    fn test_missing_reply_degrades_then_resets() {
        let plane = MockControlPlane::new();
        let mut sup = supervisor(&plane);
        assert_eq!(sup.poll_readiness(), Ok(true));

        plane.set_reply_mode(ReplyMode::Silent);
        assert_eq!(sup.relay(&monitor("pump1")), Err(CommandError::RelayFailed));
        assert_eq!(sup.state(), SessionState::Degraded);
        assert_eq!(sup.relay(&monitor("pump2")), Err(CommandError::NotConnected));

        plane.set_reply_mode(ReplyMode::Reply("OK".into()));
        assert_eq!(sup.poll_readiness(), Ok(true));
        assert_eq!(sup.state(), SessionState::Connected);
        assert_eq!(plane.resets(), 1);
        assert_eq!(sup.relay(&monitor("pump2")), Ok("OK".into()));
    }

    #[test]
    fn test_degraded_gives_up_after_failed_resets() {
        let plane = MockControlPlane::new();
        let mut sup = supervisor(&plane);
        assert_eq!(sup.poll_readiness(), Ok(true));
        plane.set_reply_mode(ReplyMode::Silent);
        let _ = sup.relay(&monitor("pump1"));
        plane.fail_resets(vec![TransportError::Timeout; 3]);

        assert_eq!(sup.poll_readiness(), Ok(true));
        assert_eq!(sup.poll_readiness(), Ok(true));
        assert_eq!(sup.state(), SessionState::Degraded);
        assert_eq!(sup.poll_readiness(), Ok(false));
        assert_eq!(sup.state(), SessionState::Disconnected);
        assert_eq!(sup.current_channel_name(), None);

        assert_eq!(sup.poll_readiness(), Ok(true));
        assert_eq!(plane.handshakes(), 2);
        assert_eq!(sup.connections(), 2);
    }

    #[test]
    fn test_fatal_session_error_fails_directive_and_disconnects() {
        let plane = MockControlPlane::new();
        let mut sup = supervisor(&plane);
        assert_eq!(sup.poll_readiness(), Ok(true));

        plane.set_reply_mode(ReplyMode::Fail(TransportError::Closed));
        assert_eq!(sup.relay(&monitor("pump1")), Err(CommandError::RelayFailed));
        assert_eq!(sup.state(), SessionState::Disconnected);
        assert_eq!(sup.current_channel_name(), None);
        assert_eq!(sup.relay(&monitor("pump1")), Err(CommandError::NotConnected));

        plane.set_reply_mode(ReplyMode::Reply("OK".into()));
        assert_eq!(sup.poll_readiness(), Ok(true));
        assert_eq!(plane.handshakes(), 2);
        assert_eq!(sup.relay(&monitor("pump1")), Ok("OK".into()));
    }

    #[test]
    fn test_fatal_subscriber_error_disconnects() {
        let plane = MockControlPlane::new();
        let mut sup = supervisor(&plane);
        assert_eq!(sup.poll_readiness(), Ok(true));
        plane.fail_receives([TransportError::Closed]);
        assert_eq!(sup.recv(5), None);
        assert_eq!(sup.state(), SessionState::Disconnected);
        assert_eq!(sup.recv(5), None);
    }

    #[test]
    fn test_receives_feed() {
        let plane = MockControlPlane::new();
        let mut sup = supervisor(&plane);
        assert_eq!(sup.poll_readiness(), Ok(true));
        plane.feed().push_at(42, "pump1 STATE on");
        let message = sup.recv(100);
        assert_eq!(message.map(|m| (m.header.sent_at_us, m.payload)), Some((42, b"pump1 STATE on".to_vec())));
        assert_eq!(sup.recv(5), None);
    }
}
