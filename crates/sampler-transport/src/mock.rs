use crate::{
    Address, ChannelInfo, CommandEndpoint, Connector, ControlSession, Message, MessageHeader,
    Publisher, Result, Subscriber, TransportError,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How the mock control plane answers directives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReplyMode {
    /// Answer every request with the given text.
    Reply(String),
    /// Accept requests but never answer them.
    Silent,
    /// Fail every send with the given error.
    Fail(TransportError),
}

struct PlaneState {
    channel_name: Option<String>,
    subscription_port: u16,
    handshake_failures: VecDeque<TransportError>,
    subscribe_failures: VecDeque<TransportError>,
    recv_failures: VecDeque<TransportError>,
    reset_failures: VecDeque<TransportError>,
    reply_mode: ReplyMode,
    directives: Vec<String>,
    published: Vec<Vec<u8>>,
    handshakes: usize,
    resets: usize,
    feed_tx: Sender<Message>,
    feed_rx: Receiver<Message>,
    command_client: Option<MockCommandClient>,
}

/// A scriptable in-process control plane. Clones share state, so a test keeps one
/// handle while the gateway owns the connector built from another.
#[derive(Clone)]
pub struct MockControlPlane {
    inner: Arc<Mutex<PlaneState>>,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlPlane {
    pub fn new() -> Self {
        let (feed_tx, feed_rx) = channel::unbounded();
        Self {
            inner: Arc::new(Mutex::new(PlaneState {
                channel_name: None,
                subscription_port: 5556,
                handshake_failures: VecDeque::new(),
                subscribe_failures: VecDeque::new(),
                recv_failures: VecDeque::new(),
                reset_failures: VecDeque::new(),
                reply_mode: ReplyMode::Reply("OK".to_string()),
                directives: Vec::new(),
                published: Vec::new(),
                handshakes: 0,
                resets: 0,
                feed_tx,
                feed_rx,
                command_client: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlaneState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name handed out by the handshake instead of echoing the requested channel.
    pub fn with_channel_name(self, name: impl Into<String>) -> Self {
        self.state().channel_name = Some(name.into());
        self
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            plane: self.clone(),
        }
    }

    pub fn feed(&self) -> MockFeed {
        MockFeed {
            tx: self.state().feed_tx.clone(),
        }
    }

    pub fn fail_handshakes(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.state().handshake_failures.extend(errors);
    }

    pub fn fail_subscribes(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.state().subscribe_failures.extend(errors);
    }

    pub fn fail_receives(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.state().recv_failures.extend(errors);
    }

    pub fn fail_resets(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.state().reset_failures.extend(errors);
    }

    pub fn set_reply_mode(&self, mode: ReplyMode) {
        self.state().reply_mode = mode;
    }

    /// Directives received so far, in arrival order.
    pub fn directives(&self) -> Vec<String> {
        self.state().directives.clone()
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.state().published.clone()
    }

    pub fn handshakes(&self) -> usize {
        self.state().handshakes
    }

    pub fn resets(&self) -> usize {
        self.state().resets
    }

    /// Client side of the most recently bound command endpoint.
    pub fn command_client(&self) -> Option<MockCommandClient> {
        self.state().command_client.clone()
    }
}

/// Injects messages into every mock subscriber of a plane.
#[derive(Clone)]
pub struct MockFeed {
    tx: Sender<Message>,
}

impl MockFeed {
    pub fn push(&self, payload: impl Into<Vec<u8>>) {
        let _ = self.tx.send(Message::stamped(payload));
    }

    pub fn push_at(&self, sent_at_us: u64, payload: impl Into<Vec<u8>>) {
        let _ = self.tx.send(Message::new(MessageHeader::at(sent_at_us), payload));
    }
}

pub struct MockConnector {
    plane: MockControlPlane,
}

impl Connector for MockConnector {
    type Session = MockSession;
    type Subscriber = MockSubscriber;
    type Publisher = MockPublisher;
    type Endpoint = MockCommandEndpoint;

    fn handshake(&mut self, _setup: &Address, channel: &str) -> Result<(MockSession, ChannelInfo)> {
        let mut state = self.plane.state();
        state.handshakes += 1;
        if let Some(err) = state.handshake_failures.pop_front() {
            return Err(err);
        }
        let info = ChannelInfo {
            name: state
                .channel_name
                .clone()
                .unwrap_or_else(|| channel.to_string()),
            subscription_port: state.subscription_port,
        };
        drop(state);
        Ok((MockSession::new(self.plane.clone()), info))
    }

    fn subscribe(&mut self, _address: &Address) -> Result<MockSubscriber> {
        let mut state = self.plane.state();
        if let Some(err) = state.subscribe_failures.pop_front() {
            return Err(err);
        }
        let rx = state.feed_rx.clone();
        drop(state);
        Ok(MockSubscriber {
            plane: self.plane.clone(),
            rx,
        })
    }

    fn publisher(&mut self, _address: &Address) -> Result<MockPublisher> {
        Ok(MockPublisher {
            plane: self.plane.clone(),
        })
    }

    fn command_endpoint(
        &mut self,
        ports: RangeInclusive<u16>,
    ) -> Result<(MockCommandEndpoint, u16)> {
        if ports.is_empty() {
            return Err(TransportError::InterfaceNotFound(
                "empty command port range".to_string(),
            ));
        }
        let (req_tx, req_rx) = channel::unbounded();
        let (rep_tx, rep_rx) = channel::unbounded();
        self.plane.state().command_client = Some(MockCommandClient {
            requests: req_tx,
            replies: rep_rx,
        });
        Ok((
            MockCommandEndpoint {
                requests: req_rx,
                replies: rep_tx,
            },
            *ports.start(),
        ))
    }
}

/// Control session that records directives and answers per [`ReplyMode`].
pub struct MockSession {
    plane: MockControlPlane,
    awaiting_reply: bool,
    reply: Option<Vec<u8>>,
}

impl MockSession {
    fn new(plane: MockControlPlane) -> Self {
        Self {
            plane,
            awaiting_reply: false,
            reply: None,
        }
    }
}

impl ControlSession for MockSession {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.awaiting_reply {
            return Err(TransportError::InvalidState("reply pending".to_string()));
        }
        let mut state = self.plane.state();
        self.reply = match &state.reply_mode {
            ReplyMode::Fail(err) => return Err(err.clone()),
            ReplyMode::Reply(text) => Some(text.as_bytes().to_vec()),
            ReplyMode::Silent => None,
        };
        state
            .directives
            .push(String::from_utf8_lossy(payload).into_owned());
        self.awaiting_reply = true;
        Ok(())
    }

    fn recv(&mut self, timeout_ms: u64) -> Result<Vec<u8>> {
        if !self.awaiting_reply {
            return Err(TransportError::InvalidState(
                "no request pending".to_string(),
            ));
        }
        match self.reply.take() {
            Some(reply) => {
                self.awaiting_reply = false;
                Ok(reply)
            }
            None => {
                std::thread::sleep(Duration::from_millis(timeout_ms));
                Err(TransportError::Timeout)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = self.plane.state();
        if let Some(err) = state.reset_failures.pop_front() {
            return Err(err);
        }
        state.resets += 1;
        self.awaiting_reply = false;
        self.reply = None;
        Ok(())
    }
}

pub struct MockSubscriber {
    plane: MockControlPlane,
    rx: Receiver<Message>,
}

impl Subscriber for MockSubscriber {
    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<Message> {
        let injected = self.plane.state().recv_failures.pop_front();
        if let Some(err) = injected {
            return Err(err);
        }
        match timeout_ms {
            Some(ms) => self
                .rx
                .recv_timeout(Duration::from_millis(ms))
                .map_err(|e| match e {
                    RecvTimeoutError::Timeout => TransportError::Timeout,
                    RecvTimeoutError::Disconnected => TransportError::Closed,
                }),
            None => self.rx.recv().map_err(|_| TransportError::Closed),
        }
    }
}

pub struct MockPublisher {
    plane: MockControlPlane,
}

impl Publisher for MockPublisher {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.plane.state().published.push(payload.to_vec());
        Ok(())
    }
}

pub struct MockCommandEndpoint {
    requests: Receiver<Vec<u8>>,
    replies: Sender<Vec<u8>>,
}

impl CommandEndpoint for MockCommandEndpoint {
    fn recv(&mut self, timeout_ms: u64) -> Result<Vec<u8>> {
        self.requests
            .recv_timeout(Duration::from_millis(timeout_ms))
            .map_err(|e| match e {
                RecvTimeoutError::Timeout => TransportError::Timeout,
                RecvTimeoutError::Disconnected => TransportError::Closed,
            })
    }

    fn reply(&mut self, payload: &[u8]) -> Result<()> {
        self.replies
            .send(payload.to_vec())
            .map_err(|_| TransportError::Closed)
    }
}

/// Operator side of a [`MockCommandEndpoint`].
#[derive(Clone)]
pub struct MockCommandClient {
    requests: Sender<Vec<u8>>,
    replies: Receiver<Vec<u8>>,
}

impl MockCommandClient {
    pub fn request(&self, payload: &[u8], timeout: Duration) -> Option<Vec<u8>> {
        self.requests.send(payload.to_vec()).ok()?;
        self.replies.recv_timeout(timeout).ok()
    }

    pub fn request_text(&self, text: &str, timeout: Duration) -> Option<String> {
        self.request(text.as_bytes(), timeout)
            .map(|reply| String::from_utf8_lossy(&reply).into_owned())
    }
}
