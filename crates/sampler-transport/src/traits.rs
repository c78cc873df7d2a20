use crate::{Address, ChannelInfo, Message, Result, TransportError};
use std::ops::RangeInclusive;

/// Receiving half of a publish/subscribe channel.
pub trait Subscriber {
    /// Receive one message, waiting at most `timeout_ms` (forever when `None`).
    /// Returns [`TransportError::Timeout`] when nothing arrived in time.
    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<Message>;
}

/// Sending half of a publish/subscribe channel.
pub trait Publisher {
    fn send(&mut self, payload: &[u8]) -> Result<()>;
}

/// Request/reply session with the remote control plane.
///
/// Requests and replies strictly alternate; sending a second request before the
/// reply to the first was received fails with [`TransportError::InvalidState`].
pub trait ControlSession {
    fn send(&mut self, payload: &[u8]) -> Result<()>;

    fn recv(&mut self, timeout_ms: u64) -> Result<Vec<u8>>;

    /// Restore the request/reply pairing after a reply went missing.
    fn reset(&mut self) -> Result<()> {
        Err(TransportError::Unsupported("session reset not supported"))
    }
}

/// Local request/reply endpoint on which operators send commands.
pub trait CommandEndpoint {
    fn recv(&mut self, timeout_ms: u64) -> Result<Vec<u8>>;

    /// Answer the request most recently returned by [`CommandEndpoint::recv`].
    fn reply(&mut self, payload: &[u8]) -> Result<()>;
}

/// Factory for every socket the gateway opens.
pub trait Connector {
    type Session: ControlSession;
    type Subscriber: Subscriber;
    type Publisher: Publisher;
    type Endpoint: CommandEndpoint + Send + 'static;

    /// Perform the setup exchange that names the active channel and the port
    /// on which its messages are published.
    fn handshake(&mut self, setup: &Address, channel: &str) -> Result<(Self::Session, ChannelInfo)>;

    fn subscribe(&mut self, address: &Address) -> Result<Self::Subscriber>;

    fn publisher(&mut self, address: &Address) -> Result<Self::Publisher>;

    /// Bind a command endpoint on the first free port in `ports`.
    fn command_endpoint(&mut self, ports: RangeInclusive<u16>) -> Result<(Self::Endpoint, u16)>;
}
