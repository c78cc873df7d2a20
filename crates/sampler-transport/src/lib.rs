//! sampler-transport: publish/subscribe and request/reply contracts
//!
//! This crate provides the traits and types the gateway needs from its message transport,
//! with feature-gated backends. The default build enables an in-process `mock` backend so
//! that the gateway can be built and tested on any host without a running control plane.

mod types;
pub use types::{Address, ChannelInfo, Message, MessageHeader, Timestamp};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::{CommandEndpoint, Connector, ControlSession, Publisher, Subscriber};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{
    MockCommandClient, MockCommandEndpoint, MockConnector, MockControlPlane, MockFeed,
    MockPublisher, MockSession, MockSubscriber, ReplyMode,
};

#[cfg(feature = "replay")]
mod line;

#[cfg(feature = "replay")]
pub use line::LineEndpoint;

#[cfg(feature = "replay")]
mod replay;

#[cfg(feature = "replay")]
pub use replay::{FilePublisher, LoopbackSession, ReplayConnector, ReplaySubscriber};
