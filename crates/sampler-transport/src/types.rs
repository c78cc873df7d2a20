use core::fmt;
use time::OffsetDateTime;

/// Host and port of a transport endpoint.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{host}:{port}", host = self.host, port = self.port)
    }
}

/// Result of the control-plane setup handshake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelInfo {
    pub name: String,
    pub subscription_port: u16,
}

/// Header carried alongside every published message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    /// Microseconds since the Unix epoch at which the sender emitted the message.
    pub sent_at_us: u64,
}

impl MessageHeader {
    pub fn at(sent_at_us: u64) -> Self {
        Self { sent_at_us }
    }

    pub fn now() -> Self {
        Self::at(Timestamp::now().as_micros())
    }
}

/// One message delivered by a subscriber.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(header: MessageHeader, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Message stamped with the current time.
    pub fn stamped(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageHeader::now(), payload)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn as_micros(&self) -> u64 {
        let micros = self.0.unix_timestamp_nanos() / 1_000;
        u64::try_from(micros).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        let addr = Address::new("localhost", 5556);
        assert_eq!(addr.to_string(), "tcp://localhost:5556");
    }

    #[test]
    fn test_timestamp_micros() {
        let ts = Timestamp(OffsetDateTime::from_unix_timestamp(2).unwrap_or(OffsetDateTime::UNIX_EPOCH));
        assert_eq!(ts.as_micros(), 2_000_000);
    }
}
