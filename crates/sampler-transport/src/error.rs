use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("operation cannot be accomplished in current state: {0}")]
    InvalidState(String),
    #[error("connection closed")]
    Closed,
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl TransportError {
    /// Transient errors leave the socket usable once the request/reply
    /// pairing is restored; anything else invalidates the connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::InvalidState(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => TransportError::Timeout,
            std::io::ErrorKind::NotFound => TransportError::InterfaceNotFound(err.to_string()),
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::InvalidState("reply pending".into()).is_transient());
        assert!(!TransportError::Closed.is_transient());
        assert!(!TransportError::Io("refused".into()).is_transient());
        assert!(!TransportError::Handshake("no channel".into()).is_transient());
    }

    #[test]
    fn test_io_error_mapping() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(TransportError::from(timed_out), TransportError::Timeout);
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer");
        assert_eq!(TransportError::from(reset), TransportError::Closed);
    }
}
