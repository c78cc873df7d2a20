use sampler_transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a telemetry payload produced no event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("unexpected empty parameter list for received message: {opcode}")]
    MissingParameters { opcode: String },
    #[error("unexpected message {opcode} with {count} parameters")]
    UnexpectedMessage { opcode: String, count: usize },
    #[error("unrecognized operator {operator:?} for {device}")]
    UnknownOperator { device: String, operator: String },
    #[error("value changes are ignored")]
    ValuesIgnored,
    #[error("non-numeric value for {device} ignored")]
    NotNumeric { device: String },
}

/// Failure of an operator command. The display text is the reply sent back to
/// the operator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty message received")]
    Empty,
    #[error("Unknown command")]
    Unknown(String),
    #[error("{0}")]
    Usage(&'static str),
    #[error("refresh command not implemented")]
    NotImplemented,
    #[error("failed to issue command")]
    RelayFailed,
    #[error("not connected to control plane")]
    NotConnected,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("control plane unreachable after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid start time {0:?}")]
    InvalidStartTime(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that end a gateway run.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Registry(#[from] id_registry::RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("metrics init error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("spawning command relay: {0}")]
    Spawn(#[from] std::io::Error),
}

impl GatewayError {
    /// The control plane gave up on us; the process should exit non-zero.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, GatewayError::Supervisor(SupervisorError::RetriesExhausted { .. }))
    }
}
