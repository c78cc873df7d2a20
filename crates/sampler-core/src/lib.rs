//! sampler-core: telemetry decoding, line formatting and control-plane supervision
//!
//! The gateway loop in [`gateway`] ties the pieces together: a [`ConnectionSupervisor`]
//! keeps the control-plane session and subscription alive, a [`MessageDecoder`] turns
//! payloads into [`Event`]s, a [`Formatter`] renders them as text lines, and a
//! [`CommandRelay`] thread accepts operator commands on a local endpoint.

mod error;
pub use error::{CommandError, ConfigError, DecodeError, GatewayError, SupervisorError};

mod event;
pub use event::{property_key, Event, Value};

mod envelope;
pub use envelope::{encode_command, try_decode_envelope, Envelope};

mod decode;
pub use decode::{parse_c_integer, DecodeOptions, MessageDecoder};

mod clock;
pub use clock::{parse_start_time, render_time, TimeMode, TimeReference};

mod format;
pub use format::{escape_nonprintable, Formatter, OutputFormat};

mod command;
pub use command::{
    dispatch, version_string, CommandRequest, CommandResult, DirectiveSink, MonitorAction,
    MonitorDirective, MonitorTarget, Verb,
};

mod relay;
pub use relay::{handle_request, ChannelRelay, CommandRelay, RelayPolicy, RelayRequest};

mod supervisor;
pub use supervisor::{ConnectionSupervisor, RetryPolicy, SessionState, SupervisorSettings};

mod config;
pub use config::GatewayConfig;

mod metrics;
pub use metrics::{GatewayMetrics, MetricsHub};

pub mod gateway;
pub use gateway::Gateway;
