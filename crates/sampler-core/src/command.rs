use crate::{encode_command, try_decode_envelope, CommandError, Value};

pub type CommandResult = Result<String, CommandError>;

const MONITOR_USAGE: &str =
    "usage: MONITOR machine_name | MONITOR PATTERN pattern | MONITOR PROPERTY property value";
const UNMONITOR_USAGE: &str =
    "usage: UNMONITOR machine_name | UNMONITOR PATTERN pattern | UNMONITOR PROPERTY property value";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Info,
    Monitor,
    Unmonitor,
    Refresh,
    Unknown(String),
}

impl Verb {
    pub fn parse(word: &str) -> Self {
        match word.to_ascii_uppercase().as_str() {
            "INFO" => Verb::Info,
            "MONITOR" => Verb::Monitor,
            "UNMONITOR" => Verb::Unmonitor,
            "REFRESH" => Verb::Refresh,
            _ => Verb::Unknown(word.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Verb::Info => "INFO",
            Verb::Monitor => "MONITOR",
            Verb::Unmonitor => "UNMONITOR",
            Verb::Refresh => "REFRESH",
            Verb::Unknown(word) => word,
        }
    }
}

/// An operator command: a verb and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub verb: Verb,
    pub arguments: Vec<Value>,
}

impl CommandRequest {
    pub fn new(verb: Verb, arguments: Vec<Value>) -> Self {
        Self { verb, arguments }
    }

    /// Parse a structured envelope or a whitespace separated command line.
    /// Returns `None` for an empty message.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if let Some(envelope) = try_decode_envelope(raw) {
            return Some(Self::new(
                Verb::parse(&envelope.opcode),
                envelope.params.unwrap_or_default(),
            ));
        }
        let text = String::from_utf8_lossy(raw);
        let mut words = text.split_whitespace();
        let verb = Verb::parse(words.next()?);
        Some(Self::new(verb, words.map(Value::symbol).collect()))
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_command(self.verb.as_str(), &self.arguments)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorTarget {
    Device(String),
    Pattern(String),
    Property { name: String, value: String },
}

/// A monitor change to forward to the control plane. The channel it applies to
/// is filled in when the directive is rendered, so a directive queued before a
/// reconnect targets whichever channel is current when it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorDirective {
    pub action: MonitorAction,
    pub target: MonitorTarget,
}

impl MonitorDirective {
    pub fn from_arguments(action: MonitorAction, args: &[Value]) -> Result<Self, CommandError> {
        let usage = match action {
            MonitorAction::Add => MONITOR_USAGE,
            MonitorAction::Remove => UNMONITOR_USAGE,
        };
        let target = match args {
            [keyword, pattern] if keyword.as_str() == Some("PATTERN") => {
                MonitorTarget::Pattern(strip_quotes(&pattern.to_string()).to_string())
            }
            [keyword, name, value] if keyword.as_str() == Some("PROPERTY") => MonitorTarget::Property {
                name: name.to_string(),
                value: value.to_string(),
            },
            [device] => MonitorTarget::Device(device.to_string()),
            _ => return Err(CommandError::Usage(usage)),
        };
        Ok(Self { action, target })
    }

    pub fn render(&self, channel: &str) -> String {
        let action = match self.action {
            MonitorAction::Add => "ADD",
            MonitorAction::Remove => "REMOVE",
        };
        match &self.target {
            MonitorTarget::Device(device) => format!("CHANNEL {channel} {action} MONITOR {device}"),
            MonitorTarget::Pattern(pattern) => {
                format!("CHANNEL {channel} {action} MONITOR PATTERN {pattern}")
            }
            MonitorTarget::Property { name, value } => {
                format!("CHANNEL {channel} {action} MONITOR PROPERTY {name} \"{value}\"")
            }
        }
    }
}

fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
}

/// Where monitor directives go once validated.
pub trait DirectiveSink {
    fn relay(&self, directive: MonitorDirective) -> CommandResult;
}

pub fn version_string() -> String {
    format!("sampler version {}", env!("CARGO_PKG_VERSION"))
}

pub fn dispatch(request: &CommandRequest, sink: &impl DirectiveSink) -> CommandResult {
    match &request.verb {
        Verb::Info => Ok(version_string()),
        Verb::Monitor => sink.relay(MonitorDirective::from_arguments(
            MonitorAction::Add,
            &request.arguments,
        )?),
        Verb::Unmonitor => sink.relay(MonitorDirective::from_arguments(
            MonitorAction::Remove,
            &request.arguments,
        )?),
        Verb::Refresh => Err(CommandError::NotImplemented),
        Verb::Unknown(word) => Err(CommandError::Unknown(word.clone())),
    }
}
