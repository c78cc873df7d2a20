use core::fmt;

/// A scalar carried in a telemetry message or command.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A string that was quoted on the wire; rendered quoted in property output.
    Text(String),
    /// A bare word or token.
    Symbol(String),
    Integer(i64),
    Float(f64),
    Null,
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn symbol(s: impl Into<String>) -> Self {
        Value::Symbol(s.into())
    }

    /// Borrow the string content of text and symbol values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) | Value::Symbol(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Null => f.write_str("null"),
        }
    }
}

/// Decoded telemetry.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StateChange {
        device: String,
        state: String,
    },
    /// A property changed. Legacy `VALUE` messages carry no property name.
    PropertyChange {
        device: String,
        property: Option<String>,
        value: Value,
    },
    Update {
        values: Vec<Value>,
    },
    RawText {
        payload: String,
    },
}

/// Registry key under which a property change is recorded: `device.property`,
/// or the bare device name when there is no property.
pub fn property_key(device: &str, property: Option<&str>) -> String {
    match property {
        Some(p) => format!("{device}.{p}"),
        None => device.to_string(),
    }
}
