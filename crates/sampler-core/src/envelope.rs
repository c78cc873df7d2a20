//! Structured message codec: `{"command": <opcode>, "params": [...]}`.

use crate::Value;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub opcode: String,
    /// `None` when the message carried no parameter list.
    pub params: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    command: String,
    #[serde(default)]
    params: Option<Vec<serde_json::Value>>,
}

/// Decode a structured message. Anything that is not a JSON object with a
/// string `command` member yields `None` and should be treated as legacy text.
pub fn try_decode_envelope(raw: &[u8]) -> Option<Envelope> {
    let wire: WireEnvelope = serde_json::from_slice(raw).ok()?;
    Some(Envelope {
        opcode: wire.command,
        params: wire
            .params
            .map(|params| params.into_iter().map(from_json).collect()),
    })
}

pub fn encode_command(verb: &str, args: &[Value]) -> Vec<u8> {
    let params: Vec<serde_json::Value> = args.iter().map(to_json).collect();
    json!({ "command": verb, "params": params })
        .to_string()
        .into_bytes()
}

fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::Null => Value::Null,
        // booleans and nested structures keep their JSON spelling
        other => Value::Symbol(other.to_string()),
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Text(s) | Value::Symbol(s) => serde_json::Value::String(s.clone()),
        Value::Integer(i) => json!(i),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Null => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_state_envelope() {
        let env = try_decode_envelope(br#"{"command":"STATE","params":["pump1","running"]}"#);
        assert_eq!(
            env,
            Some(Envelope {
                opcode: "STATE".into(),
                params: Some(vec![Value::text("pump1"), Value::text("running")]),
            })
        );
    }

    #[test]
    fn test_decode_value_kinds() {
        let env = try_decode_envelope(br#"{"command":"UPDATE","params":[1, 2.5, null, true, "x"]}"#);
        let params = env.and_then(|e| e.params).unwrap_or_default();
        assert_eq!(
            params,
            vec![
                Value::Integer(1),
                Value::Float(2.5),
                Value::Null,
                Value::symbol("true"),
                Value::text("x"),
            ]
        );
    }

    #[test]
    fn test_missing_params_is_none() {
        let env = try_decode_envelope(br#"{"command":"STATE"}"#);
        assert_eq!(env.map(|e| e.params), Some(None));
    }

    #[test]
    fn test_legacy_text_is_not_an_envelope() {
        assert!(try_decode_envelope(b"pump1 STATE running").is_none());
        assert!(try_decode_envelope(b"[1,2,3]").is_none());
        assert!(try_decode_envelope(br#"{"params":[]}"#).is_none());
    }

    #[test]
    fn test_encode_command_is_decodable() {
        let raw = encode_command("MONITOR", &[Value::symbol("PATTERN"), Value::text("pump.*")]);
        let env = try_decode_envelope(&raw);
        assert_eq!(
            env,
            Some(Envelope {
                opcode: "MONITOR".into(),
                params: Some(vec![Value::text("PATTERN"), Value::text("pump.*")]),
            })
        );
    }
}
