use crate::{try_decode_envelope, DecodeError, Envelope, Event, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Pass payloads through as text without interpreting them.
    pub raw: bool,
    /// Drop every property change.
    pub ignore_values: bool,
    /// Drop property changes whose value is not a number.
    pub only_numeric_values: bool,
}

/// Turns raw telemetry payloads into [`Event`]s.
///
/// Structured envelopes are tried first; anything else is read as the legacy
/// whitespace-separated text form `<device> STATE <state>` or
/// `<device> VALUE <rest of line>`.
#[derive(Debug, Clone, Default)]
pub struct MessageDecoder {
    options: DecodeOptions,
}

impl MessageDecoder {
    pub fn new(options: DecodeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> DecodeOptions {
        self.options
    }

    pub fn decode(&self, raw: &[u8]) -> Result<Event, DecodeError> {
        if self.options.raw {
            return Ok(Event::RawText {
                payload: String::from_utf8_lossy(raw).into_owned(),
            });
        }
        match try_decode_envelope(raw) {
            Some(envelope) => self.decode_structured(envelope),
            None => self.decode_legacy(&String::from_utf8_lossy(raw)),
        }
    }

    fn decode_structured(&self, envelope: Envelope) -> Result<Event, DecodeError> {
        let Envelope { opcode, params } = envelope;
        let params = match params {
            Some(p) if !p.is_empty() => p,
            _ => return Err(DecodeError::MissingParameters { opcode }),
        };
        match (opcode.as_str(), params.len()) {
            ("STATE", 2) => {
                let mut it = params.into_iter();
                let device = next_string(&mut it);
                let state = next_string(&mut it);
                Ok(Event::StateChange { device, state })
            }
            ("PROPERTY", 3) => {
                let mut it = params.into_iter();
                let device = next_string(&mut it);
                let property = next_string(&mut it);
                let value = it.next().unwrap_or(Value::Null);
                self.property_change(device, Some(property), value)
            }
            ("UPDATE", _) => Ok(Event::Update { values: params }),
            _ => Err(DecodeError::UnexpectedMessage {
                count: params.len(),
                opcode,
            }),
        }
    }

    fn decode_legacy(&self, text: &str) -> Result<Event, DecodeError> {
        let (device, rest) = next_token(text).ok_or(DecodeError::Empty)?;
        let (operator, rest) = next_token(rest).unwrap_or(("", ""));
        match operator {
            "STATE" => {
                let (state, _) = next_token(rest).ok_or_else(|| DecodeError::MissingParameters {
                    opcode: "STATE".into(),
                })?;
                Ok(Event::StateChange {
                    device: device.to_string(),
                    state: state.to_string(),
                })
            }
            "VALUE" => {
                let value = if self.options.only_numeric_values && !self.options.ignore_values {
                    next_token(rest)
                        .and_then(|(token, _)| parse_c_integer(token))
                        .map(Value::Integer)
                        .ok_or_else(|| DecodeError::NotNumeric {
                            device: device.to_string(),
                        })?
                } else {
                    Value::symbol(rest.trim_start())
                };
                self.property_change(device.to_string(), None, value)
            }
            other => Err(DecodeError::UnknownOperator {
                device: device.to_string(),
                operator: other.to_string(),
            }),
        }
    }

    fn property_change(
        &self,
        device: String,
        property: Option<String>,
        value: Value,
    ) -> Result<Event, DecodeError> {
        if self.options.ignore_values {
            return Err(DecodeError::ValuesIgnored);
        }
        if self.options.only_numeric_values && !value.is_numeric() {
            return Err(DecodeError::NotNumeric { device });
        }
        Ok(Event::PropertyChange {
            device,
            property,
            value,
        })
    }
}

fn next_string(it: &mut impl Iterator<Item = Value>) -> String {
    it.next().map(|v| v.to_string()).unwrap_or_default()
}

/// Split off the first whitespace-delimited token, returning it and the text
/// that follows it.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

/// Parse an integer the way C's `strtol` does with base 0: optional sign, `0x`
/// prefix for hex, leading `0` for octal. The whole token must be consumed.
pub fn parse_c_integer(token: &str) -> Option<i64> {
    let (negative, body) = match token.as_bytes().first() {
        Some(b'-') => (true, &token[1..]),
        Some(b'+') => (false, &token[1..]),
        _ => (false, token),
    };
    let (radix, digits) = if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        (16, hex)
    } else if body.len() > 1 && body.starts_with('0') {
        (8, &body[1..])
    } else {
        (10, body)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> MessageDecoder {
        MessageDecoder::default()
    }

    #[test]
    fn test_legacy_state() {
        assert_eq!(
            decoder().decode(b"pump1 STATE running"),
            Ok(Event::StateChange {
                device: "pump1".into(),
                state: "running".into()
            })
        );
    }

    #[test]
    fn test_legacy_value_keeps_rest_of_line() {
        assert_eq!(
            decoder().decode(b"pump1 VALUE  hello  world"),
            Ok(Event::PropertyChange {
                device: "pump1".into(),
                property: None,
                value: Value::symbol("hello  world"),
            })
        );
    }

    #[test]
    fn test_legacy_unknown_operator() {
        assert_eq!(
            decoder().decode(b"pump1 BLINK fast"),
            Err(DecodeError::UnknownOperator {
                device: "pump1".into(),
                operator: "BLINK".into()
            })
        );
        assert_eq!(decoder().decode(b"   "), Err(DecodeError::Empty));
    }

    #[test]
    fn test_structured_property() {
        let raw = br#"{"command":"PROPERTY","params":["pump1","speed",42]}"#;
        assert_eq!(
            decoder().decode(raw),
            Ok(Event::PropertyChange {
                device: "pump1".into(),
                property: Some("speed".into()),
                value: Value::Integer(42),
            })
        );
    }

    #[test]
    fn test_structured_arity_mismatch() {
        let raw = br#"{"command":"STATE","params":["pump1"]}"#;
        assert_eq!(
            decoder().decode(raw),
            Err(DecodeError::UnexpectedMessage {
                opcode: "STATE".into(),
                count: 1
            })
        );
        let raw = br#"{"command":"UPDATE","params":[]}"#;
        assert_eq!(
            decoder().decode(raw),
            Err(DecodeError::MissingParameters {
                opcode: "UPDATE".into()
            })
        );
    }

    #[test]
    fn test_structured_update() {
        let raw = br#"{"command":"UPDATE","params":[1,"a"]}"#;
        assert_eq!(
            decoder().decode(raw),
            Ok(Event::Update {
                values: vec![Value::Integer(1), Value::text("a")]
            })
        );
    }

    #[test]
    fn test_raw_mode_passes_through() {
        let d = MessageDecoder::new(DecodeOptions {
            raw: true,
            ..DecodeOptions::default()
        });
        assert_eq!(
            d.decode(br#"{"command":"STATE"}"#),
            Ok(Event::RawText {
                payload: r#"{"command":"STATE"}"#.into()
            })
        );
    }

    #[test]
    fn test_ignore_values() {
        let d = MessageDecoder::new(DecodeOptions {
            ignore_values: true,
            ..DecodeOptions::default()
        });
        assert_eq!(d.decode(b"pump1 VALUE 3"), Err(DecodeError::ValuesIgnored));
        assert!(d.decode(b"pump1 STATE on").is_ok());
    }

    #[test]
    fn test_only_numeric_values() {
        let d = MessageDecoder::new(DecodeOptions {
            only_numeric_values: true,
            ..DecodeOptions::default()
        });
        assert_eq!(
            d.decode(b"pump1 VALUE 42xyz"),
            Err(DecodeError::NotNumeric {
                device: "pump1".into()
            })
        );
        assert_eq!(
            d.decode(b"pump1 VALUE 0x1f"),
            Ok(Event::PropertyChange {
                device: "pump1".into(),
                property: None,
                value: Value::Integer(31),
            })
        );
        let raw = br#"{"command":"PROPERTY","params":["pump1","mode","auto"]}"#;
        assert!(matches!(d.decode(raw), Err(DecodeError::NotNumeric { .. })));
    }

    #[test]
    fn test_parse_c_integer() {
        assert_eq!(parse_c_integer("42"), Some(42));
        assert_eq!(parse_c_integer("-17"), Some(-17));
        assert_eq!(parse_c_integer("010"), Some(8));
        assert_eq!(parse_c_integer("0"), Some(0));
        assert_eq!(parse_c_integer("0XfF"), Some(255));
        assert_eq!(parse_c_integer("42xyz"), None);
        assert_eq!(parse_c_integer("09"), None);
        assert_eq!(parse_c_integer(""), None);
        assert_eq!(parse_c_integer("-"), None);
    }
}
