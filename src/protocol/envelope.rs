//! Command and response envelopes.
//!
//! Inbound (host to worker), one whitespace-free JSON token:
//! ```text
//! {"Id":7,"Cmd":{"op":"double","n":21},"Signal":-1}
//! ```
//!
//! Outbound (worker to host), one line:
//! ```text
//! {"id":7,"data":{"result":42}}
//! ```
//!
//! Inbound field names are matched case-insensitively, so producers may write
//! `Id`, `id` or `ID`. When several keys name the same field, the last one in
//! the document wins. Outbound field names are always lower-case.
//!
//! # Example
//!
//! ```
//! use cmdpipe::protocol::{Command, Response, Signal};
//! use serde_json::json;
//!
//! let cmd = Command::decode(br#"{"id":7,"cmd":{"n":21},"signal":-1}"#).unwrap();
//! assert_eq!(cmd.id, 7);
//! assert_eq!(cmd.signal, Signal::NoSignal);
//!
//! let line = Response::new(cmd.id, json!({"result": 42})).encode_line().unwrap();
//! assert_eq!(&line[..], b"{\"id\":7,\"data\":{\"result\":42}}\n");
//! ```

use std::fmt;

use bytes::Bytes;
use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::error::Category;
use serde_json::{Map, Value};

use crate::error::{DispatchError, Result};

/// Wire value of an ordinary command.
pub const NO_SIGNAL: i64 = -1;

/// Wire value of a termination request.
pub const TERMINATION: i64 = 1;

/// Control code carried by every inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Ordinary command, dispatched to the handler.
    NoSignal,
    /// Stop the read loop.
    Termination,
    /// Any other value. Neither dispatched nor terminating.
    Other(i64),
}

impl Signal {
    /// Wire value of this signal.
    #[inline]
    pub fn code(self) -> i64 {
        match self {
            Signal::NoSignal => NO_SIGNAL,
            Signal::Termination => TERMINATION,
            Signal::Other(code) => code,
        }
    }
}

impl From<i64> for Signal {
    fn from(code: i64) -> Self {
        match code {
            NO_SIGNAL => Signal::NoSignal,
            TERMINATION => Signal::Termination,
            other => Signal::Other(other),
        }
    }
}

impl Serialize for Signal {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.code())
    }
}

/// Inbound command envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    /// Correlation id, echoed in the response.
    #[serde(rename = "Id")]
    pub id: i64,
    /// Command payload handed to the processor. An object or `null`.
    #[serde(rename = "Cmd")]
    pub cmd: Value,
    /// Control code.
    #[serde(rename = "Signal")]
    pub signal: Signal,
}

impl Command {
    /// Create an ordinary command.
    pub fn new(id: i64, cmd: Value) -> Self {
        Self {
            id,
            cmd,
            signal: Signal::NoSignal,
        }
    }

    /// Create a termination envelope.
    pub fn terminate(id: i64) -> Self {
        Self {
            id,
            cmd: Value::Object(Map::new()),
            signal: Signal::Termination,
        }
    }

    /// Decode one envelope token.
    ///
    /// All three fields are required. `Id` and `Signal` must be integers,
    /// `Cmd` an object or `null`. Unknown fields are ignored. Field names
    /// match case-insensitively and a repeated field takes its last value.
    ///
    /// # Errors
    ///
    /// Returns `Json` if the token is not valid JSON and `InvalidEnvelope` if
    /// it does not have the envelope shape.
    pub fn decode(token: &[u8]) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_slice(token).map_err(|e| match e.classify() {
            Category::Data => DispatchError::InvalidEnvelope(e.to_string()),
            _ => DispatchError::Json(e),
        })?;

        let id = integer_field(raw.id, "Id")?;
        let signal = Signal::from(integer_field(raw.signal, "Signal")?);

        let cmd = match raw.cmd {
            Some(cmd @ (Value::Object(_) | Value::Null)) => cmd,
            Some(_) => {
                return Err(DispatchError::InvalidEnvelope(
                    "field `Cmd` must be an object or null".to_string(),
                ))
            }
            None => return Err(missing("Cmd")),
        };

        Ok(Self { id, cmd, signal })
    }

    /// Encode as a single JSON token (no whitespace), as a host would send it.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Envelope fields as found, before type checks.
#[derive(Default)]
struct RawEnvelope {
    id: Option<Value>,
    cmd: Option<Value>,
    signal: Option<Value>,
}

impl<'de> Deserialize<'de> for RawEnvelope {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(RawEnvelopeVisitor)
    }
}

struct RawEnvelopeVisitor;

impl<'de> Visitor<'de> for RawEnvelopeVisitor {
    type Value = RawEnvelope;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an envelope object")
    }

    // Keys are visited in document order, so a later match overwrites.
    fn visit_map<A>(self, mut map: A) -> std::result::Result<RawEnvelope, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut raw = RawEnvelope::default();
        while let Some(key) = map.next_key::<String>()? {
            let slot = if key.eq_ignore_ascii_case("Id") {
                &mut raw.id
            } else if key.eq_ignore_ascii_case("Cmd") {
                &mut raw.cmd
            } else if key.eq_ignore_ascii_case("Signal") {
                &mut raw.signal
            } else {
                map.next_value::<IgnoredAny>()?;
                continue;
            };
            *slot = Some(map.next_value()?);
        }
        Ok(raw)
    }
}

fn integer_field(value: Option<Value>, name: &str) -> Result<i64> {
    let value = value.ok_or_else(|| missing(name))?;
    value.as_i64().ok_or_else(|| {
        DispatchError::InvalidEnvelope(format!(
            "field `{}` must be an integer, got {}",
            name, value
        ))
    })
}

fn missing(name: &str) -> DispatchError {
    DispatchError::InvalidEnvelope(format!("missing field `{}`", name))
}

/// Outbound response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the command this answers.
    pub id: i64,
    /// Processor result.
    pub data: Value,
}

impl Response {
    /// Create a response.
    pub fn new(id: i64, data: Value) -> Self {
        Self { id, data }
    }

    /// Encode as one newline-terminated JSON line.
    ///
    /// Uses an explicit `\n`, never `\r\n`.
    pub fn encode_line(&self) -> Result<Bytes> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }

    /// Decode one response line (trailing newline allowed).
    pub fn decode_line(line: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_producer_casing() {
        let token = br#"{"Id":7,"Cmd":{"op":"double","n":21},"Signal":-1}"#;
        let cmd = Command::decode(token).unwrap();

        assert_eq!(cmd.id, 7);
        assert_eq!(cmd.cmd, json!({"op": "double", "n": 21}));
        assert_eq!(cmd.signal, Signal::NoSignal);
    }

    #[test]
    fn test_decode_any_casing() {
        let cmd = Command::decode(br#"{"ID":3,"cMd":{},"SIGNAL":1}"#).unwrap();

        assert_eq!(cmd.id, 3);
        assert_eq!(cmd.signal, Signal::Termination);
    }

    #[test]
    fn test_decode_last_matching_key_wins() {
        let cmd = Command::decode(br#"{"ID":1,"Id":2,"Cmd":{},"Signal":-1}"#).unwrap();
        assert_eq!(cmd.id, 2);

        let cmd = Command::decode(br#"{"Id":2,"ID":1,"Cmd":{},"Signal":-1}"#).unwrap();
        assert_eq!(cmd.id, 1);

        let cmd = Command::decode(br#"{"Id":1,"Cmd":{},"signal":1,"Signal":-1}"#).unwrap();
        assert_eq!(cmd.signal, Signal::NoSignal);
    }

    #[test]
    fn test_decode_null_cmd() {
        let cmd = Command::decode(br#"{"Id":1,"Cmd":null,"Signal":-1}"#).unwrap();
        assert_eq!(cmd.cmd, Value::Null);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let cmd = Command::decode(br#"{"Id":1,"Cmd":{},"Signal":-1,"Extra":true}"#).unwrap();
        assert_eq!(cmd.id, 1);
    }

    #[test]
    fn test_decode_other_signal() {
        let cmd = Command::decode(br#"{"Id":1,"Cmd":{},"Signal":0}"#).unwrap();
        assert_eq!(cmd.signal, Signal::Other(0));
    }

    #[test]
    fn test_decode_invalid_json() {
        for token in [&b"not"[..], b"{\"Id\":1", b"{\"Id\":1}}"] {
            let result = Command::decode(token);
            assert!(matches!(result, Err(DispatchError::Json(_))));
        }
    }

    #[test]
    fn test_decode_missing_fields() {
        for token in [
            r#"{"Cmd":{},"Signal":-1}"#,
            r#"{"Id":1,"Signal":-1}"#,
            r#"{"Id":1,"Cmd":{}}"#,
            r#"{}"#,
        ] {
            let result = Command::decode(token.as_bytes());
            assert!(
                matches!(result, Err(DispatchError::InvalidEnvelope(_))),
                "token {} should be rejected",
                token
            );
        }
    }

    #[test]
    fn test_decode_wrong_types() {
        for token in [
            r#"{"Id":"1","Cmd":{},"Signal":-1}"#,
            r#"{"Id":1.5,"Cmd":{},"Signal":-1}"#,
            r#"{"Id":1,"Cmd":[1,2],"Signal":-1}"#,
            r#"{"Id":1,"Cmd":"x","Signal":-1}"#,
            r#"{"Id":1,"Cmd":{},"Signal":true}"#,
            r#"[1,2,3]"#,
            r#"42"#,
        ] {
            let result = Command::decode(token.as_bytes());
            assert!(
                matches!(result, Err(DispatchError::InvalidEnvelope(_))),
                "token {} should be rejected",
                token
            );
        }
    }

    #[test]
    fn test_signal_codes() {
        assert_eq!(Signal::from(-1), Signal::NoSignal);
        assert_eq!(Signal::from(1), Signal::Termination);
        assert_eq!(Signal::from(7), Signal::Other(7));
        assert_eq!(Signal::Other(7).code(), 7);
        assert_eq!(Signal::Termination.code(), TERMINATION);
    }

    #[test]
    fn test_command_encode_is_one_token() {
        let encoded = Command::new(5, json!({"text": "a b"})).encode().unwrap();

        assert_eq!(encoded, r#"{"Id":5,"Cmd":{"text":"a b"},"Signal":-1}"#);
        let decoded = Command::decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, Command::new(5, json!({"text": "a b"})));
    }

    #[test]
    fn test_terminate_envelope() {
        let encoded = Command::terminate(9).encode().unwrap();
        assert_eq!(encoded, r#"{"Id":9,"Cmd":{},"Signal":1}"#);
    }

    #[test]
    fn test_response_line_format() {
        let line = Response::new(7, json!({"result": 42})).encode_line().unwrap();
        assert_eq!(&line[..], b"{\"id\":7,\"data\":{\"result\":42}}\n");
    }

    #[test]
    fn test_response_roundtrip_nested() {
        let data = json!({
            "s": "text",
            "n": -12.5,
            "b": false,
            "z": null,
            "nested": {"list": [1, "two", {"three": 3}], "empty": {}}
        });
        let original = Response::new(-4, data);

        let line = original.encode_line().unwrap();
        let decoded = Response::decode_line(&line).unwrap();

        assert_eq!(decoded, original);
    }
}
