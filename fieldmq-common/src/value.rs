use std::fmt;

/// Literal sent in place of an empty payload, so "empty string" stays
/// distinguishable from "no value".
pub const EMPTY_PAYLOAD_MARKER: &str = "\"\"";

/// A decoded payload from the field device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Payload made only of printable ASCII.
    Text(String),

    /// Payload holding control or non-ASCII bytes, kept raw.
    Binary(Vec<u8>),
}

impl Value {
    /// Classify a raw payload.
    ///
    /// Empty payloads become [`EMPTY_PAYLOAD_MARKER`]; a payload of printable
    /// ASCII (0x20..=0x7E) is text, anything else is binary.
    pub fn from_payload(payload: &[u8]) -> Self {
        if payload.is_empty() {
            return Value::Text(EMPTY_PAYLOAD_MARKER.to_string());
        }

        if payload.iter().all(|&b| is_printable(b)) {
            Value::Text(payload.iter().map(|&b| b as char).collect())
        } else {
            Value::Binary(payload.to_vec())
        }
    }

    /// Bytes published to the broker.
    ///
    /// Binary values are sent in their escaped rendering, never raw.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Value::Text(text) => text.clone().into_bytes(),
            Value::Binary(bytes) => escape_bytes(bytes).into_bytes(),
        }
    }

    /// Whether the broker payload `wire` is this value.
    pub fn matches_wire(&self, wire: &[u8]) -> bool {
        match self {
            Value::Text(text) => text.as_bytes() == wire,
            Value::Binary(bytes) => escape_bytes(bytes).as_bytes() == wire,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Value::Binary(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(text) => f.write_str(text),
            Value::Binary(bytes) => f.write_str(&escape_bytes(bytes)),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::from_payload(v.as_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::from_payload(&v)
    }
}

fn is_printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

/// Render bytes as an escaped byte-string literal.
///
/// The output matches the device's own diagnostic rendering:
/// `b'\x00\x01AB'`, switching to double quotes when the data holds a single
/// quote but no double quote.
///
/// # Example
/// ```
/// use fieldmq_common::value::escape_bytes;
///
/// assert_eq!(escape_bytes(b"\x00\x01AB"), r"b'\x00\x01AB'");
/// assert_eq!(escape_bytes(b"it's\n"), r#"b"it's\n""#);
/// ```
pub fn escape_bytes(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };

    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote as char);

    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            b if is_printable(b) => out.push(b as char),
            b => out.push_str(&format!("\\x{:02x}", b)),
        }
    }

    out.push(quote as char);
    out
}

/// One decoded update from the field device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Full topic, prefix included.
    pub topic: String,

    /// Decoded value.
    pub value: Value,

    /// `true` when the device restated its last-known state, `false` for a
    /// live change.
    pub retained: bool,
}

impl Update {
    pub fn new(topic: impl Into<String>, value: Value, retained: bool) -> Self {
        Self {
            topic: topic.into(),
            value,
            retained,
        }
    }
}
