//! The subset of RESP2 reply shapes the routing engine needs to inspect:
//! enough to read `CLUSTER SLOTS`, follow `MOVED`/`ASK`/`CLUSTERDOWN` errors,
//! and pass everything else through untouched.

use std::fmt;

/// A reply value. `Nil` is the explicit nil-reply sentinel described in §6;
/// every other variant mirrors a RESP2 wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    /// A bulk string (`$...`).
    Data(Vec<u8>),
    /// A simple status string (`+OK`).
    Status(String),
    /// An array of replies (`*...`).
    Bulk(Vec<Value>),
    /// An error reply (`-ERR ...`). The string is the body after the dash.
    Error(String),
}

impl Value {
    pub fn okay() -> Value {
        Value::Status("OK".into())
    }

    /// If this value (or any element of a top-level array) is an error, return
    /// its message. Redirection parsing (§4.4) needs to check list replies
    /// too, since some pipelining layers wrap a single error in an array.
    pub fn as_error_message(&self) -> Option<&str> {
        match self {
            Value::Error(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Best-effort conversion to a UTF-8 string, used when reading back
    /// simple status/bulk replies such as `OK` or a `CLUSTER SLOTS` ip field.
    pub fn as_str(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            Value::Status(s) => Some(std::borrow::Cow::Borrowed(s.as_str())),
            Value::Data(bytes) => Some(String::from_utf8_lossy(bytes)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Data(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Value::Status(s) => write!(f, "{s}"),
            Value::Bulk(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Error(msg) => write!(f, "-{msg}"),
        }
    }
}
