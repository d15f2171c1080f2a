//! Redirection Parser (§4.4): decode `MOVED`/`ASK` reply bodies into a
//! target `(host, port)`.

use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::value::Value;

/// Result of attempting to match a redirection prefix against a reply.
#[derive(Debug, PartialEq, Eq)]
pub enum RedirectMatch {
    /// The reply didn't start with `prefix` at all.
    NoMatch,
    /// The reply started with `prefix` and decoded to `(host, port)`.
    Matched(String, u16),
}

/// Look for `prefix` (`"MOVED"` or `"ASK"`) at the start of `message`, in the
/// form `<prefix> <slot> <host>:<port>`. A prefix match with a malformed body
/// is a parse error, distinct from no match at all (§4.4).
fn parse_redirect_message(message: &str, prefix: &str) -> RedisResult<RedirectMatch> {
    let Some(rest) = message.strip_prefix(prefix) else {
        return Ok(RedirectMatch::NoMatch);
    };
    let mut parts = rest.split_whitespace();
    let _slot = parts.next().ok_or_else(|| {
        RedisError::from((
            ErrorKind::ResponseError,
            "malformed redirection: missing slot",
        ))
    })?;
    let host_port = parts.next().ok_or_else(|| {
        RedisError::from((
            ErrorKind::ResponseError,
            "malformed redirection: missing host:port",
        ))
    })?;
    let (host, port) = host_port.rsplit_once(':').ok_or_else(|| {
        RedisError::from((
            ErrorKind::ResponseError,
            "malformed redirection: host:port has no colon",
        ))
    })?;
    let port: u16 = port.parse().map_err(|_| {
        RedisError::from((ErrorKind::ResponseError, "malformed redirection: bad port"))
    })?;
    Ok(RedirectMatch::Matched(host.to_string(), port))
}

/// Parse a redirection out of `value`. If `value` is a list, inspect each
/// element and return the first match (§4.4).
pub fn parse_redirect(value: &Value, prefix: &str) -> RedisResult<Option<(String, u16)>> {
    match value {
        Value::Error(message) => match parse_redirect_message(message, prefix)? {
            RedirectMatch::Matched(host, port) => Ok(Some((host, port))),
            RedirectMatch::NoMatch => Ok(None),
        },
        Value::Bulk(items) => {
            for item in items {
                if let Some(found) = parse_redirect(item, prefix)? {
                    return Ok(Some(found));
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_moved() {
        let v = Value::Error("MOVED 12182 10.0.0.3:7002".into());
        let (host, port) = parse_redirect(&v, "MOVED").unwrap().unwrap();
        assert_eq!(host, "10.0.0.3");
        assert_eq!(port, 7002);
    }

    #[test]
    fn matches_ask() {
        let v = Value::Error("ASK 800 10.0.0.3:7002".into());
        let (host, port) = parse_redirect(&v, "ASK").unwrap().unwrap();
        assert_eq!(host, "10.0.0.3");
        assert_eq!(port, 7002);
    }

    #[test]
    fn no_match_for_other_errors() {
        let v = Value::Error("WRONGTYPE Operation against a key".into());
        assert_eq!(parse_redirect(&v, "MOVED").unwrap(), None);
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        let v = Value::Error("MOVED not-a-slot-or-host".into());
        assert!(parse_redirect(&v, "MOVED").is_err());
    }

    #[test]
    fn searches_list_replies() {
        let v = Value::Bulk(vec![
            Value::Status("fine".into()),
            Value::Error("ASK 1 127.0.0.1:7001".into()),
        ]);
        let (host, port) = parse_redirect(&v, "ASK").unwrap().unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 7001);
    }
}
