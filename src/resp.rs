//! Minimal RESP2 wire codec backing the default [`crate::connection::TcpConnection`].
//!
//! The engine only ever needs to *issue* commands as arrays of bulk strings
//! and *read back* the handful of reply shapes modeled by [`Value`] — it
//! never needs RESP3, inline commands, or pub/sub push frames, so this stays
//! a couple of straightforward encode/decode functions rather than a parser
//! combinator pipeline.

use std::future::Future;
use std::pin::Pin;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt};

use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::value::Value;

fn put_int_line(buf: &mut BytesMut, prefix: u8, n: usize) {
    buf.put_u8(prefix);
    let mut itoa_buf = itoa::Buffer::new();
    buf.extend_from_slice(itoa_buf.format(n).as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Encode a command as a RESP2 array of bulk strings.
pub fn encode_command<'a>(args: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let args: Vec<&[u8]> = args.into_iter().collect();
    let mut buf = BytesMut::with_capacity(32 * args.len());
    put_int_line(&mut buf, b'*', args.len());
    for arg in args {
        put_int_line(&mut buf, b'$', arg.len());
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
    buf.to_vec()
}

async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> RedisResult<String> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(RedisError::from)?;
    if n == 0 {
        return Err(RedisError::from((
            ErrorKind::IoError,
            "connection closed while reading a reply",
        )));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Read one reply from `reader`, recursing into nested arrays.
///
/// Boxed explicitly (rather than a plain `async fn`) because arrays nest and
/// `async fn`s can't recurse without indirection.
pub fn read_value<'a, R: AsyncBufReadExt + AsyncReadExt + Unpin + Send>(
    reader: &'a mut R,
) -> Pin<Box<dyn Future<Output = RedisResult<Value>> + Send + 'a>> {
    Box::pin(async move {
        let line = read_line(reader).await?;
        let (prefix, rest) = line.split_at(1);
        match prefix {
            "+" => Ok(Value::Status(rest.to_string())),
            "-" => Ok(Value::Error(rest.to_string())),
            ":" => rest.parse::<i64>().map(Value::Int).map_err(|_| {
                RedisError::from((ErrorKind::ResponseError, "invalid integer reply"))
            }),
            "$" => {
                let len: i64 = rest.parse().map_err(|_| {
                    RedisError::from((ErrorKind::ResponseError, "invalid bulk length"))
                })?;
                if len < 0 {
                    return Ok(Value::Nil);
                }
                let len = len as usize;
                let mut buf = vec![0u8; len + 2];
                reader
                    .read_exact(&mut buf)
                    .await
                    .map_err(RedisError::from)?;
                buf.truncate(len);
                Ok(Value::Data(buf))
            }
            "*" => {
                let len: i64 = rest.parse().map_err(|_| {
                    RedisError::from((ErrorKind::ResponseError, "invalid array length"))
                })?;
                if len < 0 {
                    return Ok(Value::Nil);
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_value(reader).await?);
                }
                Ok(Value::Bulk(items))
            }
            _ => Err(RedisError::from((
                ErrorKind::ResponseError,
                "unrecognized reply type byte",
            ))),
        }
    })
}
