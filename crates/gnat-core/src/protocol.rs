//! Wire frames
//!
//! Every frame the server writes is a `\r\n`-terminated text line, with the
//! exception of `MSG`, which is followed by the raw payload and a second
//! terminator:
//! ```text
//! INFO {"server_id":42,...}\r\n
//! +OK\r\n
//! -ERR 'Unknown Protocol Operation'\r\n
//! MSG orders.eu 7 5\r\nhello\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Line terminator used for every frame the server writes
pub const CRLF: &[u8] = b"\r\n";

/// Acknowledgement
pub const OK: &[u8] = b"+OK\r\n";

/// Reply to a client PING
pub const PONG: &[u8] = b"PONG\r\n";

/// Reply to the first CONNECT: acknowledgement plus the mandatory PING
pub const OK_PING: &[u8] = b"+OK\r\nPING\r\n";

/// Build an error line: `-ERR '<message>'\r\n`
pub fn err_frame(message: &str) -> Bytes {
    Bytes::from(format!("-ERR '{}'\r\n", message))
}

/// Build a delivery frame: `MSG <subject> <sid> <len>\r\n<payload>\r\n`
pub fn msg_frame(subject: &str, subscriber_id: u32, payload: &[u8]) -> Bytes {
    let header = format!("MSG {} {} {}\r\n", subject, subscriber_id, payload.len());
    let mut buf = BytesMut::with_capacity(header.len() + payload.len() + CRLF.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    buf.put_slice(CRLF);
    buf.freeze()
}

/// Document sent in the `INFO` line on accept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_id: u64,
    pub server_name: String,
    pub version: String,
    pub client_id: u64,
    pub client_ip: String,
    pub host_ip: String,
    pub host_port: u16,
}

impl ServerInfo {
    /// Render as `INFO <json>\r\n`
    pub fn to_frame(&self) -> Result<Bytes> {
        let json = serde_json::to_string(self).map_err(|e| Error::Unexpected(e.to_string()))?;
        Ok(Bytes::from(format!("INFO {}\r\n", json)))
    }
}

/// Options a client may announce in `CONNECT`
///
/// Unknown keys are ignored and values of the wrong type fall back to the
/// default, so any syntactically valid JSON document is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub name: Option<String>,
    pub lang: Option<String>,
    pub version: Option<String>,
    pub verbose: bool,
    pub pedantic: bool,
}

impl ConnectOptions {
    /// Validate the JSON syntax of a CONNECT argument and extract options
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(raw)?;

        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let flag = |key: &str| value.get(key).and_then(Value::as_bool).unwrap_or(false);

        Ok(Self {
            name: text("name"),
            lang: text("lang"),
            version: text("version"),
            verbose: flag("verbose"),
            pedantic: flag("pedantic"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_frame() {
        let frame = msg_frame("foo.bar", 1, b"hello");
        assert_eq!(&frame[..], b"MSG foo.bar 1 5\r\nhello\r\n");
    }

    #[test]
    fn test_msg_frame_empty_payload() {
        let frame = msg_frame("foo", 3, b"");
        assert_eq!(&frame[..], b"MSG foo 3 0\r\n\r\n");
    }

    #[test]
    fn test_err_frame() {
        assert_eq!(
            &err_frame("Invalid publish subject")[..],
            b"-ERR 'Invalid publish subject'\r\n"
        );
    }

    #[test]
    fn test_info_frame() {
        let info = ServerInfo {
            server_id: 7,
            server_name: "gnat-server".into(),
            version: "0.3.0".into(),
            client_id: 9,
            client_ip: "127.0.0.1".into(),
            host_ip: "0.0.0.0".into(),
            host_port: 4222,
        };
        let frame = info.to_frame().unwrap();
        let text = std::str::from_utf8(&frame).unwrap();

        assert!(text.starts_with("INFO {\"server_id\":7,"));
        assert!(text.ends_with("}\r\n"));
        assert!(text.contains("\"host_port\":4222"));
    }

    #[test]
    fn test_connect_options() {
        let opts =
            ConnectOptions::parse(br#"{"name":"sensor-7","verbose":true,"extra":[1,2]}"#).unwrap();
        assert_eq!(opts.name.as_deref(), Some("sensor-7"));
        assert!(opts.verbose);
        assert!(!opts.pedantic);

        let lenient = ConnectOptions::parse(br#"{"name":12}"#).unwrap();
        assert_eq!(lenient.name, None);
    }

    #[test]
    fn test_connect_options_invalid_json() {
        assert_eq!(ConnectOptions::parse(b"{foo:bar}"), Err(Error::JsonParse));
        assert_eq!(ConnectOptions::parse(b"{\"a\":"), Err(Error::JsonParse));
    }
}
