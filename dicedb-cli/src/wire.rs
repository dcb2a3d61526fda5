use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::command::Command;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Request frame as it travels to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireCommand {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl From<&Command> for WireCommand {
    fn from(command: &Command) -> Self {
        Self {
            cmd: command.verb().to_string(),
            args: command.args().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Err,
}

/// Outcome of a command, or a push delivered on a watch connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub status: Status,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fingerprint64: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
            fingerprint64: 0,
            response: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            status: Status::Err,
            message: message.into(),
            fingerprint64: 0,
            response: None,
        }
    }

    pub fn with_payload(mut self, payload: &Payload) -> Self {
        self.response = serde_json::to_value(payload).ok();
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: u64) -> Self {
        self.fingerprint64 = fingerprint;
        self
    }

    pub fn is_err(&self) -> bool {
        self.status == Status::Err
    }

    /// Decodes the payload when its kind is one this client knows how to format.
    pub fn payload(&self) -> Option<Payload> {
        let raw = self.response.as_ref()?;
        serde_json::from_value(raw.clone()).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashElement {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZElement {
    pub rank: i64,
    pub score: i64,
    pub member: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoCoordinates {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoElement {
    pub hash: u64,
    pub distance: f64,
    pub coords: GeoCoordinates,
    pub member: String,
}

/// Typed payload families, discriminated by the `kind` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum Payload {
    #[serde(
        rename = "GET",
        alias = "GETDEL",
        alias = "GETEX",
        alias = "GETSET",
        alias = "HGET"
    )]
    Value { value: String },
    #[serde(
        rename = "SET",
        alias = "FLUSHDB",
        alias = "HANDSHAKE",
        alias = "UNWATCH",
        alias = "GET.WATCH",
        alias = "HGET.WATCH",
        alias = "HGETALL.WATCH",
        alias = "ZRANGE.WATCH",
        alias = "ZCARD.WATCH",
        alias = "ZCOUNT.WATCH",
        alias = "ZRANK.WATCH"
    )]
    Ack,
    #[serde(
        rename = "DEL",
        alias = "EXISTS",
        alias = "HSET",
        alias = "ZADD",
        alias = "ZCOUNT",
        alias = "ZREM",
        alias = "ZCARD",
        alias = "GEOADD"
    )]
    Count { count: i64 },
    #[serde(rename = "INCR", alias = "DECR", alias = "INCRBY", alias = "DECRBY")]
    Integer { value: i64 },
    #[serde(rename = "ECHO")]
    Echo { message: String },
    #[serde(rename = "PING")]
    Ping { message: String },
    #[serde(rename = "EXPIRE", alias = "EXPIREAT")]
    Expire { is_changed: bool },
    #[serde(rename = "EXPIRETIME")]
    ExpireTime { unix_sec: i64 },
    #[serde(rename = "TTL")]
    Ttl { seconds: i64 },
    #[serde(rename = "TYPE")]
    Type {
        #[serde(rename = "type")]
        kind: String,
    },
    #[serde(rename = "KEYS")]
    Keys { keys: Vec<String> },
    #[serde(rename = "HGETALL")]
    HashElements { elements: Vec<HashElement> },
    #[serde(rename = "ZRANGE", alias = "ZPOPMAX", alias = "ZPOPMIN")]
    SortedElements { elements: Vec<ZElement> },
    #[serde(rename = "ZRANK")]
    Rank { element: ZElement },
    #[serde(rename = "GEODIST")]
    GeoDistance { distance: f64 },
    #[serde(rename = "GEOHASH")]
    GeoHashes { hashes: Vec<String> },
    #[serde(rename = "GEOSEARCH")]
    GeoSearch { elements: Vec<GeoElement> },
    /// A zero coordinate marks a member that does not exist.
    #[serde(rename = "GEOPOS")]
    GeoPositions { coords: Vec<GeoCoordinates> },
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    // serde_json escapes embedded newlines, so one frame is always one line.
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn response_survives_the_line_framing() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);
        let response = Response::ok("OK")
            .with_fingerprint(42)
            .with_payload(&Payload::Value {
                value: "multi\nline".into(),
            });

        write_message(&mut writer, &response)
            .await
            .expect("write message");
        let parsed = read_message::<_, Response>(&mut reader)
            .await
            .expect("read message")
            .expect("expected message");

        assert_eq!(response, parsed);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_and_eof_is_none() {
        let input: &[u8] = b"\n\r\n{\"status\":\"ERR\",\"message\":\"boom\"}\n";
        let mut reader = tokio::io::BufReader::new(input);

        let first = read_message::<_, Response>(&mut reader)
            .await
            .expect("read")
            .expect("one frame");
        assert!(first.is_err());
        assert_eq!(first.message, "boom");

        let second = read_message::<_, Response>(&mut reader).await.expect("read");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn malformed_frame_is_invalid_data() {
        let input: &[u8] = b"{not json}\n";
        let mut reader = tokio::io::BufReader::new(input);

        let err = read_message::<_, Response>(&mut reader)
            .await
            .expect_err("malformed frame");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn aliases_decode_into_shared_families() {
        let response = Response {
            status: Status::Ok,
            message: "OK".into(),
            fingerprint64: 0,
            response: Some(json!({"kind": "GETDEL", "value": "v"})),
        };
        assert_eq!(
            response.payload(),
            Some(Payload::Value { value: "v".into() })
        );

        let watch_ack = Response {
            response: Some(json!({"kind": "ZRANGE.WATCH"})),
            ..response.clone()
        };
        assert_eq!(watch_ack.payload(), Some(Payload::Ack));
    }

    #[test]
    fn unknown_kind_has_no_typed_payload() {
        let response = Response {
            status: Status::Ok,
            message: "OK".into(),
            fingerprint64: 0,
            response: Some(json!({"kind": "LPUSH", "count": 3})),
        };
        assert!(response.payload().is_none());
        assert!(response.response.is_some());
    }
}
