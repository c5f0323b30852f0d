//! Push notifications and their typed envelope
//!
//! A push line looks like
//! `Message <channel> {"Type": <tag>, "Content": <value>}`. The tag selects
//! how `Content` is decoded into a [`Payload`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ProtocolError, ProtocolResult};

/// Marker that starts every push line
pub const PUSH_PREFIX: &str = "Message ";

/// Envelope type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    String,
    Json,
    Binary,
    Integer,
    Array,
    Unknown(i64),
}

impl MessageType {
    pub fn code(&self) -> i64 {
        match self {
            MessageType::String => 0,
            MessageType::Json => 1,
            MessageType::Binary => 2,
            MessageType::Integer => 3,
            MessageType::Array => 4,
            MessageType::Unknown(code) => *code,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::String => "string",
            MessageType::Json => "json",
            MessageType::Binary => "binary",
            MessageType::Integer => "integer",
            MessageType::Array => "array",
            MessageType::Unknown(_) => "unknown",
        }
    }
}

impl From<i64> for MessageType {
    fn from(code: i64) -> Self {
        match code {
            0 => MessageType::String,
            1 => MessageType::Json,
            2 => MessageType::Binary,
            3 => MessageType::Integer,
            4 => MessageType::Array,
            other => MessageType::Unknown(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Unknown(code) => write!(f, "unknown({})", code),
            other => f.write_str(other.as_str()),
        }
    }
}

/// How Binary (tag 2) content is turned into bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryDecoding {
    /// Take the content as-is: a string becomes its UTF-8 bytes, an array of
    /// octets becomes those bytes. No base64 decoding.
    #[default]
    Raw,
    /// Base64-decode string content (the form PUBLISH_BIN sends)
    Base64,
}

/// `{"Type": <tag>, "Content": <value>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Type")]
    pub kind: i64,
    #[serde(rename = "Content", default)]
    pub content: serde_json::Value,
}

impl Envelope {
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from(self.kind)
    }

    /// Decode `Content` according to the type tag
    pub fn decode(self, binary: BinaryDecoding) -> ProtocolResult<Payload> {
        let content = self.content;
        match MessageType::from(self.kind) {
            MessageType::String => Ok(Payload::Text(match content {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })),
            MessageType::Json => Ok(Payload::Json(content)),
            MessageType::Binary => decode_binary(content, binary).map(Payload::Binary),
            MessageType::Integer => decode_integer(&content).map(Payload::Integer),
            MessageType::Array => decode_array(content).map(Payload::Array),
            MessageType::Unknown(kind) => Ok(Payload::Unknown { kind, content }),
        }
    }
}

/// Decoded push content handed to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
    Binary(Bytes),
    Integer(i64),
    Array(Vec<serde_json::Value>),
    /// Unrecognized tag; content passed through untouched
    Unknown {
        kind: i64,
        content: serde_json::Value,
    },
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Text(_) => MessageType::String,
            Payload::Json(_) => MessageType::Json,
            Payload::Binary(_) => MessageType::Binary,
            Payload::Integer(_) => MessageType::Integer,
            Payload::Array(_) => MessageType::Array,
            Payload::Unknown { kind, .. } => MessageType::Unknown(*kind),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Payload::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Unknown { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[serde_json::Value]> {
        match self {
            Payload::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(s) => f.write_str(s),
            Payload::Json(v) => write!(f, "{}", v),
            Payload::Binary(b) => write!(f, "<{} bytes> {}", b.len(), String::from_utf8_lossy(b)),
            Payload::Integer(n) => write!(f, "{}", n),
            Payload::Array(items) => write!(f, "{}", serde_json::Value::Array(items.clone())),
            Payload::Unknown { kind, content } => write!(f, "({}) {}", kind, content),
        }
    }
}

/// A push line split into channel and raw envelope text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushLine<'a> {
    pub channel: &'a str,
    pub envelope: &'a str,
}

impl<'a> PushLine<'a> {
    /// Recognize `Message <channel> <envelope>`.
    ///
    /// The channel is the first whitespace-free token after the marker and
    /// must be followed by a single space and a non-empty envelope. Anything
    /// else is a plain reply.
    pub fn parse(line: &'a str) -> Option<Self> {
        let rest = line.strip_prefix(PUSH_PREFIX)?;
        let end = rest.find(char::is_whitespace)?;
        let (channel, tail) = rest.split_at(end);
        let envelope = tail.strip_prefix(' ')?;
        if channel.is_empty() || envelope.trim().is_empty() {
            return None;
        }
        Some(PushLine { channel, envelope })
    }

    pub fn decode(&self, binary: BinaryDecoding) -> ProtocolResult<PushMessage> {
        let payload = Envelope::parse(self.envelope)?.decode(binary)?;
        Ok(PushMessage {
            channel: self.channel.to_string(),
            payload,
        })
    }
}

/// A fully decoded push notification
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub channel: String,
    pub payload: Payload,
}

fn decode_binary(content: serde_json::Value, mode: BinaryDecoding) -> ProtocolResult<Bytes> {
    match (content, mode) {
        (serde_json::Value::String(s), BinaryDecoding::Raw) => Ok(Bytes::from(s.into_bytes())),
        (serde_json::Value::String(s), BinaryDecoding::Base64) => STANDARD
            .decode(s.trim())
            .map(Bytes::from)
            .map_err(|e| ProtocolError::InvalidContent {
                kind: "binary",
                reason: e.to_string(),
            }),
        (serde_json::Value::Array(items), _) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| ProtocolError::InvalidContent {
                        kind: "binary",
                        reason: format!("{} is not an octet", item),
                    })
            })
            .collect::<ProtocolResult<Vec<u8>>>()
            .map(Bytes::from),
        (other, _) => Err(ProtocolError::InvalidContent {
            kind: "binary",
            reason: format!("unsupported content {}", other),
        }),
    }
}

/// Base-10 integer from a JSON number or a numeric string.
///
/// Strings are read up to the first non-digit, so `"42px"` is 42.
fn decode_integer(content: &serde_json::Value) -> ProtocolResult<i64> {
    let invalid = || ProtocolError::InvalidContent {
        kind: "integer",
        reason: format!("{} is not an integer", content),
    };

    match content {
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(i),
            None => n
                .as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
                .ok_or_else(invalid),
        },
        serde_json::Value::String(s) => parse_leading_integer(s).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

pub(crate) fn parse_leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let sign_len = match s.as_bytes().first() {
        Some(b'-') | Some(b'+') => 1,
        _ => 0,
    };
    let end = s[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len() - sign_len);
    if end == 0 {
        return None;
    }
    s[..sign_len + end].parse().ok()
}

fn decode_array(content: serde_json::Value) -> ProtocolResult<Vec<serde_json::Value>> {
    match content {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::String(s) => {
            serde_json::from_str(&s).map_err(|e| ProtocolError::InvalidContent {
                kind: "array",
                reason: e.to_string(),
            })
        }
        other => Err(ProtocolError::InvalidContent {
            kind: "array",
            reason: format!("{} is not an array", other),
        }),
    }
}
