//! imdb Command types and line encoding

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tracing::warn;

use crate::error::{ProtocolError, ProtocolResult};

/// A value stored with SET.
///
/// Text is quoted on the wire with embedded `"` escaped; every other variant
/// is written as its literal form.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// All supported commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// SET <key> <value>
    Set { key: String, value: Value },

    /// GET <key>
    Get { key: String },

    /// LPUSH <key> <v1> <v2> ...
    LPush { key: String, values: Vec<String> },

    /// RPUSH <key> <v1> <v2> ...
    RPush { key: String, values: Vec<String> },

    /// LPOP <key>
    LPop { key: String },

    /// RPOP <key>
    RPop { key: String },

    /// SADD <key> <m1> <m2> ...
    SAdd { key: String, members: Vec<String> },

    /// SMEMBERS <key>
    SMembers { key: String },

    /// HSET <key> <field> <value>
    HSet {
        key: String,
        field: String,
        value: String,
    },

    /// HGET <key> <field>
    HGet { key: String, field: String },

    /// SUBSCRIBE <channel>
    Subscribe { channel: String },

    /// PUBLISH <channel> <message>
    Publish { channel: String, message: String },

    /// PUBLISH_JSON <channel> <json>
    PublishJson {
        channel: String,
        data: serde_json::Value,
    },

    /// PUBLISH_INT <channel> <int>
    PublishInt { channel: String, value: i64 },

    /// PUBLISH_BIN <channel> <base64>
    PublishBin { channel: String, data: Bytes },

    /// PUBLISH_ARRAY <channel> <json-array>
    PublishArray {
        channel: String,
        items: Vec<serde_json::Value>,
    },

    /// A pre-formatted command line, sent verbatim
    Raw { line: String },
}

impl Command {
    pub fn set(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Command::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Command::Get { key: key.into() }
    }

    pub fn lpush<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::LPush {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn rpush<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::RPush {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn lpop(key: impl Into<String>) -> Self {
        Command::LPop { key: key.into() }
    }

    pub fn rpop(key: impl Into<String>) -> Self {
        Command::RPop { key: key.into() }
    }

    pub fn sadd<I, S>(key: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::SAdd {
            key: key.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn smembers(key: impl Into<String>) -> Self {
        Command::SMembers { key: key.into() }
    }

    pub fn hset(key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Command::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn hget(key: impl Into<String>, field: impl Into<String>) -> Self {
        Command::HGet {
            key: key.into(),
            field: field.into(),
        }
    }

    pub fn subscribe(channel: impl Into<String>) -> Self {
        Command::Subscribe {
            channel: channel.into(),
        }
    }

    pub fn publish(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Command::Publish {
            channel: channel.into(),
            message: message.into(),
        }
    }

    pub fn publish_json(channel: impl Into<String>, data: serde_json::Value) -> Self {
        Command::PublishJson {
            channel: channel.into(),
            data,
        }
    }

    pub fn publish_int(channel: impl Into<String>, value: i64) -> Self {
        Command::PublishInt {
            channel: channel.into(),
            value,
        }
    }

    pub fn publish_bin(channel: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Command::PublishBin {
            channel: channel.into(),
            data: data.into(),
        }
    }

    pub fn publish_array(channel: impl Into<String>, items: Vec<serde_json::Value>) -> Self {
        Command::PublishArray {
            channel: channel.into(),
            items,
        }
    }

    pub fn raw(line: impl Into<String>) -> Self {
        Command::Raw { line: line.into() }
    }

    /// Wire name of the command. For raw lines this is the first token.
    pub fn name(&self) -> &str {
        match self {
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::LPush { .. } => "LPUSH",
            Command::RPush { .. } => "RPUSH",
            Command::LPop { .. } => "LPOP",
            Command::RPop { .. } => "RPOP",
            Command::SAdd { .. } => "SADD",
            Command::SMembers { .. } => "SMEMBERS",
            Command::HSet { .. } => "HSET",
            Command::HGet { .. } => "HGET",
            Command::Subscribe { .. } => "SUBSCRIBE",
            Command::Publish { .. } => "PUBLISH",
            Command::PublishJson { .. } => "PUBLISH_JSON",
            Command::PublishInt { .. } => "PUBLISH_INT",
            Command::PublishBin { .. } => "PUBLISH_BIN",
            Command::PublishArray { .. } => "PUBLISH_ARRAY",
            Command::Raw { line } => line.split_whitespace().next().unwrap_or(""),
        }
    }

    /// Encode the command to a newline-terminated line
    pub fn encode(&self) -> ProtocolResult<BytesMut> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encode the command into an existing buffer.
    ///
    /// Arguments are validated first; on error nothing is written to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        self.validate()?;

        let args: Vec<String> = match self {
            Command::Set { key, value } => vec![key.clone(), value.to_string()],
            Command::Get { key }
            | Command::LPop { key }
            | Command::RPop { key }
            | Command::SMembers { key } => vec![key.clone()],
            Command::LPush { key, values } | Command::RPush { key, values } => {
                vec![key.clone(), values.join(" ")]
            }
            Command::SAdd { key, members } => vec![key.clone(), members.join(" ")],
            Command::HSet { key, field, value } => vec![key.clone(), field.clone(), value.clone()],
            Command::HGet { key, field } => vec![key.clone(), field.clone()],
            Command::Subscribe { channel } => vec![channel.clone()],
            Command::Publish { channel, message } => vec![channel.clone(), message.clone()],
            Command::PublishJson { channel, data } => vec![channel.clone(), data.to_string()],
            Command::PublishInt { channel, value } => vec![channel.clone(), value.to_string()],
            Command::PublishBin { channel, data } => vec![channel.clone(), STANDARD.encode(data)],
            Command::PublishArray { channel, items } => {
                vec![channel.clone(), serde_json::Value::Array(items.clone()).to_string()]
            }
            Command::Raw { line } => {
                buf.put_slice(line.trim().as_bytes());
                buf.put_u8(b'\n');
                return Ok(());
            }
        };

        buf.put_slice(self.name().as_bytes());
        for arg in &args {
            buf.put_u8(b' ');
            buf.put_slice(arg.as_bytes());
        }
        buf.put_u8(b'\n');
        Ok(())
    }

    fn validate(&self) -> ProtocolResult<()> {
        match self {
            Command::Set { key, value } => {
                check_token("key", key)?;
                match value {
                    Value::Text(s) => check_text("value", s),
                    Value::Float(x) if !x.is_finite() => {
                        Err(ProtocolError::invalid("value", "float must be finite"))
                    }
                    _ => Ok(()),
                }
            }
            Command::Get { key }
            | Command::LPop { key }
            | Command::RPop { key }
            | Command::SMembers { key } => check_token("key", key),
            Command::LPush { key, values } | Command::RPush { key, values } => {
                check_token("key", key)?;
                check_members(self.name(), key, "values", values)
            }
            Command::SAdd { key, members } => {
                check_token("key", key)?;
                check_members(self.name(), key, "members", members)
            }
            Command::HSet { key, field, value } => {
                check_token("key", key)?;
                check_token("field", field)?;
                check_text("value", value)
            }
            Command::HGet { key, field } => {
                check_token("key", key)?;
                check_token("field", field)
            }
            Command::Subscribe { channel }
            | Command::PublishJson { channel, .. }
            | Command::PublishInt { channel, .. }
            | Command::PublishBin { channel, .. }
            | Command::PublishArray { channel, .. } => check_token("channel", channel),
            Command::Publish { channel, message } => {
                check_token("channel", channel)?;
                check_text("message", message)
            }
            Command::Raw { line } => {
                if line.trim().is_empty() {
                    return Err(ProtocolError::MissingArgument("command".into()));
                }
                check_text("line", line.trim())
            }
        }
    }
}

/// Keys, fields and channels are positional tokens
fn check_token(name: &str, value: &str) -> ProtocolResult<()> {
    if value.is_empty() {
        return Err(ProtocolError::MissingArgument(name.into()));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ProtocolError::invalid(name, "must not contain whitespace"));
    }
    Ok(())
}

fn check_text(name: &str, value: &str) -> ProtocolResult<()> {
    if value.contains(|c| c == '\n' || c == '\r') {
        return Err(ProtocolError::invalid(name, "must not contain line breaks"));
    }
    Ok(())
}

fn check_members(command: &str, key: &str, name: &str, members: &[String]) -> ProtocolResult<()> {
    if members.is_empty() {
        return Err(ProtocolError::MissingArgument(name.into()));
    }
    for member in members {
        check_text(name, member)?;
        if member.is_empty() || member.chars().any(char::is_whitespace) {
            // Members are joined unescaped; the server will split this one.
            warn!(command, key, member = %member, "Member is empty or contains whitespace");
        }
    }
    Ok(())
}
