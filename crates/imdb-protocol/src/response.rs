//! Plain reply lines
//!
//! The server has no typed reply framing: every reply is one line and its
//! meaning depends on the command that caused it.

use std::fmt;

use crate::message::parse_leading_integer;

/// Absence sentinel
pub const NIL: &str = "(nil)";

/// Success acknowledgment
pub const OK: &str = "OK";

/// One reply line, trimmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response(String);

impl Response {
    pub fn new(line: impl Into<String>) -> Self {
        Response(line.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_ok(&self) -> bool {
        self.0 == OK
    }

    pub fn is_nil(&self) -> bool {
        self.0 == NIL
    }

    /// `(nil)` becomes `None`, anything else the line itself
    pub fn into_optional(self) -> Option<String> {
        if self.is_nil() {
            None
        } else {
            Some(self.0)
        }
    }

    /// Leading base-10 integer of the line, 0 when there is none
    pub fn count(&self) -> i64 {
        parse_leading_integer(&self.0).unwrap_or(0)
    }

    /// Space-joined members; `(nil)` is `None`, never an empty list
    pub fn into_members(self) -> Option<Vec<String>> {
        self.into_optional()
            .map(|line| line.split_whitespace().map(str::to_string).collect())
    }
}

impl From<String> for Response {
    fn from(line: String) -> Self {
        Response(line)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
