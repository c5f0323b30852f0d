//! imdb wire protocol
//!
//! A newline-delimited ASCII protocol spoken by the imdb key-value / pub-sub
//! server.
//!
//! ## Command Format
//! ```text
//! COMMAND <arg> [<arg> ...]\n
//! ```
//!
//! ## Reply Format
//! ```text
//! OK                                           # Success
//! (nil)                                        # Absent value
//! 3                                            # Count
//! apple banana orange                          # Space-joined members
//! ```
//!
//! ## Push Format
//! ```text
//! Message <channel> {"Type": <0..4>, "Content": <value>}
//! ```

pub mod command;
pub mod decoder;
pub mod error;
pub mod message;
pub mod response;

pub use command::{Command, Value};
pub use decoder::{LineDecoder, Lines};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{BinaryDecoding, Envelope, MessageType, Payload, PushLine, PushMessage, PUSH_PREFIX};
pub use response::{Response, NIL, OK};
