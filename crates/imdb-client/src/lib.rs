//! Async client for the imdb key-value / pub-sub server
//!
//! One TCP connection carries both request/reply traffic and push
//! notifications. Replies are matched to requests purely by order; push
//! lines (`Message <channel> <envelope>`) are routed to the callbacks
//! registered for their channel.
//!
//! ```no_run
//! use imdb_client::{Client, ClientConfig};
//!
//! # async fn run() -> imdb_client::ClientResult<()> {
//! let client = Client::connect_with(ClientConfig::new("127.0.0.1", 6379)).await?;
//!
//! client.set("greeting", "Hello, World!").await?;
//! assert_eq!(client.get("greeting").await?.as_deref(), Some("Hello, World!"));
//!
//! client
//!     .subscribe("news", |payload| println!("news: {}", payload))
//!     .await?;
//! client.publish_int("news", 42).await?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod router;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use client::Client;
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use correlator::{Resolution, ResponseCorrelator};
pub use error::{ClientError, ClientResult};
pub use router::{Callback, PubSubRouter, Route, Subscription};

#[cfg(feature = "metrics")]
pub use metrics::ClientMetrics;

pub use imdb_protocol::{BinaryDecoding, Command, MessageType, Payload, Response, Value};
