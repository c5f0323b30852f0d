//! Typed client facade

use std::sync::Arc;

use bytes::Bytes;
use imdb_protocol::{Command, Payload, ProtocolError, Response, Value};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::{ClientError, ClientResult};
use crate::router::Subscription;

/// Client for one imdb server connection.
///
/// All methods take `&self`; share a client between tasks with `Arc`.
/// Requests from concurrent callers are pipelined on the single socket and
/// each caller receives exactly the reply to its own command.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Create a disconnected client
    pub fn new(config: ClientConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Create a client and connect it
    pub async fn connect_with(config: ClientConfig) -> ClientResult<Self> {
        let client = Self::new(config);
        client.connect().await?;
        Ok(client)
    }

    /// Run the client over an already established stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_stream<S>(stream: S, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let client = Self::new(config);
        client.conn.attach(stream);
        client
    }

    /// Open the TCP connection. Only valid from `Disconnected`.
    pub async fn connect(&self) -> ClientResult<()> {
        self.conn.begin_connect()?;

        let config = self.conn.config();
        let addr = config.addr();
        info!(addr = %addr, "Connecting");

        let connecting = TcpStream::connect(addr.as_str());
        let result = match config.connect_timeout {
            Some(after) => match tokio::time::timeout(after, connecting).await {
                Ok(result) => result.map_err(|source| ClientError::Connect {
                    addr: addr.clone(),
                    source,
                }),
                Err(_) => Err(ClientError::ConnectTimeout {
                    addr: addr.clone(),
                    after,
                }),
            },
            None => connecting.await.map_err(|source| ClientError::Connect {
                addr: addr.clone(),
                source,
            }),
        };

        match result {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(error = %e, "Failed to set TCP_NODELAY");
                }
                self.conn.attach(stream);
                Ok(())
            }
            Err(e) => {
                warn!(addr = %addr, error = %e, "Connect failed");
                self.conn.abort_connect();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn config(&self) -> &ClientConfig {
        self.conn.config()
    }

    /// Requests awaiting a reply, including ones whose caller timed out
    pub fn pending(&self) -> usize {
        self.conn.pending()
    }

    /// Close the connection. Outstanding requests fail with
    /// [`ClientError::Connection`]; later calls fail with `NotConnected`.
    pub fn close(&self) {
        self.conn.shutdown("closed by client");
    }

    /// Send any command and return its raw reply line
    pub async fn execute(&self, command: Command) -> ClientResult<Response> {
        self.conn.request(&command).await
    }

    // ---- Strings ----

    pub async fn set(&self, key: &str, value: impl Into<Value>) -> ClientResult<bool> {
        Ok(self.execute(Command::set(key, value)).await?.is_ok())
    }

    pub async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.execute(Command::get(key)).await?.into_optional())
    }

    // ---- Lists ----

    /// Returns the count reported by the server
    pub async fn lpush<I, S>(&self, key: &str, values: I) -> ClientResult<i64>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.execute(Command::lpush(key, values)).await?.count())
    }

    pub async fn rpush<I, S>(&self, key: &str, values: I) -> ClientResult<i64>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.execute(Command::rpush(key, values)).await?.count())
    }

    pub async fn lpop(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.execute(Command::lpop(key)).await?.into_optional())
    }

    pub async fn rpop(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.execute(Command::rpop(key)).await?.into_optional())
    }

    // ---- Sets ----

    pub async fn sadd<I, S>(&self, key: &str, members: I) -> ClientResult<i64>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.execute(Command::sadd(key, members)).await?.count())
    }

    /// `None` when the set does not exist
    pub async fn smembers(&self, key: &str) -> ClientResult<Option<Vec<String>>> {
        Ok(self.execute(Command::smembers(key)).await?.into_members())
    }

    // ---- Hashes ----

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> ClientResult<bool> {
        Ok(self.execute(Command::hset(key, field, value)).await?.is_ok())
    }

    pub async fn hget(&self, key: &str, field: &str) -> ClientResult<Option<String>> {
        Ok(self.execute(Command::hget(key, field)).await?.into_optional())
    }

    // ---- Pub/Sub ----

    /// Register `callback` for pushes on `channel`, then send SUBSCRIBE.
    ///
    /// The callback is in place before the command goes out, so nothing
    /// published right after the acknowledgment is missed. If the command
    /// fails the registration is removed again.
    pub async fn subscribe<F>(&self, channel: &str, callback: F) -> ClientResult<Subscription>
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let command = Command::subscribe(channel);
        // Reject malformed channels before touching the registry
        command.encode()?;

        let subscription = self.conn.router().subscribe(channel, callback);
        match self.execute(command).await {
            Ok(ack) => {
                if !ack.is_ok() {
                    warn!(channel, ack = %ack, "Unexpected SUBSCRIBE acknowledgment");
                }
                info!(channel, id = subscription.id(), "Subscribed");
                Ok(subscription)
            }
            Err(e) => {
                self.conn.router().unsubscribe(&subscription);
                Err(e)
            }
        }
    }

    /// Register a callback without sending SUBSCRIBE, for channels the
    /// server already delivers on this connection
    pub fn subscribe_local<F>(&self, channel: &str, callback: F) -> Subscription
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.conn.router().subscribe(channel, callback)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.conn.router().subscriber_count(channel)
    }

    /// Stop delivering to one callback. Local only: the server keeps
    /// sending pushes for the channel, which are then discarded.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.conn.router().unsubscribe(subscription)
    }

    pub async fn publish(&self, channel: &str, message: &str) -> ClientResult<bool> {
        Ok(self.execute(Command::publish(channel, message)).await?.is_ok())
    }

    /// Same wire command as [`publish`](Self::publish)
    pub async fn publish_string(&self, channel: &str, message: &str) -> ClientResult<bool> {
        self.publish(channel, message).await
    }

    pub async fn publish_json<T>(&self, channel: &str, data: &T) -> ClientResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let data = to_json("data", data)?;
        Ok(self.execute(Command::publish_json(channel, data)).await?.is_ok())
    }

    pub async fn publish_int(&self, channel: &str, value: i64) -> ClientResult<bool> {
        Ok(self.execute(Command::publish_int(channel, value)).await?.is_ok())
    }

    /// Sent base64-encoded
    pub async fn publish_binary(&self, channel: &str, data: impl Into<Bytes>) -> ClientResult<bool> {
        Ok(self.execute(Command::publish_bin(channel, data)).await?.is_ok())
    }

    pub async fn publish_array<T>(&self, channel: &str, items: &[T]) -> ClientResult<bool>
    where
        T: Serialize,
    {
        let items = items
            .iter()
            .map(|item| to_json("items", item))
            .collect::<ClientResult<Vec<_>>>()?;
        Ok(self.execute(Command::publish_array(channel, items)).await?.is_ok())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.conn.state() != ConnectionState::Disconnected {
            self.conn.shutdown("client dropped");
        }
    }
}

fn to_json<T: Serialize + ?Sized>(name: &str, data: &T) -> ClientResult<serde_json::Value> {
    serde_json::to_value(data).map_err(|e| {
        ClientError::Encoding(ProtocolError::InvalidArgument {
            name: name.to_string(),
            reason: e.to_string(),
        })
    })
}
