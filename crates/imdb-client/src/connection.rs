//! Connection lifecycle and the read / write tasks
//!
//! One socket per client. The read half is owned by a task that splits the
//! inbound stream into lines and sends each one through the router and then
//! the correlator. The write half is owned by a second task draining an
//! unbounded channel, so a line is either written whole or not at all.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use imdb_protocol::{Command, LineDecoder, MessageType, Response};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::correlator::{Resolution, ResponseCorrelator};
use crate::error::{ClientError, ClientResult};
use crate::router::{PubSubRouter, Route};

/// Transport state of a [`Client`](crate::Client)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: the transport closed or failed
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct Link {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<BytesMut>>,
}

pub(crate) struct Connection {
    config: ClientConfig,
    link: Mutex<Link>,
    correlator: ResponseCorrelator,
    router: PubSubRouter,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            correlator: ResponseCorrelator::new(config.max_pending),
            router: PubSubRouter::new(config.binary_decoding),
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
                outbound: None,
            }),
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn router(&self) -> &PubSubRouter {
        &self.router
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.link.lock().state
    }

    pub(crate) fn pending(&self) -> usize {
        self.correlator.len()
    }

    /// Disconnected -> Connecting
    pub(crate) fn begin_connect(&self) -> ClientResult<()> {
        let mut link = self.link.lock();
        match link.state {
            ConnectionState::Disconnected => {
                link.state = ConnectionState::Connecting;
                Ok(())
            }
            other => Err(ClientError::InvalidState(other)),
        }
    }

    /// Connecting -> Disconnected, after a failed attempt
    pub(crate) fn abort_connect(&self) {
        let mut link = self.link.lock();
        if link.state == ConnectionState::Connecting {
            link.state = ConnectionState::Disconnected;
        }
    }

    /// Take ownership of an established stream and start the I/O tasks
    pub(crate) fn attach<S>(self: &Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut link = self.link.lock();
            link.state = ConnectionState::Connected;
            link.outbound = Some(tx);
        }
        info!(addr = %self.config.addr(), "Connected");

        // Spawned after the state change so an immediate EOF still ends in Closed
        let read_task = tokio::spawn(self.clone().read_loop(reader));
        let write_task = tokio::spawn(self.clone().write_loop(writer, rx));
        self.tasks.lock().extend([read_task, write_task]);
    }

    /// Send one command and wait for its reply line
    pub(crate) async fn request(&self, command: &Command) -> ClientResult<Response> {
        let mut frame = BytesMut::new();
        command.encode_into(&mut frame)?;
        let name = command.name().to_string();

        // Enqueue and hand-off under one lock: queue order is wire order
        let (seq, mut reply) = {
            let link = self.link.lock();
            let outbound = match (link.state, &link.outbound) {
                (ConnectionState::Connected, Some(outbound)) => outbound,
                (state, _) => return Err(ClientError::NotConnected(state)),
            };
            let (seq, reply) = self.correlator.enqueue(&name)?;
            if outbound.send(frame).is_err() {
                self.correlator.expire(seq);
                return Err(ClientError::Connection("writer stopped".into()));
            }
            (seq, reply)
        };
        debug!(command = %name, seq, "Request sent");
        self.observe(Observation::Pending(self.correlator.len()));

        let started = Instant::now();
        let outcome = match self.config.request_timeout {
            Some(after) => match tokio::time::timeout(after, &mut reply).await {
                Ok(outcome) => outcome.ok(),
                // Resolved between the deadline and the expiry
                Err(_) if !self.correlator.expire(seq) => reply.try_recv().ok(),
                Err(_) => {
                    warn!(command = %name, seq, after = ?after, "Request timed out");
                    self.observe(Observation::Timeout);
                    return Err(ClientError::Timeout {
                        command: name,
                        after,
                    });
                }
            },
            None => reply.await.ok(),
        };

        let response = outcome
            .ok_or_else(|| ClientError::Connection("connection dropped before reply".into()))??;
        debug!(command = %name, seq, elapsed = ?started.elapsed(), "Reply received");

        self.observe(Observation::Command {
            name: &name,
            elapsed: started.elapsed(),
        });

        Ok(response)
    }

    /// Move to Closed and fail everything in flight. Idempotent.
    pub(crate) fn shutdown(&self, reason: &str) {
        let previous = {
            let mut link = self.link.lock();
            link.outbound = None;
            std::mem::replace(&mut link.state, ConnectionState::Closed)
        };

        let failed = self.correlator.fail_all(reason);
        self.observe(Observation::Pending(0));

        if previous != ConnectionState::Closed {
            info!(reason, failed, "Connection closed");
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    async fn read_loop<R>(self: Arc<Self>, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut decoder = LineDecoder::with_max_line_length(self.config.max_line_length);
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];

        let reason = loop {
            match reader.read(&mut buf).await {
                Ok(0) => break "connection closed by server".to_string(),
                Ok(n) => {
                    if let Err(e) = decoder.feed(&buf[..n]) {
                        error!(error = %e, "Fatal framing error");
                        self.observe(Observation::Anomaly("line_too_long"));
                        break e.to_string();
                    }
                    while let Some(line) = decoder.next_line() {
                        self.handle_line(line);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Read error");
                    break format!("read error: {}", e);
                }
            }
        };

        if let Some(tail) = decoder.finish() {
            warn!(tail = %tail, "Discarding unterminated data at end of stream");
        }
        self.shutdown(&reason);
    }

    async fn write_loop<W>(self: Arc<Self>, mut writer: W, mut outbound: mpsc::UnboundedReceiver<BytesMut>)
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(frame) = outbound.recv().await {
            let written = match writer.write_all(&frame).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                error!(error = %e, "Write error");
                self.shutdown(&format!("write error: {}", e));
                return;
            }
        }

        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Write half shutdown failed");
        }
    }

    fn handle_line(&self, line: String) {
        match self.router.route(line) {
            Route::Response(line) => {
                if self.correlator.resolve_next(line) == Resolution::Orphaned {
                    self.observe(Observation::Anomaly("orphan_response"));
                }
                self.observe(Observation::Pending(self.correlator.len()));
            }
            Route::Dispatched { message_type, .. } => self.observe(Observation::Push(message_type)),
            Route::Dropped(_) => self.observe(Observation::Anomaly("bad_envelope")),
        }
    }

    #[cfg(feature = "metrics")]
    fn observe(&self, observation: Observation<'_>) {
        let Some(metrics) = &self.config.metrics else {
            return;
        };
        match observation {
            Observation::Command { name, elapsed } => {
                metrics.record_command(name, elapsed.as_secs_f64())
            }
            Observation::Timeout => metrics.record_timeout(),
            Observation::Pending(pending) => metrics.set_pending(pending),
            Observation::Push(message_type) => metrics.record_push(message_type.as_str()),
            Observation::Anomaly(kind) => metrics.record_anomaly(kind),
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn observe(&self, _observation: Observation<'_>) {}
}

/// Events fed to the optional metrics collectors
#[cfg_attr(not(feature = "metrics"), allow(dead_code))]
enum Observation<'a> {
    Command { name: &'a str, elapsed: Duration },
    Timeout,
    Pending(usize),
    Push(MessageType),
    Anomaly(&'static str),
}
