//! Push routing
//!
//! Every inbound line passes through [`PubSubRouter::route`] first. Push
//! lines are decoded and fanned out to the callbacks registered for their
//! channel; everything else goes back to the caller as a plain reply.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use imdb_protocol::{BinaryDecoding, MessageType, Payload, ProtocolError, PushLine, PushMessage};
use tracing::{debug, error, trace, warn};

/// Subscriber callback
pub type Callback = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Handle returned by a subscribe, used to remove that one callback
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    channel: String,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

struct Subscriber {
    id: u64,
    callback: Callback,
}

/// Where an inbound line went
#[derive(Debug)]
pub enum Route {
    /// Not a push; belongs to the oldest pending request
    Response(String),
    /// Push handed to `delivered` callbacks
    Dispatched {
        channel: String,
        message_type: MessageType,
        delivered: usize,
    },
    /// Push whose envelope could not be decoded
    Dropped(ProtocolError),
}

/// Channel name to subscriber registry
pub struct PubSubRouter {
    channels: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
    binary: BinaryDecoding,
}

impl PubSubRouter {
    pub fn new(binary: BinaryDecoding) -> Self {
        Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
            binary,
        }
    }

    /// Register `callback` for `channel`. Callbacks on one channel run in
    /// registration order.
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> Subscription
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        debug!(channel, id, "Subscriber registered");

        Subscription {
            id,
            channel: channel.to_string(),
        }
    }

    /// Remove one callback. Returns false if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut removed = false;
        if let Some(mut subscribers) = self.channels.get_mut(&subscription.channel) {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != subscription.id);
            removed = subscribers.len() != before;
        }
        self.channels
            .remove_if(&subscription.channel, |_, subscribers| subscribers.is_empty());
        removed
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|s| s.len()).unwrap_or(0)
    }

    /// Channels with at least one subscriber
    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Classify one inbound line, dispatching it if it is a push
    pub fn route(&self, line: String) -> Route {
        let decoded = match PushLine::parse(&line) {
            Some(push) => push.decode(self.binary),
            None => return Route::Response(line),
        };

        match decoded {
            Ok(message) => {
                let delivered = self.dispatch(&message);
                trace!(channel = %message.channel, delivered, "Push dispatched");
                Route::Dispatched {
                    message_type: message.payload.message_type(),
                    channel: message.channel,
                    delivered,
                }
            }
            Err(e) => {
                warn!(error = %e, line = %line, "Undecodable push message, dropping");
                Route::Dropped(e)
            }
        }
    }

    /// Invoke every callback for the message's channel. A panicking callback
    /// is logged and does not stop the others.
    pub fn dispatch(&self, message: &PushMessage) -> usize {
        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking
        let callbacks: Vec<Callback> = match self.channels.get(&message.channel) {
            Some(subscribers) => subscribers.iter().map(|s| s.callback.clone()).collect(),
            None => {
                debug!(channel = %message.channel, "No subscribers for channel");
                return 0;
            }
        };

        let mut delivered = 0;
        for callback in callbacks {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(&message.payload)));
            match result {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(channel = %message.channel, reason = %reason, "Subscriber callback panicked");
                }
            }
        }
        delivered
    }
}
