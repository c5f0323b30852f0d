//! Response correlation
//!
//! The server answers commands strictly in the order it received them, so
//! the only correlation key is position: the oldest outstanding request owns
//! the next reply line.
//!
//! A request whose caller gave up (timeout or dropped future) keeps its slot
//! in the queue. Its reply is still coming and must be consumed by that
//! slot; removing the slot would shift every later reply onto the wrong
//! request.

use std::collections::VecDeque;

use imdb_protocol::Response;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

type Completion = oneshot::Sender<ClientResult<Response>>;

/// Receiving side of an enqueued request
pub type PendingResponse = oneshot::Receiver<ClientResult<Response>>;

struct PendingRequest {
    seq: u64,
    command: String,
    /// `None` once the caller stopped waiting
    completion: Option<Completion>,
}

struct Queue {
    pending: VecDeque<PendingRequest>,
    next_seq: u64,
}

/// What became of a reply line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handed to the waiting caller
    Delivered { seq: u64 },
    /// Consumed by a slot whose caller already gave up
    Discarded { seq: u64 },
    /// Nothing was pending
    Orphaned,
}

/// FIFO of outstanding requests on one connection
pub struct ResponseCorrelator {
    queue: Mutex<Queue>,
    max_pending: usize,
}

impl ResponseCorrelator {
    pub fn new(max_pending: usize) -> Self {
        Self {
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                next_seq: 0,
            }),
            max_pending,
        }
    }

    /// Register a request. Must happen before its line is written.
    pub fn enqueue(&self, command: &str) -> ClientResult<(u64, PendingResponse)> {
        let mut queue = self.queue.lock();
        if queue.pending.len() >= self.max_pending {
            return Err(ClientError::TooManyPending {
                limit: self.max_pending,
            });
        }

        let seq = queue.next_seq;
        queue.next_seq += 1;

        let (tx, rx) = oneshot::channel();
        queue.pending.push_back(PendingRequest {
            seq,
            command: command.to_string(),
            completion: Some(tx),
        });
        Ok((seq, rx))
    }

    /// Complete the oldest pending request with `line`
    pub fn resolve_next(&self, line: String) -> Resolution {
        let Some(request) = self.queue.lock().pending.pop_front() else {
            warn!(line = %line, "Response with no pending request, dropping");
            return Resolution::Orphaned;
        };

        let seq = request.seq;
        match request.completion {
            Some(tx) => match tx.send(Ok(Response::new(line))) {
                Ok(()) => Resolution::Delivered { seq },
                Err(_) => {
                    debug!(seq, command = %request.command, "Caller went away, discarding response");
                    Resolution::Discarded { seq }
                }
            },
            None => {
                debug!(seq, command = %request.command, "Late response for expired request");
                Resolution::Discarded { seq }
            }
        }
    }

    /// Stop waiting on `seq` without giving up its queue slot.
    ///
    /// Returns false if the request was already resolved.
    pub fn expire(&self, seq: u64) -> bool {
        let mut queue = self.queue.lock();
        match queue.pending.iter_mut().find(|r| r.seq == seq) {
            Some(request) => request.completion.take().is_some(),
            None => false,
        }
    }

    /// Fail every outstanding request. Returns how many were waiting.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = self.queue.lock().pending.drain(..).collect();

        let mut failed = 0;
        for request in drained {
            if let Some(tx) = request.completion {
                if tx.send(Err(ClientError::Connection(reason.to_string()))).is_ok() {
                    failed += 1;
                }
            }
        }
        failed
    }

    /// Outstanding slots, expired ones included
    pub fn len(&self) -> usize {
        self.queue.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}
