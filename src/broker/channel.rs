//! Per-channel subscriber sets.
//!
//! Each channel guards its own subscriber set and sequence counter with its
//! own mutex, so traffic on one channel never waits on another. Fan-out runs
//! entirely inside that exclusive section and never awaits: long-poll
//! subscribers get a oneshot send, event-stream subscribers a `try_send` into
//! their bounded queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use super::subscription::{DeliveryMode, LivenessCell, Liveness, SubscriptionId};
use crate::observability::metrics;

/// One published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Position in the channel's publish order, starting at 1.
    pub sequence: u64,
    pub payload: Bytes,
    /// Publisher's media type, echoed on long-poll deliveries.
    pub content_type: Option<String>,
}

pub(crate) enum Sink {
    LongPoll(Option<oneshot::Sender<Arc<Message>>>),
    Stream(mpsc::Sender<Arc<Message>>),
}

pub(crate) struct Subscriber {
    pub(crate) mode: DeliveryMode,
    pub(crate) sink: Sink,
    pub(crate) liveness: Arc<LivenessCell>,
}

#[derive(Default)]
struct ChannelState {
    sequence: u64,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fanout {
    pub sequence: u64,
    /// Subscribers registered at the instant of publish.
    pub subscribers: usize,
    /// Subscribers that accepted the message.
    pub delivered: usize,
    /// Subscribers that left the set during this fan-out.
    pub removed: usize,
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub channel: String,
    pub subscribers: usize,
    pub sequence: u64,
}

/// A named topic and its current subscribers.
pub struct Channel {
    id: String,
    state: Mutex<ChannelState>,
}

impl Channel {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(ChannelState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn insert(&self, id: SubscriptionId, subscriber: Subscriber) {
        self.lock().subscribers.insert(id, subscriber);
    }

    /// Remove one subscriber. Returns whether it was still registered.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        match self.lock().subscribers.remove(&id) {
            Some(subscriber) => {
                subscriber.liveness.advance(Liveness::Draining);
                true
            }
            None => false,
        }
    }

    /// No subscribers and nothing buffered.
    pub(crate) fn is_idle(&self) -> bool {
        self.lock().subscribers.is_empty()
    }

    pub fn info(&self) -> ChannelInfo {
        let state = self.lock();
        ChannelInfo {
            channel: self.id.clone(),
            subscribers: state.subscribers.len(),
            sequence: state.sequence,
        }
    }

    /// Offer a message to every subscriber registered right now.
    ///
    /// Long-poll subscribers are fulfilled and leave the set. Event-stream
    /// subscribers whose queue is full or gone are disconnected.
    pub(crate) fn publish(&self, payload: Bytes, content_type: Option<String>) -> Fanout {
        let mut state = self.lock();
        state.sequence += 1;
        let message = Arc::new(Message {
            sequence: state.sequence,
            payload,
            content_type,
        });

        let mut fanout = Fanout {
            sequence: state.sequence,
            subscribers: state.subscribers.len(),
            ..Fanout::default()
        };

        state.subscribers.retain(|id, subscriber| {
            let keep = match &mut subscriber.sink {
                Sink::LongPoll(slot) => {
                    if let Some(tx) = slot.take() {
                        if tx.send(Arc::clone(&message)).is_ok() {
                            fanout.delivered += 1;
                            metrics::record_delivery(subscriber.mode.as_str());
                        }
                    }
                    false
                }
                Sink::Stream(tx) => match tx.try_send(Arc::clone(&message)) {
                    Ok(()) => {
                        fanout.delivered += 1;
                        metrics::record_delivery(subscriber.mode.as_str());
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        tracing::info!(
                            channel = %self.id,
                            subscription = %id,
                            "Event-stream subscriber fell behind, disconnecting"
                        );
                        metrics::record_slow_consumer();
                        false
                    }
                    Err(TrySendError::Closed(_)) => false,
                },
            };
            if !keep {
                subscriber.liveness.advance(Liveness::Draining);
                fanout.removed += 1;
            }
            keep
        });

        fanout
    }

    /// End every subscription. Returns how many were registered.
    pub(crate) fn close(&self) -> usize {
        let drained: Vec<_> = self.lock().subscribers.drain().collect();
        for (_, subscriber) in &drained {
            subscriber.liveness.advance(Liveness::Draining);
        }
        // Senders drop here: long polls see a closed slot, streams reach their end.
        drained.len()
    }
}
