//! Subscription handles.
//!
//! A [`Subscription`] is the subscriber side of one registration in a channel's
//! set. It is owned by the request handling task; dropping it (client
//! disconnect, handler completion) removes the registration.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::channel::Message;
use super::Broker;

static SUBSCRIPTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(SUBSCRIPTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// How messages reach a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One message, then the request completes.
    LongPoll,
    /// Every message for as long as the connection stays open.
    EventStream,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMode::LongPoll => "long_poll",
            DeliveryMode::EventStream => "event_stream",
        }
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Registered in its channel; receives every publish.
    Active,
    /// Out of the channel's set, but messages may still be in hand.
    Draining,
    /// Finished.
    Closed,
}

/// Liveness shared between the channel entry and the handle.
#[derive(Debug, Default)]
pub(crate) struct LivenessCell(AtomicU8);

impl LivenessCell {
    pub(crate) fn get(&self) -> Liveness {
        match self.0.load(Ordering::Acquire) {
            0 => Liveness::Active,
            1 => Liveness::Draining,
            _ => Liveness::Closed,
        }
    }

    /// Move forward only; a closed subscription never becomes draining again.
    pub(crate) fn advance(&self, to: Liveness) {
        let to = match to {
            Liveness::Active => 0,
            Liveness::Draining => 1,
            Liveness::Closed => 2,
        };
        self.0.fetch_max(to, Ordering::AcqRel);
    }
}

pub(crate) enum Inbox {
    LongPoll(Option<oneshot::Receiver<Arc<Message>>>),
    Stream(mpsc::Receiver<Arc<Message>>),
}

/// Result of waiting on a long-poll subscription.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Message(Arc<Message>),
    TimedOut,
    /// The channel was closed or the broker is shutting down.
    Closed,
}

/// The subscriber side of a channel registration.
pub struct Subscription {
    id: SubscriptionId,
    channel: String,
    mode: DeliveryMode,
    created: Instant,
    liveness: Arc<LivenessCell>,
    inbox: Inbox,
    broker: Broker,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("mode", &self.mode)
            .field("liveness", &self.liveness())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        channel: String,
        mode: DeliveryMode,
        liveness: Arc<LivenessCell>,
        inbox: Inbox,
        broker: Broker,
    ) -> Self {
        Self {
            id,
            channel,
            mode,
            created: Instant::now(),
            liveness,
            inbox,
            broker,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.get()
    }

    /// Next message, or `None` once the subscription can deliver no more.
    ///
    /// A long-poll subscription yields at most one message.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        let message = match &mut self.inbox {
            Inbox::LongPoll(slot) => match slot.take() {
                Some(rx) => rx.await.ok(),
                None => None,
            },
            Inbox::Stream(rx) => rx.recv().await,
        };
        if message.is_none() || self.mode == DeliveryMode::LongPoll {
            self.liveness.advance(Liveness::Closed);
        }
        message
    }

    /// Wait for one message, giving up after `idle`.
    pub async fn poll(mut self, idle: Duration) -> PollOutcome {
        match tokio::time::timeout(idle, self.recv()).await {
            Ok(Some(message)) => PollOutcome::Message(message),
            Ok(None) => PollOutcome::Closed,
            Err(_) => PollOutcome::TimedOut,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.release(&self.channel, self.id);
        self.liveness.advance(Liveness::Closed);
    }
}
