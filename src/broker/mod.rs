//! Channel broker.
//!
//! # Data Flow
//! ```text
//! loopback publish endpoint
//!     → Broker::publish(channel, payload)
//!     → channel.rs (sequence++, fan-out under the channel's lock)
//!     → long-poll subscribers: one message, then leave the set
//!     → event-stream subscribers: bounded queue, stay in the set
//!
//! subscribe paths (any public endpoint)
//!     → Broker::subscribe(channel, mode) → Subscription
//!     → handler awaits the Subscription
//!     → drop (disconnect / completion) → release → lazy channel removal
//! ```
//!
//! # Design Decisions
//! - Channels are created on first subscribe and removed once empty
//! - Nothing is buffered: a publish with no subscribers is discarded
//! - Lock order is map shard, then channel; publish never holds both
//! - Publish never awaits a subscriber; a full queue disconnects it

pub mod channel;
pub mod subscription;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::config::BrokerConfig;
use crate::observability::metrics;
use channel::{Channel, Sink, Subscriber};
use subscription::{Inbox, LivenessCell, Liveness};

pub use channel::{ChannelInfo, Message};
pub use subscription::{DeliveryMode, PollOutcome, Subscription, SubscriptionId};

/// What happened to one published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub channel: String,
    /// Sequence assigned to the message; 0 when the channel did not exist.
    pub sequence: u64,
    pub subscribers: usize,
    /// 0 means the message was discarded.
    pub delivered: usize,
}

struct BrokerInner {
    channels: DashMap<String, Arc<Channel>>,
    stream_queue_depth: usize,
    subscriptions: AtomicUsize,
    closing: AtomicBool,
}

/// Shared handle to the channel map.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("channels", &self.channel_count())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Broker {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                channels: DashMap::new(),
                stream_queue_depth: config.stream_queue_depth.max(1),
                subscriptions: AtomicUsize::new(0),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Register a subscriber on `channel`, creating the channel if needed.
    ///
    /// After [`Broker::shutdown`] the returned subscription is already closed.
    pub fn subscribe(&self, channel: &str, mode: DeliveryMode) -> Subscription {
        let id = SubscriptionId::new();
        let liveness = Arc::new(LivenessCell::default());

        let (sink, inbox) = match mode {
            DeliveryMode::LongPoll => {
                let (tx, rx) = oneshot::channel();
                (Sink::LongPoll(Some(tx)), Inbox::LongPoll(Some(rx)))
            }
            DeliveryMode::EventStream => {
                let (tx, rx) = mpsc::channel(self.inner.stream_queue_depth);
                (Sink::Stream(tx), Inbox::Stream(rx))
            }
        };
        let subscriber = Subscriber {
            mode,
            sink,
            liveness: Arc::clone(&liveness),
        };

        {
            // The shard stays locked while the subscriber goes in, so the
            // channel cannot be collected between lookup and insert.
            let entry = self
                .inner
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| Arc::new(Channel::new(channel)));
            if self.inner.closing.load(Ordering::SeqCst) {
                liveness.advance(Liveness::Draining);
            } else {
                entry.value().insert(id, subscriber);
                let active = self.inner.subscriptions.fetch_add(1, Ordering::SeqCst) + 1;
                metrics::set_active_subscriptions(active);
            }
        }
        if self.inner.closing.load(Ordering::SeqCst) {
            self.collect(channel);
        }
        metrics::set_channels(self.channel_count());

        tracing::debug!(channel = %channel, subscription = %id, mode = %mode, "Subscribed");
        Subscription::new(id, channel.to_string(), mode, liveness, inbox, self.clone())
    }

    /// Publish to every subscriber registered on `channel` right now.
    ///
    /// Publishing to a channel nobody references discards the message
    /// without creating the channel.
    pub fn publish(&self, channel: &str, payload: Bytes, content_type: Option<String>) -> PublishReceipt {
        let target = self.inner.channels.get(channel).map(|c| Arc::clone(c.value()));

        let fanout = match target {
            Some(target) => target.publish(payload, content_type),
            None => channel::Fanout::default(),
        };
        if fanout.removed > 0 {
            self.forget(fanout.removed);
            self.collect(channel);
        }

        metrics::record_published(fanout.delivered);
        if fanout.delivered == 0 {
            tracing::debug!(channel = %channel, "No live subscribers, message discarded");
        } else {
            tracing::debug!(
                channel = %channel,
                sequence = fanout.sequence,
                delivered = fanout.delivered,
                "Message published"
            );
        }

        PublishReceipt {
            channel: channel.to_string(),
            sequence: fanout.sequence,
            subscribers: fanout.subscribers,
            delivered: fanout.delivered,
        }
    }

    /// Current state of a channel, without creating it.
    pub fn channel_info(&self, channel: &str) -> ChannelInfo {
        match self.inner.channels.get(channel) {
            Some(entry) => entry.value().info(),
            None => ChannelInfo {
                channel: channel.to_string(),
                subscribers: 0,
                sequence: 0,
            },
        }
    }

    /// End every subscription on a channel and drop it. Returns how many ended.
    pub fn close_channel(&self, channel: &str) -> usize {
        let closed = match self.inner.channels.remove(channel) {
            Some((_, target)) => target.close(),
            None => 0,
        };
        self.forget(closed);
        metrics::set_channels(self.channel_count());
        if closed > 0 {
            tracing::info!(channel = %channel, subscriptions = closed, "Channel closed");
        }
        closed
    }

    /// Close every channel and refuse new registrations.
    pub fn shutdown(&self) -> usize {
        self.inner.closing.store(true, Ordering::SeqCst);
        let mut closed = 0;
        self.inner.channels.retain(|_, target| {
            closed += target.close();
            false
        });
        self.forget(closed);
        metrics::set_channels(0);
        tracing::info!(subscriptions = closed, "Broker shut down");
        closed
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.load(Ordering::SeqCst)
    }

    /// Remove a subscription from its channel. Safe to call more than once.
    pub(crate) fn release(&self, channel: &str, id: SubscriptionId) {
        let removed = self
            .inner
            .channels
            .get(channel)
            .map(|c| Arc::clone(c.value()))
            .is_some_and(|target| target.remove(id));
        if removed {
            self.forget(1);
            tracing::debug!(channel = %channel, subscription = %id, "Unsubscribed");
        }
        self.collect(channel);
    }

    /// Drop the channel if it is idle.
    fn collect(&self, channel: &str) {
        if self
            .inner
            .channels
            .remove_if(channel, |_, target| target.is_idle())
            .is_some()
        {
            metrics::set_channels(self.channel_count());
        }
    }

    fn forget(&self, count: usize) {
        if count == 0 {
            return;
        }
        let previous = self
            .inner
            .subscriptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(count)))
            .unwrap_or(0);
        metrics::set_active_subscriptions(previous.saturating_sub(count));
    }
}
