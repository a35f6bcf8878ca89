//! Multi-subscriber publish points for the feedback and state streams.
//!
//! Each subscriber owns a bounded FIFO queue. `publish` takes a snapshot of
//! the registry, releases the registry lock and then pushes into each queue,
//! so subscribers can come and go while a publish is running. It never waits:
//! a full queue applies the channel's [`OverflowPolicy`] and bumps the
//! subscriber's dropped counter.
//!
//! Subscriptions only see messages published after `subscribe` returned;
//! there is no replay.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Default per-subscriber queue length.
pub const DEFAULT_CAPACITY: usize = 256;

// ── OverflowPolicy ───────────────────────────────────────────────

/// What a full subscriber queue does with a new message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    #[default]
    DropOldest,
    /// Discard the incoming message.
    DropNewest,
}

/// Identifies one subscription within its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

// ── Queue ────────────────────────────────────────────────────────

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

struct Queue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> Queue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                closed: false,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` when the queue is closed.
    fn push(&self, item: T, capacity: usize, policy: OverflowPolicy) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        if state.items.len() >= capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match policy {
                OverflowPolicy::DropOldest => {
                    state.items.pop_front();
                }
                OverflowPolicy::DropNewest => return true,
            }
        }
        state.items.push_back(item);
        drop(state);
        self.notify.notify_one();
        true
    }

    fn close(&self, discard: bool) {
        let mut state = self.lock();
        state.closed = true;
        if discard {
            state.items.clear();
        }
        drop(state);
        self.notify.notify_one();
    }
}

// ── Registry ─────────────────────────────────────────────────────

struct Registry<T> {
    name: &'static str,
    subscribers: RwLock<HashMap<SubscriptionId, Arc<Queue<T>>>>,
    next_id: AtomicU64,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> Registry<T> {
    fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match removed {
            Some(queue) => {
                queue.close(true);
                true
            }
            None => false,
        }
    }
}

impl<T> Drop for Registry<T> {
    fn drop(&mut self) {
        let subscribers = self
            .subscribers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        // Subscribers may still drain what was queued before the channel went away.
        for queue in subscribers.values() {
            queue.close(false);
        }
    }
}

// ── BroadcastChannel ─────────────────────────────────────────────

/// A cloneable handle to one publish point.
pub struct BroadcastChannel<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for BroadcastChannel<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> fmt::Debug for BroadcastChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastChannel")
            .field("name", &self.registry.name)
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.registry.capacity)
            .field("policy", &self.registry.policy)
            .finish()
    }
}

impl<T> BroadcastChannel<T> {
    /// `capacity` is clamped to at least one message.
    pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            registry: Arc::new(Registry {
                name,
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                policy,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.registry.name
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.registry.policy
    }

    /// Register a new subscriber. It receives only later publishes.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = SubscriptionId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(Queue::new(self.registry.capacity));
        self.registry
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&queue));

        tracing::trace!(channel = self.registry.name, id = id.0, "subscribed");
        Subscription {
            id,
            queue,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: Clone> BroadcastChannel<T> {
    /// Deliver `item` to every current subscriber without waiting.
    ///
    /// Returns how many subscribers accepted it into their queue.
    pub fn publish(&self, item: T) -> usize {
        let snapshot: Vec<Arc<Queue<T>>> = self
            .registry
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let (capacity, policy) = (self.registry.capacity, self.registry.policy);
        snapshot
            .iter()
            .filter(|queue| queue.push(item.clone(), capacity, policy))
            .count()
    }
}

// ── Subscription ─────────────────────────────────────────────────

/// The receiving side of one subscriber. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: SubscriptionId,
    queue: Arc<Queue<T>>,
    registry: Weak<Registry<T>>,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Messages lost to queue overflow so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once unsubscribed, or once the channel is gone and the
    /// queue has drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let notified = self.queue.notify.notified();
            {
                let mut state = self.queue.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the next queued message, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.queue.lock().items.pop_front()
    }

    /// Stop receiving. Idempotent; queued messages are discarded.
    pub fn unsubscribe(&mut self) {
        match self.registry.upgrade() {
            Some(registry) => {
                registry.remove(self.id);
            }
            None => self.queue.close(true),
        }
    }

    /// Adapt into a [`Stream`] of messages.
    pub fn into_stream(self) -> impl Stream<Item = T> {
        futures::stream::unfold(self, |mut sub| async move {
            let item = sub.recv().await?;
            Some((item, sub))
        })
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_in_order_to_every_subscriber() {
        let channel = BroadcastChannel::new("test", 8, OverflowPolicy::DropOldest);
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();

        for i in 0..3 {
            assert_eq!(channel.publish(i), 2);
        }
        for i in 0..3 {
            assert_eq!(a.recv().await, Some(i));
            assert_eq!(b.recv().await, Some(i));
        }
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let channel = BroadcastChannel::new("test", 8, OverflowPolicy::DropOldest);
        assert_eq!(channel.publish(1), 0);

        let mut late = channel.subscribe();
        channel.publish(2);
        assert_eq!(late.recv().await, Some(2));
        assert_eq!(late.try_recv(), None);
    }

    #[test]
    fn drop_oldest_keeps_latest() {
        let channel = BroadcastChannel::new("test", 2, OverflowPolicy::DropOldest);
        let mut sub = channel.subscribe();
        for i in 0..5 {
            channel.publish(i);
        }
        assert_eq!(sub.dropped(), 3);
        assert_eq!(sub.try_recv(), Some(3));
        assert_eq!(sub.try_recv(), Some(4));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn drop_newest_keeps_earliest() {
        let channel = BroadcastChannel::new("test", 2, OverflowPolicy::DropNewest);
        let mut sub = channel.subscribe();
        for i in 0..5 {
            channel.publish(i);
        }
        assert_eq!(sub.dropped(), 3);
        assert_eq!(sub.try_recv(), Some(0));
        assert_eq!(sub.try_recv(), Some(1));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_final() {
        let channel = BroadcastChannel::new("test", 8, OverflowPolicy::DropOldest);
        let mut sub = channel.subscribe();
        let id = sub.id();
        channel.publish(1);

        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        sub.unsubscribe();

        assert_eq!(channel.publish(2), 0);
        assert_eq!(sub.recv().await, None);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let channel = BroadcastChannel::<u32>::new("test", 8, OverflowPolicy::DropOldest);
        let sub = channel.subscribe();
        assert_eq!(channel.subscriber_count(), 1);
        drop(sub);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn recv_wakes_on_publish() {
        let channel = BroadcastChannel::new("test", 8, OverflowPolicy::DropOldest);
        let mut sub = channel.subscribe();

        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.publish(42u32);

        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(got, Some(42));
    }

    #[tokio::test]
    async fn dropping_channel_ends_stream_after_drain() {
        let channel = BroadcastChannel::new("test", 8, OverflowPolicy::DropOldest);
        let sub = channel.subscribe();
        channel.publish(1u32);
        channel.publish(2u32);
        drop(channel);

        let items: Vec<u32> = sub.into_stream().collect().await;
        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test]
    async fn concurrent_unsubscribe_during_publish() {
        let channel = BroadcastChannel::new("test", 1024, OverflowPolicy::DropOldest);
        let mut subs: Vec<_> = (0..16).map(|_| channel.subscribe()).collect();

        let publisher = {
            let channel = channel.clone();
            tokio::spawn(async move {
                for i in 0..2000u32 {
                    channel.publish(i);
                    if i % 100 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        for sub in subs.iter_mut().step_by(2) {
            sub.unsubscribe();
            assert_eq!(sub.try_recv(), None);
        }
        publisher.await.unwrap();

        for (idx, sub) in subs.iter_mut().enumerate() {
            if idx % 2 == 0 {
                assert_eq!(sub.recv().await, None);
            } else {
                let mut last = None;
                while let Some(v) = sub.try_recv() {
                    if let Some(prev) = last {
                        assert!(v > prev);
                    }
                    last = Some(v);
                }
                assert_eq!(last, Some(1999));
            }
        }
        assert_eq!(channel.subscriber_count(), 8);
    }
}
