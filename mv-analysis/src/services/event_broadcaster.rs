//! Per-job event fan-out
//!
//! Every subscription owns a bounded FIFO queue. `publish` pushes into each
//! queue of the job without waiting on any consumer; when a queue is full its
//! oldest non-terminal event is dropped. Terminal events (`Completed`,
//! `Failed`) are never dropped: they evict older entries instead, and once
//! published the job's channel is closed. The hub remembers the terminal
//! event so a subscription opened later still receives it.

use mv_common::events::JobEvent;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

/// Default per-subscription queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct SubscriberQueue {
    events: Mutex<VecDeque<JobEvent>>,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
    notify: Notify,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<JobEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue without blocking; returns false if `event` itself was dropped
    fn push(&self, event: JobEvent) -> bool {
        let accepted = {
            let mut events = self.lock();
            if events.len() >= self.capacity {
                match events.iter().position(|e| !e.is_terminal()) {
                    Some(oldest) => {
                        events.remove(oldest);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        events.push_back(event);
                        true
                    }
                    None if event.is_terminal() => {
                        events.push_back(event);
                        true
                    }
                    None => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        false
                    }
                }
            } else {
                events.push_back(event);
                true
            }
        };
        self.notify.notify_one();
        accepted
    }

    fn pop(&self) -> Option<JobEvent> {
        self.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct JobChannel {
    subscribers: HashMap<u64, Arc<SubscriberQueue>>,
    terminal: Option<JobEvent>,
}

struct HubInner {
    channels: RwLock<HashMap<Uuid, Arc<Mutex<JobChannel>>>>,
    next_subscriber_id: AtomicU64,
    queue_capacity: usize,
}

impl HubInner {
    fn channel(&self, job_id: Uuid) -> Option<Arc<Mutex<JobChannel>>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned()
    }

    fn channel_or_insert(&self, job_id: Uuid) -> Arc<Mutex<JobChannel>> {
        if let Some(channel) = self.channel(job_id) {
            return channel;
        }
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(job_id)
            .or_default()
            .clone()
    }

    fn remove_subscriber(&self, job_id: Uuid, subscriber_id: u64) {
        if let Some(channel) = self.channel(job_id) {
            let mut channel = channel.lock().unwrap_or_else(PoisonError::into_inner);
            if channel.subscribers.remove(&subscriber_id).is_some() {
                debug!(job_id = %job_id, subscriber_id, "Subscription removed");
            }
        }
    }
}

/// Event hub shared by the job drivers and the channel handlers
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventHub {
    /// Create a hub whose subscriptions buffer at most `queue_capacity` events
    pub fn new(queue_capacity: usize) -> Self {
        let queue_capacity = queue_capacity.max(1);
        info!("Event hub initialized with per-subscriber capacity {}", queue_capacity);
        Self {
            inner: Arc::new(HubInner {
                channels: RwLock::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(1),
                queue_capacity,
            }),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue_capacity
    }

    /// Open a subscription to one job's events
    ///
    /// If the job already published its terminal event, the subscription
    /// yields that event once and then ends.
    pub fn subscribe(&self, job_id: Uuid) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.inner.queue_capacity));

        let channel = self.inner.channel_or_insert(job_id);
        {
            let mut channel = channel.lock().unwrap_or_else(PoisonError::into_inner);
            match &channel.terminal {
                Some(terminal) => {
                    queue.push(terminal.clone());
                    queue.close();
                    debug!(job_id = %job_id, subscriber_id = id, "Subscribed to finished job");
                }
                None => {
                    channel.subscribers.insert(id, Arc::clone(&queue));
                    debug!(
                        job_id = %job_id,
                        subscriber_id = id,
                        subscribers = channel.subscribers.len(),
                        "Subscription opened"
                    );
                }
            }
        }

        Subscription {
            id,
            job_id,
            queue,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Tear down a subscription; equivalent to dropping it
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Deliver `event` to every live subscription of `job_id`
    ///
    /// Never blocks on a subscriber. Returns the number of queues the event
    /// was placed into. Events published after the terminal event are ignored.
    pub fn publish(&self, job_id: Uuid, event: JobEvent) -> usize {
        let channel = if event.is_terminal() {
            self.inner.channel_or_insert(job_id)
        } else {
            match self.inner.channel(job_id) {
                Some(channel) => channel,
                None => return 0,
            }
        };

        let mut channel = channel.lock().unwrap_or_else(PoisonError::into_inner);

        if channel.terminal.is_some() {
            debug!(job_id = %job_id, event = event.kind(), "Ignoring event after terminal event");
            return 0;
        }

        let mut delivered = 0;
        for (subscriber_id, queue) in &channel.subscribers {
            if queue.push(event.clone()) {
                delivered += 1;
            } else {
                debug!(job_id = %job_id, subscriber_id, event = event.kind(), "Subscriber queue full, event dropped");
            }
        }

        if event.is_terminal() {
            for queue in channel.subscribers.values() {
                queue.close();
            }
            channel.subscribers.clear();
            debug!(job_id = %job_id, event = event.kind(), delivered, "Job channel closed");
            channel.terminal = Some(event);
        }

        delivered
    }

    /// Live subscriptions for one job
    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.inner
            .channel(job_id)
            .map(|c| c.lock().unwrap_or_else(PoisonError::into_inner).subscribers.len())
            .unwrap_or(0)
    }

    /// Live subscriptions across all jobs
    pub fn total_subscribers(&self) -> usize {
        let channels: Vec<_> = self
            .inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        channels
            .iter()
            .map(|c| c.lock().unwrap_or_else(PoisonError::into_inner).subscribers.len())
            .sum()
    }

    /// Drop all state for a job, closing any remaining subscriptions
    pub fn forget(&self, job_id: Uuid) {
        let removed = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);

        if let Some(channel) = removed {
            let channel = channel.lock().unwrap_or_else(PoisonError::into_inner);
            for queue in channel.subscribers.values() {
                queue.close();
            }
        }
    }
}

/// One consumer's view of a job's event stream
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: u64,
    job_id: Uuid,
    queue: Arc<SubscriberQueue>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Wait for the next event; `None` once the channel closed and drained
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.is_closed() {
                return self.queue.pop();
            }
            self.queue.notify.notified().await;
        }
    }

    /// Next queued event without waiting
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        self.queue.pop()
    }

    /// Events queued but not yet received
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Events dropped from this subscription because its queue was full
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Closed and fully drained
    pub fn is_finished(&self) -> bool {
        self.queue.is_closed() && self.pending() == 0
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("job_id", &self.job_id)
            .field("pending", &self.pending())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove_subscriber(self.job_id, self.id);
        }
    }
}
