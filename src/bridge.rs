//! Fan-out from writer commit events to per-client subscribers.
//!
//! Generalizes the teacher crate's single-writer/independent-subscriber
//! pattern (`ipc::pubsub::Publisher`/`Subscriber`, an mmap'd SPMC queue)
//! from one on-disk queue to an in-process registry of bounded per-
//! subscription queues, one heartbeat ticker shared by all subscribers.
//! The background ticker thread mirrors the teacher's `InotifyWorker` in
//! `notifier.rs`: an `Arc`'d shutdown flag plus a `JoinHandle` reaped on
//! `halt`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::registry::WriterIndex;

/// Opaque subscriber-side payload; the wire codec is out of scope here
/// (spec §1 "out of scope").
#[derive(Debug, Clone)]
pub struct PayloadDescriptor(pub Vec<u8>);

/// One committed transaction delta, tagged with its journal and a
/// monotonic per-writer commit sequence number.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub writer_index: WriterIndex,
    pub sequence: u64,
    pub payload: PayloadDescriptor,
}

/// What `next_event` can hand back to a Handler driving its Agent.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Commit(CommitEvent),
    /// A gap was observed on this subscription: `lost` events were
    /// dropped under backpressure since the last observation.
    Gap { writer_index: WriterIndex, lost: u64 },
    /// Liveness tick, delivered at least every `heartbeat` interval.
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextEventOutcome {
    Timeout,
    ShuttingDown,
}

pub type NextEventResult = Result<BridgeEvent, NextEventOutcome>;

/// Handle returned by [`EventBridge::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct PerIndexQueue {
    capacity: usize,
    events: VecDeque<CommitEvent>,
    /// Loss incurred since the last time a gap marker was surfaced.
    pending_loss: u64,
}

impl PerIndexQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            pending_loss: 0,
        }
    }

    fn push(&mut self, event: CommitEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
            self.pending_loss += 1;
        }
        self.events.push_back(event);
    }
}

struct Subscription {
    queues: HashMap<WriterIndex, PerIndexQueue>,
    /// Round-robin cursor over `queues` so no index starves another.
    poll_order: VecDeque<WriterIndex>,
    last_heartbeat_seen: u64,
}

impl Subscription {
    fn new(indices: &[WriterIndex], capacity: usize) -> Self {
        let mut queues = HashMap::with_capacity(indices.len());
        let mut poll_order = VecDeque::with_capacity(indices.len());
        for &index in indices {
            queues.insert(index, PerIndexQueue::new(capacity));
            poll_order.push_back(index);
        }
        Self {
            queues,
            poll_order,
            last_heartbeat_seen: 0,
        }
    }

    /// Pops the next ready item: a pending gap marker takes priority over
    /// the commit behind it (the subscriber must learn about loss before
    /// consuming what remains), otherwise the oldest event in round-robin
    /// order across subscribed indices.
    fn pop_ready(&mut self) -> Option<BridgeEvent> {
        for _ in 0..self.poll_order.len() {
            let index = *self.poll_order.front()?;
            self.poll_order.rotate_left(1);
            let queue = self.queues.get_mut(&index).expect("poll_order in sync");
            if queue.pending_loss > 0 {
                let lost = queue.pending_loss;
                queue.pending_loss = 0;
                return Some(BridgeEvent::Gap {
                    writer_index: index,
                    lost,
                });
            }
            if let Some(event) = queue.events.pop_front() {
                return Some(BridgeEvent::Commit(event));
            }
        }
        None
    }
}

struct Shared {
    subscriptions: Mutex<HashMap<SubscriptionHandle, Subscription>>,
    /// Reverse index: writer index -> subscriber handles bound to it.
    by_writer: Mutex<HashMap<WriterIndex, HashSet<SubscriptionHandle>>>,
    next_handle: AtomicU64,
    heartbeat_generation: AtomicU64,
    running: AtomicBool,
    notify: Notify,
    per_index_capacity: usize,
}

/// Per-writer-index fan-out of commit events to per-subscriber queues,
/// with a shared heartbeat cadence (spec §4.B).
pub struct EventBridge {
    shared: Arc<Shared>,
    heartbeat_period: Duration,
    ticker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EventBridge {
    /// `heartbeat_period` is the `H` from spec §4.B / §6
    /// (`heartbeatFrequency`). `per_index_capacity` bounds each
    /// subscriber's per-writer-index queue.
    pub fn new(heartbeat_period: Duration, per_index_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscriptions: Mutex::new(HashMap::new()),
                by_writer: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(0),
                heartbeat_generation: AtomicU64::new(0),
                running: AtomicBool::new(false),
                notify: Notify::new(),
                per_index_capacity,
            }),
            heartbeat_period,
            ticker: Mutex::new(None),
        }
    }

    /// Creates per-index bounded queues and starts tracking `writer_indices`
    /// for this subscriber.
    pub fn subscribe(&self, writer_indices: &[WriterIndex]) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.shared.next_handle.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription::new(writer_indices, self.shared.per_index_capacity);
        self.shared
            .subscriptions
            .lock()
            .unwrap()
            .insert(handle, subscription);
        let mut by_writer = self.shared.by_writer.lock().unwrap();
        for &index in writer_indices {
            by_writer.entry(index).or_default().insert(handle);
        }
        handle
    }

    /// Removes all queues for `handle`.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Some(subscription) = self.shared.subscriptions.lock().unwrap().remove(&handle) {
            let mut by_writer = self.shared.by_writer.lock().unwrap();
            for index in subscription.queues.keys() {
                if let Some(set) = by_writer.get_mut(index) {
                    set.remove(&handle);
                }
            }
        }
        self.shared.notify.notify_waiters();
    }

    /// Appends `event` to every subscriber queue bound to `writer_index`.
    /// Overflowing queues drop the oldest entry and record the loss (spec
    /// §4.B, §8 property 4).
    pub fn publish(&self, writer_index: WriterIndex, event: CommitEvent) {
        let handles: Vec<SubscriptionHandle> = {
            let by_writer = self.shared.by_writer.lock().unwrap();
            by_writer
                .get(&writer_index)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        };
        if handles.is_empty() {
            return;
        }
        let mut subscriptions = self.shared.subscriptions.lock().unwrap();
        for handle in handles {
            if let Some(subscription) = subscriptions.get_mut(&handle) {
                if let Some(queue) = subscription.queues.get_mut(&writer_index) {
                    queue.push(event.clone());
                }
            }
        }
        drop(subscriptions);
        self.shared.notify.notify_waiters();
    }

    /// Blocks up to `deadline` for the next event or heartbeat tick; returns
    /// `Err(ShuttingDown)` promptly once `halt` has been called.
    pub async fn next_event(
        &self,
        handle: SubscriptionHandle,
        deadline: Duration,
    ) -> NextEventResult {
        let start = tokio::time::Instant::now();
        loop {
            {
                let mut subscriptions = self.shared.subscriptions.lock().unwrap();
                if let Some(subscription) = subscriptions.get_mut(&handle) {
                    if let Some(event) = subscription.pop_ready() {
                        return Ok(event);
                    }
                    let generation = self.shared.heartbeat_generation.load(Ordering::Acquire);
                    if subscription.last_heartbeat_seen < generation {
                        subscription.last_heartbeat_seen = generation;
                        return Ok(BridgeEvent::Heartbeat);
                    }
                }
            }
            if !self.shared.running.load(Ordering::Acquire) {
                return Err(NextEventOutcome::ShuttingDown);
            }
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Err(NextEventOutcome::Timeout);
            }
            let remaining = deadline - elapsed;
            let wait = self.shared.notify.notified();
            if tokio::time::timeout(remaining, wait).await.is_err() {
                return Err(NextEventOutcome::Timeout);
            }
        }
    }

    /// Starts the heartbeat ticker. Idempotent only when not already
    /// running; callers follow `Server::start`'s single-call discipline.
    pub fn start(&self) {
        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let period = self.heartbeat_period;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !shared.running.load(Ordering::Acquire) {
                    break;
                }
                shared.heartbeat_generation.fetch_add(1, Ordering::AcqRel);
                shared.notify.notify_waiters();
            }
        });
        *self.ticker.lock().unwrap() = Some(handle);
    }

    /// Stops the heartbeat ticker and wakes every waiting `next_event`
    /// call with `ShuttingDown` (spec §4.B).
    pub async fn halt(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.notify.notify_waiters();
        let handle = self.ticker.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(seq: u64) -> CommitEvent {
        CommitEvent {
            writer_index: 0,
            sequence: seq,
            payload: PayloadDescriptor(vec![]),
        }
    }

    #[tokio::test]
    async fn fan_out_preserves_publish_order() {
        let bridge = EventBridge::new(Duration::from_secs(60), 16);
        let handle = bridge.subscribe(&[0]);
        bridge.publish(0, event(1));
        bridge.publish(0, event(2));
        bridge.publish(0, event(3));

        for expected in [1, 2, 3] {
            match bridge
                .next_event(handle, Duration::from_millis(100))
                .await
                .unwrap()
            {
                BridgeEvent::Commit(e) => assert_eq!(e.sequence, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn drop_oldest_under_backpressure() {
        let bridge = EventBridge::new(Duration::from_secs(60), 2);
        let handle = bridge.subscribe(&[0]);
        for seq in 1..=5 {
            bridge.publish(0, event(seq));
        }

        match bridge
            .next_event(handle, Duration::from_millis(100))
            .await
            .unwrap()
        {
            BridgeEvent::Gap { lost, .. } => assert_eq!(lost, 3),
            other => panic!("expected gap marker first, got {other:?}"),
        }
        for expected in [4, 5] {
            match bridge
                .next_event(handle, Duration::from_millis(100))
                .await
                .unwrap()
            {
                BridgeEvent::Commit(e) => assert_eq!(e.sequence, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn heartbeat_ticks_within_deadline() {
        let bridge = EventBridge::new(Duration::from_millis(20), 16);
        bridge.start();
        let handle = bridge.subscribe(&[0]);
        let outcome = bridge.next_event(handle, Duration::from_millis(200)).await;
        bridge.halt().await;
        assert!(matches!(outcome, Ok(BridgeEvent::Heartbeat)));
    }

    #[tokio::test]
    async fn halt_wakes_waiters_with_shutting_down() {
        let bridge = Arc::new(EventBridge::new(Duration::from_secs(60), 16));
        bridge.shared.running.store(true, Ordering::Release);
        let handle = bridge.subscribe(&[0]);
        let waiter = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.next_event(handle, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        bridge.halt().await;
        let outcome = waiter.await.unwrap();
        assert_eq!(outcome, Err(NextEventOutcome::ShuttingDown));
    }

    #[tokio::test]
    async fn unsubscribe_removes_queues() {
        let bridge = EventBridge::new(Duration::from_secs(60), 16);
        bridge.start();
        let handle = bridge.subscribe(&[0]);
        bridge.unsubscribe(handle);
        bridge.publish(0, event(1));
        let outcome = bridge.next_event(handle, Duration::from_millis(20)).await;
        bridge.halt().await;
        assert_eq!(outcome, Err(NextEventOutcome::Timeout));
    }
}
