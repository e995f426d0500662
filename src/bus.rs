//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The Data Bus: a topic-keyed publish/subscribe fabric wiring every other
//! component together. Grounded on `secluso-motion-ai`'s telemetry writer
//! (`logic/telemetry.rs`), which drains a `crossbeam_channel` with a single
//! background thread, generalised here to fan out to many topic-keyed
//! subscribers instead of one log sink, plus the original project's
//! `DataStream` (`viseron/data_stream.py`) for the subscribe/publish/topic
//! shape itself (exact-topic map, wildcard map, FIFO central queue).

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use regex::Regex;

use crate::error::{PipelineError, Result};

/// Central channel capacity (spec 5: "the Data Bus central channel is bounded
/// at 100").
const CENTRAL_CHANNEL_CAPACITY: usize = 100;

pub type BusMessage = Arc<dyn Any + Send + Sync>;

/// Opaque, idempotent unsubscribe handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Envelope {
    topic: String,
    payload: BusMessage,
}

enum Subscriber {
    Callback(SubscriptionId, Arc<dyn Fn(BusMessage) + Send + Sync>),
    Queue(SubscriptionId, Arc<QueueState>),
}

impl Subscriber {
    fn id(&self) -> SubscriptionId {
        match self {
            Subscriber::Callback(id, _) => *id,
            Subscriber::Queue(id, _) => *id,
        }
    }
}

struct QueueState {
    capacity: usize,
    queue: Mutex<VecDeque<BusMessage>>,
    not_empty: Condvar,
    warned_full: AtomicBool,
}

/// A bounded, drop-oldest-on-overflow subscriber queue (spec 4.1: "if a
/// subscriber's queue is full, the OLDEST queued item is discarded").
pub struct BusQueue {
    state: Arc<QueueState>,
}

impl BusQueue {
    fn push(&self, payload: BusMessage) {
        let mut queue = self.state.queue.lock().unwrap();
        if queue.len() >= self.state.capacity {
            queue.pop_front();
            if !self.state.warned_full.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "bus subscriber queue full (capacity {}), dropping oldest item",
                    self.state.capacity
                );
            }
        } else {
            self.state.warned_full.store(false, Ordering::Relaxed);
        }
        queue.push_back(payload);
        self.state.not_empty.notify_one();
    }

    /// Block until a message is available.
    pub fn recv(&self) -> BusMessage {
        let mut queue = self.state.queue.lock().unwrap();
        loop {
            if let Some(msg) = queue.pop_front() {
                return msg;
            }
            queue = self.state.not_empty.wait(queue).unwrap();
        }
    }

    /// Non-blocking receive, for drain-on-shutdown paths.
    pub fn try_recv(&self) -> Option<BusMessage> {
        self.state.queue.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compile a topic pattern containing `*` wildcards (matching one or more
/// `/`-delimited segments, as in the original's `fnmatch`-based wildcard
/// subscriptions) into a regex.
fn wildcard_regex(pattern: &str) -> Regex {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let joined = escaped.join(".*");
    Regex::new(&format!("^{joined}$")).expect("wildcard pattern compiles")
}

struct WildcardEntry {
    pattern: String,
    regex: Regex,
    subscribers: Vec<Subscriber>,
}

struct BusState {
    subscribers: HashMap<String, Vec<Subscriber>>,
    wildcard: Vec<WildcardEntry>,
}

/// The pub/sub fabric described in spec 4.1.
pub struct Bus {
    state: Mutex<BusState>,
    next_id: AtomicU64,
    publish_tx: Sender<Envelope>,
    shutdown_tx: Sender<()>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl Bus {
    pub fn new() -> Arc<Self> {
        let (publish_tx, publish_rx) = bounded::<Envelope>(CENTRAL_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let bus = Arc::new(Bus {
            state: Mutex::new(BusState {
                subscribers: HashMap::new(),
                wildcard: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
            publish_tx,
            shutdown_tx,
            dispatch_handle: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        });

        let dispatch_bus = Arc::clone(&bus);
        let handle = std::thread::Builder::new()
            .name("data-bus-dispatch".into())
            .spawn(move || dispatch_bus.dispatch_loop(publish_rx, shutdown_rx))
            .expect("spawn data bus dispatch thread");
        *bus.dispatch_handle.lock().unwrap() = Some(handle);

        bus
    }

    fn dispatch_loop(&self, publish_rx: Receiver<Envelope>, shutdown_rx: Receiver<()>) {
        loop {
            select! {
                recv(publish_rx) -> envelope => {
                    match envelope {
                        Ok(envelope) => self.dispatch(envelope),
                        Err(_) => break,
                    }
                }
                recv(shutdown_rx) -> _ => break,
            }
        }
        // Drain whatever is left so publishers waiting on the bounded
        // channel are not blocked forever by a shutdown race.
        while let Ok(envelope) = publish_rx.try_recv() {
            self.dispatch(envelope);
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        let state = self.state.lock().unwrap();
        if let Some(subs) = state.subscribers.get(&envelope.topic) {
            for sub in subs {
                Self::deliver(sub, &envelope.payload);
            }
        }
        for entry in &state.wildcard {
            if entry.regex.is_match(&envelope.topic) {
                for sub in &entry.subscribers {
                    Self::deliver(sub, &envelope.payload);
                }
            }
        }
    }

    fn deliver(sub: &Subscriber, payload: &BusMessage) {
        match sub {
            Subscriber::Callback(_, callback) => callback(Arc::clone(payload)),
            Subscriber::Queue(_, queue_state) => {
                BusQueue { state: Arc::clone(queue_state) }.push(Arc::clone(payload));
            }
        }
    }

    /// Publish `payload` on `topic`. FIFO per-topic from a single publisher
    /// (spec 4.1); returns `BusShuttingDown` once shutdown has begun, which
    /// callers must treat as benign.
    pub fn publish<T: Any + Send + Sync + 'static>(&self, topic: &str, payload: T) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(PipelineError::BusShuttingDown);
        }
        let envelope = Envelope {
            topic: topic.to_string(),
            payload: Arc::new(payload),
        };
        self.publish_tx
            .send(envelope)
            .map_err(|_| PipelineError::BusShuttingDown)
    }

    /// Register a synchronous callback subscriber. Callbacks run on the
    /// dispatch thread and must not block (spec 4.1).
    pub fn subscribe_callback<F>(&self, topic: &str, callback: F) -> SubscriptionId
    where
        F: Fn(BusMessage) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let sub = Subscriber::Callback(id, Arc::new(callback));
        self.register(topic, sub);
        id
    }

    /// Register a bounded queue subscriber with drop-oldest overflow.
    pub fn subscribe_queue(&self, topic: &str, capacity: usize) -> (SubscriptionId, BusQueue) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let queue_state = Arc::new(QueueState {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            warned_full: AtomicBool::new(false),
        });
        self.register(topic, Subscriber::Queue(id, Arc::clone(&queue_state)));
        (id, BusQueue { state: queue_state })
    }

    fn register(&self, topic: &str, sub: Subscriber) {
        let mut state = self.state.lock().unwrap();
        if topic.contains('*') {
            if let Some(entry) = state.wildcard.iter_mut().find(|e| e.pattern == topic) {
                entry.subscribers.push(sub);
            } else {
                state.wildcard.push(WildcardEntry {
                    pattern: topic.to_string(),
                    regex: wildcard_regex(topic),
                    subscribers: vec![sub],
                });
            }
        } else {
            state.subscribers.entry(topic.to_string()).or_default().push(sub);
        }
    }

    /// Idempotent unsubscribe by opaque handle (spec 4.1).
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        let mut state = self.state.lock().unwrap();
        if topic.contains('*') {
            if let Some(entry) = state.wildcard.iter_mut().find(|e| e.pattern == topic) {
                entry.subscribers.retain(|s| s.id() != id);
            }
        } else if let Some(subs) = state.subscribers.get_mut(topic) {
            subs.retain(|s| s.id() != id);
        }
    }

    /// Stop the dispatch loop. Further publishes return `BusShuttingDown`.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.dispatch_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn queue_subscriber_receives_published_payload() {
        let bus = Bus::new();
        let (_id, queue) = bus.subscribe_queue("camera/frame", 5);
        bus.publish("camera/frame", 42u32).unwrap();
        let msg = queue.recv();
        assert_eq!(*msg.downcast::<u32>().unwrap(), 42);
        bus.shutdown();
    }

    #[test]
    fn backpressure_keeps_last_n_items_in_order() {
        // Testable property 6: publishing N+2 items onto a bound-N queue
        // yields the subscriber the LAST N items, in order, with no deadlock.
        let bus = Bus::new();
        let (_id, queue) = bus.subscribe_queue("camera/frame", 3);
        for i in 0..5u32 {
            bus.publish("camera/frame", i).unwrap();
        }
        // Give the dispatch thread a moment to drain the central channel.
        std::thread::sleep(Duration::from_millis(50));
        let mut received = Vec::new();
        while let Some(msg) = queue.try_recv() {
            received.push(*msg.downcast::<u32>().unwrap());
        }
        assert_eq!(received, vec![2, 3, 4]);
        bus.shutdown();
    }

    #[test]
    fn wildcard_subscriber_matches_pattern() {
        let bus = Bus::new();
        let (_id, queue) = bus.subscribe_queue("camera/*/motion", 5);
        bus.publish("camera/front/motion", "contours").unwrap();
        bus.publish("camera/front/object", "ignored").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let msg = queue.try_recv().expect("wildcard match delivered");
        assert_eq!(*msg.downcast::<&str>().unwrap(), "contours");
        assert!(queue.try_recv().is_none());
        bus.shutdown();
    }

    #[test]
    fn publish_after_shutdown_is_benign() {
        let bus = Bus::new();
        bus.shutdown();
        let err = bus.publish("camera/frame", 1u32).unwrap_err();
        assert!(matches!(err, PipelineError::BusShuttingDown));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = Bus::new();
        let (id, _queue) = bus.subscribe_queue("camera/frame", 5);
        bus.unsubscribe("camera/frame", id);
        bus.unsubscribe("camera/frame", id);
        bus.shutdown();
    }
}
