//! Topic Broker
//!
//! In-process publish/subscribe with a bounded, replayable history per topic.
//!
//! Locking is two-level: the topic map is held only long enough to find or
//! insert a topic, and each topic has its own lock for history, sequence and
//! subscribers. Fan-out happens under the topic lock but only ever performs
//! non-blocking enqueues, so a slow consumer cannot stall `publish`. Lock
//! order is always map → topic → subscriber lane.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{BrokerError, BrokerResult};
use super::event::{Event, Payload};

/// What happens when a subscriber's channel is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Queue live events on a bounded per-subscriber backlog drained in
    /// order by a single task. Overflowing the backlog, or one send waiting
    /// longer than `send_timeout`, evicts the subscriber.
    Buffer {
        max_backlog: usize,
        send_timeout: Duration,
    },
    /// Evict the subscriber as soon as a live event finds its channel full
    Disconnect,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        BackpressurePolicy::Buffer {
            max_backlog: 256,
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// Broker tuning
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Events retained per topic for replay
    pub history_limit: usize,
    /// How long a topic without subscribers survives after its last activity
    pub topic_ttl: Duration,
    /// Period of the idle-topic reaper
    pub reap_interval: Duration,
    /// Capacity of each subscriber's delivery channel
    pub channel_capacity: usize,
    pub backpressure: BackpressurePolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            topic_ttl: Duration::from_secs(120),
            reap_interval: Duration::from_secs(60),
            channel_capacity: 64,
            backpressure: BackpressurePolicy::default(),
        }
    }
}

/// Point-in-time broker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub topics: usize,
    pub subscribers: usize,
    pub retained_events: usize,
}

/// Handle to the broker. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<Shared>,
}

struct Shared {
    config: BrokerConfig,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    shutdown: CancellationToken,
    /// Runtime the broker was created on; drain tasks are spawned here so
    /// `publish` works from threads outside the runtime
    runtime: Handle,
}

struct Topic {
    key: String,
    state: Mutex<TopicState>,
}

struct TopicState {
    subscribers: HashMap<u64, Arc<Subscriber>>,
    next_subscriber: u64,
    history: VecDeque<(u64, Arc<Event>)>,
    seq: u64,
    last_active: Instant,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<Event>>,
    lane: Mutex<Lane>,
    closed: CancellationToken,
}

/// Overflow state for one subscriber. While `backlog` is non-empty every new
/// event queues behind it, which keeps delivery in sequence order.
#[derive(Default)]
struct Lane {
    backlog: VecDeque<Arc<Event>>,
    draining: bool,
    closed: bool,
}

enum Offer {
    Sent,
    Queued,
    StartDrain,
    Overflow,
    Closed,
}

impl Broker {
    /// Create a broker and start its idle-topic reaper.
    ///
    /// Must be called from within a tokio runtime. The returned handle may
    /// then be used from any thread.
    pub fn new(config: BrokerConfig) -> Self {
        let config = BrokerConfig {
            history_limit: config.history_limit.max(1),
            channel_capacity: config.channel_capacity.max(1),
            ..config
        };
        let shared = Arc::new(Shared {
            config,
            topics: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            runtime: Handle::current(),
        });

        shared.runtime.spawn(reap_loop(
            Arc::downgrade(&shared),
            shared.shutdown.clone(),
            shared.config.reap_interval,
        ));

        Self { shared }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    /// Publish a payload to a topic, creating the topic if needed.
    ///
    /// Returns the stored event. Only serialization (or a stopped broker)
    /// fails; a failed delivery to one subscriber never affects the others.
    pub fn publish<T: Serialize>(
        &self,
        topic_key: &str,
        payload: Payload<T>,
    ) -> BrokerResult<Event> {
        if self.shared.shutdown.is_cancelled() {
            return Err(BrokerError::Stopped);
        }
        let data = serde_json::to_value(&payload.data)?;
        let config = &self.shared.config;

        self.shared.with_topic(topic_key, |topic, state| {
            state.seq += 1;
            let seq = state.seq;
            let event = Arc::new(Event {
                id: seq.to_string(),
                kind: payload.kind,
                data,
            });

            state.history.push_back((seq, Arc::clone(&event)));
            while state.history.len() > config.history_limit {
                state.history.pop_front();
            }
            state.last_active = Instant::now();

            let mut evicted = Vec::new();
            for subscriber in state.subscribers.values() {
                match subscriber.offer(Arc::clone(&event), config.backpressure) {
                    Offer::Sent | Offer::Queued => {}
                    Offer::StartDrain => {
                        if let BackpressurePolicy::Buffer { send_timeout, .. } =
                            config.backpressure
                        {
                            self.shared.runtime.spawn(drain(
                                Arc::clone(topic),
                                Arc::clone(subscriber),
                                send_timeout,
                            ));
                        }
                    }
                    Offer::Overflow => {
                        tracing::warn!(
                            topic = %topic.key,
                            subscriber = subscriber.id,
                            "Slow consumer evicted"
                        );
                        evicted.push(subscriber.id);
                    }
                    Offer::Closed => evicted.push(subscriber.id),
                }
            }
            for id in evicted {
                state.remove_subscriber(id);
            }

            tracing::trace!(
                topic = %topic.key,
                id = seq,
                kind = %event.kind,
                subscribers = state.subscribers.len(),
                "Published event"
            );

            Ok(Event::clone(&event))
        })
    }

    /// Subscribe to a topic, creating it if needed.
    ///
    /// `last_event_id` selects the replay set: `None` or empty replays the
    /// whole retained history, a sequence number replays only later events,
    /// and anything unparsable falls back to a full replay. Replay and
    /// registration happen atomically, so each event is seen exactly once.
    pub fn subscribe(&self, topic_key: &str, last_event_id: Option<&str>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.shared.config.channel_capacity);

        if self.shared.shutdown.is_cancelled() {
            drop(tx);
            return Subscription::detached(topic_key, rx, self.shared.shutdown.clone());
        }

        let after = parse_resume_point(topic_key, last_event_id);

        self.shared.with_topic(topic_key, |topic, state| {
            state.next_subscriber += 1;
            let id = state.next_subscriber;
            let replay: VecDeque<Arc<Event>> = state
                .history
                .iter()
                .filter(|(seq, _)| after.map_or(true, |after| *seq > after))
                .map(|(_, event)| Arc::clone(event))
                .collect();

            state.subscribers.insert(
                id,
                Arc::new(Subscriber {
                    id,
                    tx,
                    lane: Mutex::new(Lane::default()),
                    closed: CancellationToken::new(),
                }),
            );
            state.last_active = Instant::now();

            tracing::debug!(
                topic = %topic.key,
                subscriber = id,
                replay = replay.len(),
                "Subscribed"
            );

            Subscription {
                topic_key: topic.key.clone(),
                topic: Some(Arc::clone(topic)),
                id,
                replay,
                rx,
                released: false,
                shutdown: self.shared.shutdown.clone(),
            }
        })
    }

    /// Stop the reaper and close every live subscription. Idempotent.
    pub fn stop(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();

        let topics = self.shared.topics.lock();
        let mut closed = 0;
        for topic in topics.values() {
            let mut state = topic.state.lock();
            for (_, subscriber) in state.subscribers.drain() {
                subscriber.close();
                closed += 1;
            }
        }
        tracing::info!(subscriptions = closed, "Broker stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> BrokerStats {
        let topics = self.shared.topics.lock();
        let mut stats = BrokerStats {
            topics: topics.len(),
            ..Default::default()
        };
        for topic in topics.values() {
            let state = topic.state.lock();
            stats.subscribers += state.subscribers.len();
            stats.retained_events += state.history.len();
        }
        stats
    }

    /// Remove idle topics now rather than waiting for the next tick
    pub fn reap_idle(&self) -> usize {
        self.shared.reap_idle()
    }
}

impl Shared {
    /// Run `f` with the topic's state locked, creating the topic if absent.
    ///
    /// The map lock is released once the topic lock is held, so the reaper
    /// can never remove a topic between lookup and use.
    fn with_topic<R>(&self, key: &str, f: impl FnOnce(&Arc<Topic>, &mut TopicState) -> R) -> R {
        let mut topics = self.topics.lock();
        let topic = match topics.get(key) {
            Some(topic) => Arc::clone(topic),
            None => {
                let topic = Arc::new(Topic::new(key, self.config.history_limit));
                topics.insert(key.to_string(), Arc::clone(&topic));
                tracing::debug!(topic = %key, "Topic created");
                topic
            }
        };
        let mut state = topic.state.lock();
        drop(topics);
        f(&topic, &mut *state)
    }

    fn reap_idle(&self) -> usize {
        let ttl = self.config.topic_ttl;
        let now = Instant::now();
        let mut topics = self.topics.lock();
        let before = topics.len();

        topics.retain(|key, topic| {
            let state = topic.state.lock();
            let keep = !state.subscribers.is_empty()
                || now.saturating_duration_since(state.last_active) < ttl;
            if !keep {
                tracing::debug!(topic = %key, "Reaping idle topic");
            }
            keep
        });

        before - topics.len()
    }
}

impl Topic {
    fn new(key: &str, history_limit: usize) -> Self {
        Self {
            key: key.to_string(),
            state: Mutex::new(TopicState {
                subscribers: HashMap::new(),
                next_subscriber: 0,
                history: VecDeque::with_capacity(history_limit),
                seq: 0,
                last_active: Instant::now(),
            }),
        }
    }

    fn evict(&self, id: u64) {
        let mut state = self.state.lock();
        if state.remove_subscriber(id) {
            tracing::warn!(topic = %self.key, subscriber = id, "Slow consumer evicted");
        }
    }
}

impl TopicState {
    fn remove_subscriber(&mut self, id: u64) -> bool {
        match self.subscribers.remove(&id) {
            Some(subscriber) => {
                subscriber.close();
                self.last_active = Instant::now();
                true
            }
            None => false,
        }
    }
}

impl Subscriber {
    /// Try to hand `event` over without blocking
    fn offer(&self, event: Arc<Event>, policy: BackpressurePolicy) -> Offer {
        let mut lane = self.lane.lock();
        if lane.closed {
            return Offer::Closed;
        }

        let event = if lane.backlog.is_empty() {
            match self.tx.try_send(event) {
                Ok(()) => return Offer::Sent,
                Err(TrySendError::Closed(_)) => {
                    lane.closed = true;
                    return Offer::Closed;
                }
                Err(TrySendError::Full(event)) => event,
            }
        } else {
            event
        };

        match policy {
            BackpressurePolicy::Disconnect => Offer::Overflow,
            BackpressurePolicy::Buffer { max_backlog, .. } => {
                if lane.backlog.len() >= max_backlog {
                    return Offer::Overflow;
                }
                lane.backlog.push_back(event);
                if lane.draining {
                    Offer::Queued
                } else {
                    lane.draining = true;
                    Offer::StartDrain
                }
            }
        }
    }

    fn close(&self) {
        let mut lane = self.lane.lock();
        lane.closed = true;
        lane.backlog.clear();
        self.closed.cancel();
    }
}

/// Feed a lagging subscriber's backlog into its channel, oldest first
async fn drain(topic: Arc<Topic>, subscriber: Arc<Subscriber>, send_timeout: Duration) {
    loop {
        let next = {
            let mut lane = subscriber.lane.lock();
            if lane.closed {
                return;
            }
            match lane.backlog.front() {
                Some(event) => Arc::clone(event),
                None => {
                    lane.draining = false;
                    return;
                }
            }
        };

        // A pending send is dropped unsent once the subscriber is closed
        let sent = tokio::select! {
            biased;
            _ = subscriber.closed.cancelled() => return,
            sent = tokio::time::timeout(send_timeout, subscriber.tx.send(next)) => sent,
        };

        match sent {
            Ok(Ok(())) => {
                subscriber.lane.lock().backlog.pop_front();
            }
            Ok(Err(_)) => {
                subscriber.close();
                return;
            }
            Err(_) => {
                topic.evict(subscriber.id);
                return;
            }
        }
    }
}

async fn reap_loop(shared: Weak<Shared>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else { return };
                let reaped = shared.reap_idle();
                if reaped > 0 {
                    tracing::info!(reaped, "Reaped idle topics");
                }
            }
        }
    }
}

fn parse_resume_point(topic_key: &str, last_event_id: Option<&str>) -> Option<u64> {
    match last_event_id.map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<u64>() {
            Ok(seq) => Some(seq),
            Err(_) => {
                tracing::warn!(
                    topic = %topic_key,
                    last_event_id = %raw,
                    "Unparsable last event id, replaying full history"
                );
                None
            }
        },
    }
}

/// A live subscription to one topic
///
/// Yields the replay set first, then live events in sequence order.
/// Dropping the subscription releases it.
pub struct Subscription {
    topic_key: String,
    topic: Option<Arc<Topic>>,
    id: u64,
    replay: VecDeque<Arc<Event>>,
    rx: mpsc::Receiver<Arc<Event>>,
    released: bool,
    shutdown: CancellationToken,
}

impl Subscription {
    /// A subscription that was never registered (broker already stopped)
    fn detached(
        topic_key: &str,
        rx: mpsc::Receiver<Arc<Event>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            topic_key: topic_key.to_string(),
            topic: None,
            id: 0,
            replay: VecDeque::new(),
            rx,
            released: true,
            shutdown,
        }
    }

    pub fn topic_key(&self) -> &str {
        &self.topic_key
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the broker has been stopped. Once `recv` returns `None` this
    /// tells a broker shutdown apart from a slow-consumer eviction.
    pub fn is_broker_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of replayed events not yet received
    pub fn pending_replay(&self) -> usize {
        self.replay.len()
    }

    /// Next event, or `None` once the subscription is closed.
    ///
    /// Cancel-safe, so it can be used as a `tokio::select!` branch.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        if let Some(event) = self.replay.pop_front() {
            return Some(event);
        }
        self.rx.recv().await
    }

    /// Remove this subscriber from its topic and close its channel.
    /// Safe to call any number of times.
    pub fn cancel(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(topic) = &self.topic {
            topic.state.lock().remove_subscriber(self.id);
            tracing::debug!(topic = %self.topic_key, subscriber = self.id, "Unsubscribed");
        }
        self.replay.clear();
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
