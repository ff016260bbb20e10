//! Subscription fabric: session registry, topic-filtered broadcast and
//! per-session backpressure.
//!
//! Sessions and topics are kept in two maps keyed both ways under a single
//! reader-writer lock; registration and removal take the writer, broadcast
//! iteration takes the reader. Removal is idempotent because several
//! disconnect paths converge on it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::market::prediction::{MergedPrediction, TrainingStatus};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::{Candle, Topic};
use crate::infrastructure::observability::metrics::Metrics;

/// Messages a client may send over a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        symbol: String,
        timeframe: Timeframe,
    },
    Unsubscribe,
    Ping,
}

/// Messages the server pushes to sessions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "subscribed")]
    Subscribed { symbol: String, timeframe: Timeframe },
    #[serde(rename = "candle:update")]
    CandleUpdate {
        symbol: String,
        timeframe: Timeframe,
        candle: Candle,
    },
    #[serde(rename = "prediction:update")]
    PredictionUpdate {
        symbol: String,
        timeframe: Timeframe,
        prediction: MergedPrediction,
    },
    #[serde(rename = "training:status")]
    TrainingStatusUpdate {
        symbol: String,
        timeframe: Timeframe,
        bot_name: String,
        job_id: i64,
        status: TrainingStatus,
    },
    #[serde(rename = "pong")]
    Pong,
}

impl ServerMessage {
    /// Candle updates are superseded by the next tick, so they are the only
    /// message class the overflow policy may drop.
    pub fn droppable(&self) -> bool {
        matches!(self, ServerMessage::CandleUpdate { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Subscribed { .. } => "subscribed",
            ServerMessage::CandleUpdate { .. } => "candle",
            ServerMessage::PredictionUpdate { .. } => "prediction",
            ServerMessage::TrainingStatusUpdate { .. } => "training",
            ServerMessage::Pong => "pong",
        }
    }
}

/// Bounded outbound queue with type-aware overflow.
///
/// The push side never blocks: when the queue is full an old candle update
/// is evicted to admit a new one, while prediction and training messages are
/// always admitted (the bound may be exceeded transiently by non-droppable
/// traffic). A dedicated writer task drains the queue serially.
pub struct OutboundQueue {
    inner: Mutex<VecDeque<ServerMessage>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicUsize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Non-blocking push. Returns the number of messages dropped (0 or 1).
    pub fn push(&self, message: ServerMessage) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        let mut dropped = 0usize;
        {
            let mut queue = self.inner.lock().expect("outbound queue lock");
            if queue.len() >= self.capacity {
                if message.droppable() {
                    // Evict the oldest candle update; if there is none, the
                    // incoming candle is the one that loses.
                    if let Some(index) = queue.iter().position(ServerMessage::droppable) {
                        queue.remove(index);
                        queue.push_back(message);
                    }
                    dropped = 1;
                } else {
                    queue.push_back(message);
                }
            } else {
                queue.push_back(message);
            }
        }
        if dropped > 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        dropped
    }

    /// Awaits the next message; `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<ServerMessage> {
        loop {
            {
                let mut queue = self.inner.lock().expect("outbound queue lock");
                if let Some(message) = queue.pop_front() {
                    return Some(message);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("outbound queue lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct SessionEntry {
    topic: Option<Topic>,
    queue: Arc<OutboundQueue>,
}

struct RegistryState {
    sessions: HashMap<Uuid, SessionEntry>,
    topics: HashMap<Topic, HashSet<Uuid>>,
}

pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    queue_depth: usize,
    metrics: Metrics,
}

impl SubscriptionRegistry {
    pub fn new(queue_depth: usize, metrics: Metrics) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(RegistryState {
                sessions: HashMap::new(),
                topics: HashMap::new(),
            }),
            queue_depth,
            metrics,
        })
    }

    /// Registers a new session and hands back its outbound queue.
    pub async fn register(&self, session_id: Uuid) -> Arc<OutboundQueue> {
        let queue = Arc::new(OutboundQueue::new(self.queue_depth));
        let mut state = self.state.write().await;
        state.sessions.insert(
            session_id,
            SessionEntry {
                topic: None,
                queue: Arc::clone(&queue),
            },
        );
        self.metrics.sessions_active.set(state.sessions.len() as f64);
        info!("Session {} connected ({} active)", session_id, state.sessions.len());
        queue
    }

    /// Sets the session's subscription, replacing any existing one, and
    /// acknowledges on the session's own queue.
    pub async fn subscribe(&self, session_id: Uuid, topic: Topic) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let Some(entry) = state.sessions.get(&session_id) else {
            return false;
        };
        let queue = Arc::clone(&entry.queue);
        let previous = entry.topic.clone();

        if let Some(old) = previous {
            detach(&mut state.topics, &old, session_id);
        }
        state
            .topics
            .entry(topic.clone())
            .or_default()
            .insert(session_id);
        if let Some(entry) = state.sessions.get_mut(&session_id) {
            entry.topic = Some(topic.clone());
        }
        drop(guard);

        debug!("Session {} subscribed to {}", session_id, topic);
        queue.push(ServerMessage::Subscribed {
            symbol: topic.symbol,
            timeframe: topic.timeframe,
        });
        true
    }

    pub async fn unsubscribe(&self, session_id: Uuid) {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let Some(entry) = state.sessions.get_mut(&session_id) else {
            return;
        };
        if let Some(old) = entry.topic.take() {
            detach(&mut state.topics, &old, session_id);
            debug!("Session {} unsubscribed from {}", session_id, old);
        }
    }

    /// Removes a session. Safe to call from every disconnect path; only the
    /// first call does the work.
    pub async fn remove(&self, session_id: Uuid) {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let Some(entry) = state.sessions.remove(&session_id) else {
            return;
        };
        if let Some(topic) = entry.topic {
            detach(&mut state.topics, &topic, session_id);
        }
        entry.queue.close();
        self.metrics.sessions_active.set(state.sessions.len() as f64);
        info!("Session {} removed ({} active)", session_id, state.sessions.len());
    }

    /// Topic-filtered broadcast: delivered only to sessions whose current
    /// subscription matches.
    pub async fn publish(&self, topic: &Topic, message: ServerMessage) {
        let state = self.state.read().await;
        let Some(subscribers) = state.topics.get(topic) else {
            return;
        };
        let kind = message.kind();
        let mut dropped = 0usize;
        for session_id in subscribers {
            if let Some(entry) = state.sessions.get(session_id) {
                dropped += entry.queue.push(message.clone());
            }
        }
        if dropped > 0 {
            self.metrics
                .session_queue_drops_total
                .with_label_values(&[kind])
                .inc_by(dropped as f64);
        }
    }

    /// The set of currently subscribed topics (the scheduler's dynamic
    /// half of the active set).
    pub async fn active_topics(&self) -> Vec<Topic> {
        let state = self.state.read().await;
        state
            .topics
            .iter()
            .filter(|(_, sessions)| !sessions.is_empty())
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn current_topic(&self, session_id: Uuid) -> Option<Topic> {
        self.state
            .read()
            .await
            .sessions
            .get(&session_id)
            .and_then(|entry| entry.topic.clone())
    }
}

fn detach(topics: &mut HashMap<Topic, HashSet<Uuid>>, topic: &Topic, session_id: Uuid) {
    if let Some(sessions) = topics.get_mut(topic) {
        sessions.remove(&session_id);
        if sessions.is_empty() {
            topics.remove(topic);
        }
    }
}
