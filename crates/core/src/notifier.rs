//! Publish/subscribe fan-out for job lifecycle and progress events.
//!
//! The notifier has no opinion on transport: the server crate forwards
//! events to WebSocket clients, tests subscribe directly. Delivery is
//! at-most-once and best-effort; a slow subscriber never blocks the
//! orchestrator. Each subscriber owns a bounded queue; on overflow the
//! oldest progress event is dropped (a newer one supersedes it anyway),
//! while terminal events use a reserved slot and are never dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::job::{DownloadJob, JobStatus};

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Events for one job: `job:{id}`.
    Job(String),
    /// Events for every job: `jobs:all`.
    All,
}

impl Topic {
    pub fn job(id: impl Into<String>) -> Self {
        Topic::Job(id.into())
    }

    /// The wire name of the topic.
    pub fn name(&self) -> String {
        match self {
            Topic::Job(id) => format!("job:{}", id),
            Topic::All => "jobs:all".to_string(),
        }
    }

    fn matches(&self, event: &JobEvent) -> bool {
        match self {
            Topic::Job(id) => event.job.id == *id,
            Topic::All => true,
        }
    }
}

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Progress,
    Completed,
    Failed,
    Cancelled,
}

impl EventKind {
    /// Terminal events get the reserved delivery slot.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventKind::Progress)
    }

    /// The event kind announcing the given status.
    pub fn for_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Completed => EventKind::Completed,
            JobStatus::Failed => EventKind::Failed,
            JobStatus::Cancelled => EventKind::Cancelled,
            JobStatus::Pending | JobStatus::Downloading => EventKind::Progress,
        }
    }
}

/// One published event: the kind plus the full job record at that moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub job: DownloadJob,
}

struct SubscriberInner {
    topic: Topic,
    queue: Mutex<VecDeque<JobEvent>>,
    notify: Notify,
}

impl SubscriberInner {
    /// Enqueue respecting the overflow policy. `capacity` bounds progress
    /// events only; terminal events always fit.
    fn push(&self, event: JobEvent, capacity: usize) {
        let mut queue = self.queue.lock().unwrap();

        if !event.kind.is_terminal() && queue.len() >= capacity {
            // Drop the oldest progress event to make room; if the queue is
            // somehow all terminal events, the new progress event loses.
            let Some(pos) = queue.iter().position(|e| !e.kind.is_terminal()) else {
                return;
            };
            let _ = queue.remove(pos);
        }

        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<JobEvent> {
        self.queue.lock().unwrap().pop_front()
    }
}

/// A handle to receive events for one topic. Dropping it unsubscribes.
pub struct Subscription {
    inner: Arc<SubscriberInner>,
}

impl Subscription {
    /// Wait for the next event.
    pub async fn recv(&self) -> JobEvent {
        loop {
            if let Some(event) = self.inner.pop() {
                return event;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&self) -> Option<JobEvent> {
        self.inner.pop()
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Broadcast hub for job events.
///
/// Cheaply cloneable; all clones share the subscriber list.
#[derive(Clone)]
pub struct Notifier {
    capacity: usize,
    subscribers: Arc<Mutex<Vec<Weak<SubscriberInner>>>>,
}

impl Notifier {
    /// Create a notifier whose subscribers buffer up to `capacity` progress
    /// events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe to a topic.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let inner = Arc::new(SubscriberInner {
            topic,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });
        self.subscribers.lock().unwrap().push(Arc::downgrade(&inner));
        Subscription { inner }
    }

    /// Publish an event to every matching subscriber. Never blocks.
    pub fn publish(&self, kind: EventKind, job: DownloadJob) {
        let event = JobEvent { kind, job };
        let mut subscribers = self.subscribers.lock().unwrap();

        subscribers.retain(|weak| {
            let Some(subscriber) = weak.upgrade() else {
                return false; // subscription dropped, forget it
            };
            if subscriber.topic.matches(&event) {
                subscriber.push(event.clone(), self.capacity);
            }
            true
        });
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|weak| weak.strong_count() > 0);
        subscribers.len()
    }
}
