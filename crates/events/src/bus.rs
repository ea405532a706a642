use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use wv_domain::config::EventsConfig;
use wv_domain::event::{Event, EventKind};
use wv_domain::stream::BoxStream;

/// A boxed stream of bus events, as handed to SSE handlers.
pub type EventStream = BoxStream<'static, Event>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ThreadBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    /// Next seq to assign. Starts at 1, never reused.
    next_seq: u64,
    /// Bounded replay ring, oldest first.
    buffer: VecDeque<Event>,
}

/// The per-thread event channel: seq counter + replay ring + fan-out.
pub struct ThreadBus {
    inner: Mutex<Inner>,
    tx: broadcast::Sender<Event>,
    buffer_size: usize,
}

impl ThreadBus {
    fn new(config: &EventsConfig) -> Self {
        let (tx, _) = broadcast::channel(config.subscriber_backlog.max(1));
        Self {
            inner: Mutex::new(Inner {
                next_seq: 1,
                buffer: VecDeque::with_capacity(config.buffer_size),
            }),
            tx,
            buffer_size: config.buffer_size.max(1),
        }
    }

    /// Assign a seq, record the event in the ring, and fan out.
    ///
    /// Never blocks: subscribers that cannot keep up are lagged out by the
    /// broadcast channel and see a `dropped` marker from their stream.
    pub fn emit(&self, kind: EventKind, data: serde_json::Value) -> u64 {
        let event = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let event = Event::new(seq, kind, data);
            if inner.buffer.len() == self.buffer_size {
                inner.buffer.pop_front();
            }
            inner.buffer.push_back(event.clone());
            event
        };
        let seq = event.seq;
        // No receivers is fine (nobody has subscribed yet; replay covers them).
        let _ = self.tx.send(event);
        seq
    }

    /// The highest seq assigned so far (0 before the first emit).
    pub fn latest_seq(&self) -> u64 {
        self.inner.lock().next_seq - 1
    }

    /// Subscribe to this thread's events.
    ///
    /// With `last_event_id = Some(k)` the stream replays every buffered
    /// event with `seq > k` (no gaps within the ring) before going live.
    /// With `None` the stream is live-only from the current position.
    pub fn subscribe(&self, last_event_id: Option<u64>) -> EventStream {
        // Snapshot the ring and join the live channel under the same lock
        // so no event can fall between replay and live.
        let (replay, rx) = {
            let inner = self.inner.lock();
            let replay: Vec<Event> = match last_event_id {
                Some(k) => inner.buffer.iter().filter(|e| e.seq > k).cloned().collect(),
                None => Vec::new(),
            };
            (replay, self.tx.subscribe())
        };

        let mut last_yielded = last_event_id.unwrap_or(0);
        let stream = async_stream::stream! {
            for event in replay {
                last_yielded = event.seq;
                yield event;
            }
            let mut rx = rx;
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        // Replay overlap: the live channel may re-deliver
                        // events already served from the ring.
                        if event.seq <= last_yielded {
                            continue;
                        }
                        last_yielded = event.seq;
                        yield event;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "subscriber lagged, dropping");
                        yield Event::new(
                            last_yielded,
                            EventKind::Dropped,
                            serde_json::json!({ "missed": missed }),
                        );
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Box::pin(stream)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide registry of per-thread buses. Created once at startup and
/// passed into the turn controller as a dependency.
pub struct EventBus {
    threads: RwLock<HashMap<String, Arc<ThreadBus>>>,
    config: EventsConfig,
}

impl EventBus {
    pub fn new(config: EventsConfig) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get or create the bus for a thread. Seq numbering is continuous for
    /// the lifetime of the entry, across turns.
    pub fn thread(&self, thread_id: &str) -> Arc<ThreadBus> {
        if let Some(bus) = self.threads.read().get(thread_id) {
            return bus.clone();
        }
        let mut threads = self.threads.write();
        threads
            .entry(thread_id.to_owned())
            .or_insert_with(|| Arc::new(ThreadBus::new(&self.config)))
            .clone()
    }

    /// Convenience: emit on a thread's bus.
    pub fn emit(&self, thread_id: &str, kind: EventKind, data: serde_json::Value) -> u64 {
        self.thread(thread_id).emit(kind, data)
    }

    /// Convenience: subscribe to a thread's bus.
    pub fn subscribe(&self, thread_id: &str, last_event_id: Option<u64>) -> EventStream {
        self.thread(thread_id).subscribe(last_event_id)
    }

    /// Drop a thread's bus, ending all of its subscriber streams. Used on
    /// shutdown; per-turn termination happens via `done`/`error` events.
    pub fn close(&self, thread_id: &str) {
        self.threads.write().remove(thread_id);
    }

    pub fn keepalive_secs(&self) -> u64 {
        self.config.keepalive_secs
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn bus() -> EventBus {
        EventBus::new(EventsConfig::default())
    }

    #[test]
    fn seq_starts_at_one_and_is_monotonic() {
        let bus = bus();
        let s1 = bus.emit("t1", EventKind::Status, serde_json::json!({"text": "a"}));
        let s2 = bus.emit("t1", EventKind::Text, serde_json::json!({"text": "b"}));
        let s3 = bus.emit("t1", EventKind::Done, serde_json::json!({}));
        assert_eq!((s1, s2, s3), (1, 2, 3));
    }

    #[test]
    fn threads_have_independent_counters() {
        let bus = bus();
        assert_eq!(bus.emit("a", EventKind::Status, serde_json::json!({})), 1);
        assert_eq!(bus.emit("b", EventKind::Status, serde_json::json!({})), 1);
        assert_eq!(bus.emit("a", EventKind::Status, serde_json::json!({})), 2);
    }

    #[tokio::test]
    async fn live_subscriber_sees_events_in_seq_order() {
        let bus = bus();
        let mut stream = bus.subscribe("t1", None);
        for i in 0..5 {
            bus.emit("t1", EventKind::Text, serde_json::json!({ "i": i }));
        }
        let mut seqs = Vec::new();
        for _ in 0..5 {
            seqs.push(stream.next().await.unwrap().seq);
        }
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn replay_resumes_after_last_event_id() {
        let bus = bus();
        for _ in 0..10 {
            bus.emit("t1", EventKind::Text, serde_json::json!({}));
        }
        let mut stream = bus.subscribe("t1", Some(6));
        assert_eq!(stream.next().await.unwrap().seq, 7);
        assert_eq!(stream.next().await.unwrap().seq, 8);
        assert_eq!(stream.next().await.unwrap().seq, 9);
        assert_eq!(stream.next().await.unwrap().seq, 10);
    }

    #[tokio::test]
    async fn replay_has_no_gap_into_live_events() {
        let bus = bus();
        for _ in 0..3 {
            bus.emit("t1", EventKind::Text, serde_json::json!({}));
        }
        let mut stream = bus.subscribe("t1", Some(0));
        bus.emit("t1", EventKind::Text, serde_json::json!({}));
        let mut seqs = Vec::new();
        for _ in 0..4 {
            seqs.push(stream.next().await.unwrap().seq);
        }
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn ring_buffer_evicts_oldest() {
        let config = EventsConfig {
            buffer_size: 4,
            ..EventsConfig::default()
        };
        let bus = EventBus::new(config);
        for _ in 0..10 {
            bus.emit("t1", EventKind::Text, serde_json::json!({}));
        }
        // Only seqs 7..=10 remain; asking from 0 starts at the oldest kept.
        let mut stream = bus.subscribe("t1", Some(0));
        assert_eq!(stream.next().await.unwrap().seq, 7);
    }

    #[tokio::test]
    async fn slow_subscriber_gets_dropped_marker() {
        let config = EventsConfig {
            subscriber_backlog: 4,
            ..EventsConfig::default()
        };
        let bus = EventBus::new(config);
        let mut stream = bus.subscribe("t1", None);
        // Overflow the backlog without draining.
        for _ in 0..40 {
            bus.emit("t1", EventKind::Text, serde_json::json!({}));
        }
        // Drain: some events, then a single dropped marker, then the end.
        let mut saw_dropped = false;
        while let Some(ev) = stream.next().await {
            if ev.kind == EventKind::Dropped {
                saw_dropped = true;
                break;
            }
        }
        assert!(saw_dropped);
    }

    #[tokio::test]
    async fn close_ends_subscriber_streams() {
        let bus = bus();
        let mut stream = bus.subscribe("t1", None);
        bus.emit("t1", EventKind::Text, serde_json::json!({}));
        assert_eq!(stream.next().await.unwrap().seq, 1);
        bus.close("t1");
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn latest_seq_tracks_emits() {
        let bus = bus();
        let t = bus.thread("t1");
        assert_eq!(t.latest_seq(), 0);
        t.emit(EventKind::Status, serde_json::json!({}));
        assert_eq!(t.latest_seq(), 1);
    }
}
