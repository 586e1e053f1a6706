//! Batch dispatcher
//!
//! The dispatcher drains the [`EventQueue`] on a fixed cadence and after
//! every submit. At most one flush is in flight at a time; a trigger that
//! arrives during a flush is dropped, since the running or next scheduled
//! flush will pick up whatever is queued.
//!
//! A failed delivery puts the batch back at the head of the queue, so the
//! next flush retries exactly the same events in the same order. Delivery is
//! at-least-once: a batch the collector stored but whose response was lost
//! will be sent again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::CollectorConfig;
use crate::error::Error;
use crate::types::Event;

use super::client::Transport;
use super::queue::EventQueue;
use super::EventSink;

/// `kind` of inbound messages that carry an event
pub const EVENT_MESSAGE_KIND: &str = "YT_EVENT";

/// Publishing statistics
#[derive(Debug, Default, Clone)]
pub struct PublishStats {
    /// Total events the collector accepted
    pub events_sent: usize,
    /// Total events the collector rejected
    pub events_rejected: usize,
    /// Number of delivery attempts made
    pub api_calls: usize,
    /// Number of failed delivery attempts
    pub api_failures: usize,
    /// Submitted events and inbound messages dropped as malformed
    pub messages_dropped: usize,
}

/// Result of a single flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// A batch of this many events was delivered and removed from the queue
    Delivered(usize),
    /// Delivery failed; the batch is back at the head of the queue
    Failed { queued: usize },
    /// Nothing to send
    Empty,
    /// Another flush is running; this trigger was coalesced into it
    InFlight,
}

/// Inbound message envelope, e.g. `{"kind": "YT_EVENT", "event": {...}}`
#[derive(Debug, Deserialize)]
struct InboundMessage {
    kind: String,
    #[serde(default)]
    event: Option<serde_json::Value>,
}

/// Clears the in-flight flag when a flush ends, however it ends
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the event queue to a [`Transport`] in bounded batches
pub struct Dispatcher {
    queue: Arc<EventQueue>,
    transport: Arc<dyn Transport>,
    max_batch_size: usize,
    flush_interval: Duration,
    delivery_timeout: Duration,
    flushing: AtomicBool,
    trigger: Notify,
    stats: Mutex<PublishStats>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: &CollectorConfig) -> Self {
        Self::with_queue(Arc::new(EventQueue::new()), transport, config)
    }

    /// Build a dispatcher around an existing queue
    pub fn with_queue(
        queue: Arc<EventQueue>,
        transport: Arc<dyn Transport>,
        config: &CollectorConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            max_batch_size: config.max_batch_size.max(1),
            flush_interval: config.flush_interval(),
            delivery_timeout: config.timeout(),
            flushing: AtomicBool::new(false),
            trigger: Notify::new(),
            stats: Mutex::new(PublishStats::default()),
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Queue an event and request a flush
    ///
    /// Events the collector would reject are dropped here instead of being
    /// shipped.
    pub fn submit(&self, event: Event) {
        if let Err(e) = event.validate() {
            self.stats.lock().messages_dropped += 1;
            tracing::debug!(
                event_type = %event.event_type(),
                error = %e,
                "Dropped invalid event"
            );
            return;
        }
        self.enqueue(event);
    }

    /// Accept a raw inbound message
    ///
    /// Messages with the wrong kind, no payload, or a payload that does not
    /// decode into a valid [`Event`] are dropped. Returns whether the event
    /// was queued.
    pub fn accept_message(&self, message: &serde_json::Value) -> bool {
        match decode_message(message) {
            Ok(event) => {
                self.enqueue(event);
                true
            }
            Err(reason) => {
                self.stats.lock().messages_dropped += 1;
                tracing::debug!(reason = %reason, "Dropped malformed inbound message");
                false
            }
        }
    }

    fn enqueue(&self, event: Event) {
        self.queue.enqueue(event);
        self.trigger.notify_one();
    }

    /// Attempt to deliver one batch from the head of the queue
    pub async fn flush(&self) -> FlushOutcome {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return FlushOutcome::InFlight;
        }
        let _guard = FlushGuard(&self.flushing);

        let batch = self.queue.dequeue_batch(self.max_batch_size);
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        self.stats.lock().api_calls += 1;

        let result = match tokio::time::timeout(
            self.delivery_timeout,
            self.transport.deliver(&batch),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Delivery(format!(
                "delivery timed out after {:?}",
                self.delivery_timeout
            ))),
        };

        match result {
            Ok(response) => {
                let size = batch.len();
                {
                    let mut stats = self.stats.lock();
                    stats.events_sent += response.accepted;
                    stats.events_rejected += response.rejected;
                }
                for rejection in &response.errors {
                    tracing::warn!(
                        index = rejection.index,
                        error = %rejection.error,
                        "Collector rejected event"
                    );
                }
                tracing::debug!(
                    batch = size,
                    accepted = response.accepted,
                    rejected = response.rejected,
                    remaining = self.queue.len(),
                    "Delivered batch"
                );
                FlushOutcome::Delivered(size)
            }
            Err(e) => {
                self.stats.lock().api_failures += 1;
                let size = batch.len();
                self.queue.requeue_front(batch);
                let queued = self.queue.len();
                tracing::warn!(
                    error = %e,
                    batch = size,
                    queued,
                    "Failed to deliver batch, will retry"
                );
                FlushOutcome::Failed { queued }
            }
        }
    }

    /// Flush until the queue is empty or a delivery fails
    ///
    /// Returns the number of events delivered.
    pub async fn drain(&self) -> usize {
        let mut delivered = 0;
        loop {
            match self.flush().await {
                FlushOutcome::Delivered(n) => delivered += n,
                FlushOutcome::Empty | FlushOutcome::Failed { .. } => return delivered,
                FlushOutcome::InFlight => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }

    /// Run the flush loop until `shutdown` fires, then make a final drain pass
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.flush_interval.as_millis() as u64,
            max_batch_size = self.max_batch_size,
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.spawn_flush(),
                _ = self.trigger.notified() => self.spawn_flush(),
                _ = shutdown.cancelled() => break,
            }
        }

        let delivered = self.drain().await;
        tracing::info!(
            delivered,
            pending = self.queue.len(),
            "Dispatcher stopped"
        );
    }

    fn spawn_flush(self: &Arc<Self>) {
        if self.queue.is_empty() || self.flushing.load(Ordering::Acquire) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.flush().await;
        });
    }

    /// Get current publishing statistics
    pub fn stats(&self) -> PublishStats {
        self.stats.lock().clone()
    }

    /// Get number of pending events
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Check if there are any pending events
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }
}

impl EventSink for Dispatcher {
    fn submit(&self, event: Event) {
        Dispatcher::submit(self, event);
    }
}

fn decode_message(message: &serde_json::Value) -> Result<Event, String> {
    let inbound: InboundMessage =
        serde_json::from_value(message.clone()).map_err(|e| format!("bad envelope: {}", e))?;
    if inbound.kind != EVENT_MESSAGE_KIND {
        return Err(format!("unexpected kind {:?}", inbound.kind));
    }
    let payload = inbound.event.ok_or_else(|| "missing event".to_string())?;
    let event: Event =
        serde_json::from_value(payload).map_err(|e| format!("bad event: {}", e))?;
    event.validate().map_err(|e| e.to_string())?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::client::IngestResponse;
    use crate::error::Result;
    use crate::types::{EventPayload, PlayerState, WatchMode, SCHEMA_VERSION};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn make_event(n: usize) -> Event {
        Event {
            schema: SCHEMA_VERSION,
            event_id: format!("evt-{}", n),
            event_ts: 1_700_000_000_000 + n as i64,
            client_session_id: "client".to_string(),
            tab_id: "tab".to_string(),
            video_id: None,
            channel_name: None,
            channel_url: None,
            channel_handle: None,
            channel_id: None,
            url: "https://www.youtube.com/".to_string(),
            is_visible: true,
            watch_mode: WatchMode::Foreground,
            player_state: PlayerState::Unknown,
            tz_offset_min: 0,
            payload: EventPayload::VisibilityChange,
        }
    }

    /// Records every batch; fails while `failing` is set
    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<Vec<String>>>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(&self, events: &[Event]) -> Result<IngestResponse> {
            self.batches
                .lock()
                .push(events.iter().map(|e| e.event_id.clone()).collect());
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Delivery("API error (503): unavailable".to_string()));
            }
            Ok(IngestResponse {
                ok: true,
                accepted: events.len(),
                ..Default::default()
            })
        }
    }

    /// Blocks every delivery until released
    struct GatedTransport {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn deliver(&self, events: &[Event]) -> Result<IngestResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(IngestResponse {
                ok: true,
                accepted: events.len(),
                ..Default::default()
            })
        }
    }

    /// Never answers
    struct HungTransport;

    #[async_trait]
    impl Transport for HungTransport {
        async fn deliver(&self, _events: &[Event]) -> Result<IngestResponse> {
            std::future::pending().await
        }
    }

    fn dispatcher_with(transport: Arc<dyn Transport>) -> Dispatcher {
        Dispatcher::new(transport, &CollectorConfig::default())
    }

    #[tokio::test]
    async fn test_three_flushes_drain_120_events_in_order() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = dispatcher_with(transport.clone());
        for n in 0..120 {
            dispatcher.submit(make_event(n));
        }

        assert_eq!(dispatcher.flush().await, FlushOutcome::Delivered(50));
        assert_eq!(dispatcher.flush().await, FlushOutcome::Delivered(50));
        assert_eq!(dispatcher.flush().await, FlushOutcome::Delivered(20));
        assert_eq!(dispatcher.flush().await, FlushOutcome::Empty);

        let batches = transport.batches.lock();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(batches[0][0], "evt-0");
        assert_eq!(batches[1][0], "evt-50");
        assert_eq!(batches[2][19], "evt-119");
        assert_eq!(dispatcher.stats().events_sent, 120);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_queue_and_retries_same_batch() {
        let transport = Arc::new(RecordingTransport::default());
        transport.failing.store(true, Ordering::SeqCst);
        let dispatcher = dispatcher_with(transport.clone());
        for n in 0..70 {
            dispatcher.submit(make_event(n));
        }

        let before = dispatcher.pending_count();
        assert_eq!(
            dispatcher.flush().await,
            FlushOutcome::Failed { queued: 70 }
        );
        assert_eq!(dispatcher.pending_count(), before);

        transport.failing.store(false, Ordering::SeqCst);
        assert_eq!(dispatcher.flush().await, FlushOutcome::Delivered(50));

        let batches = transport.batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], batches[1]);
        assert_eq!(dispatcher.pending_count(), 20);

        let stats = dispatcher.stats();
        assert_eq!(stats.api_calls, 2);
        assert_eq!(stats.api_failures, 1);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_make_one_call() {
        let transport = Arc::new(GatedTransport {
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let dispatcher = Arc::new(dispatcher_with(transport.clone()));
        for n in 0..10 {
            dispatcher.submit(make_event(n));
        }

        let first = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.flush().await })
        };
        transport.entered.notified().await;

        for _ in 0..5 {
            assert_eq!(dispatcher.flush().await, FlushOutcome::InFlight);
        }

        transport.release.notify_one();
        assert_eq!(first.await.unwrap(), FlushOutcome::Delivered(10));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_delivery_times_out_and_releases_guard() {
        let config = CollectorConfig {
            timeout_secs: 1,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(HungTransport), &config);
        dispatcher.submit(make_event(0));

        assert_eq!(dispatcher.flush().await, FlushOutcome::Failed { queued: 1 });
        // Guard released: the next attempt runs instead of reporting InFlight
        assert_eq!(dispatcher.flush().await, FlushOutcome::Failed { queued: 1 });
    }

    #[tokio::test]
    async fn test_accept_message_drops_malformed() {
        let dispatcher = dispatcher_with(Arc::new(RecordingTransport::default()));

        let good = serde_json::json!({
            "kind": EVENT_MESSAGE_KIND,
            "event": serde_json::to_value(make_event(1)).unwrap(),
        });
        assert!(dispatcher.accept_message(&good));

        let wrong_kind = serde_json::json!({"kind": "PING", "event": {}});
        let missing_event = serde_json::json!({"kind": EVENT_MESSAGE_KIND});
        let not_an_object = serde_json::json!("hello");
        let bad_event = serde_json::json!({"kind": EVENT_MESSAGE_KIND, "event": {"schema": 1}});
        let mut invalid = serde_json::to_value(make_event(2)).unwrap();
        invalid["tab_id"] = serde_json::json!("");
        let invalid = serde_json::json!({"kind": EVENT_MESSAGE_KIND, "event": invalid});

        for message in [wrong_kind, missing_event, not_an_object, bad_event, invalid] {
            assert!(!dispatcher.accept_message(&message));
        }

        assert_eq!(dispatcher.pending_count(), 1);
        assert_eq!(dispatcher.stats().messages_dropped, 5);
    }

    #[tokio::test]
    async fn test_submit_drops_events_the_collector_would_reject() {
        let dispatcher = dispatcher_with(Arc::new(RecordingTransport::default()));

        let mut oversized_tick = make_event(0);
        oversized_tick.video_id = Some("abc".to_string());
        oversized_tick.payload = EventPayload::WatchTick {
            video_session_id: "session".to_string(),
            watch_ms_delta: 90_000,
            position_s: None,
            playback_rate: None,
            flush_reason: None,
        };
        dispatcher.submit(oversized_tick.clone());

        let mut blank_tab = make_event(1);
        blank_tab.tab_id = String::new();
        dispatcher.submit(blank_tab);

        let mut valid_tick = oversized_tick;
        valid_tick.event_id = "evt-ok".to_string();
        valid_tick.payload = EventPayload::WatchTick {
            video_session_id: "session".to_string(),
            watch_ms_delta: 45_000,
            position_s: None,
            playback_rate: None,
            flush_reason: None,
        };
        dispatcher.submit(valid_tick);

        assert_eq!(dispatcher.pending_count(), 1);
        assert_eq!(dispatcher.stats().messages_dropped, 2);
    }

    #[tokio::test]
    async fn test_run_delivers_on_trigger_and_drains_on_shutdown() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(dispatcher_with(transport.clone()));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&dispatcher).run(shutdown.clone()));

        for n in 0..3 {
            dispatcher.submit(make_event(n));
        }
        for _ in 0..100 {
            if !dispatcher.has_pending() && dispatcher.stats().events_sent == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(dispatcher.stats().events_sent, 3);

        transport.failing.store(true, Ordering::SeqCst);
        shutdown.cancel();
        handle.await.unwrap();
        assert!(!dispatcher.has_pending());
    }
}
