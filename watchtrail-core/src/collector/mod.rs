//! Event delivery to the ingest collector
//!
//! ## Architecture
//!
//! ```text
//! SessionMachine ──submit──▶ EventQueue ──dequeue_batch──▶ Dispatcher ──POST /ingest──▶ collector
//!                                ▲                              │
//!                                └──────── requeue_front ───────┘  (on failure)
//! ```
//!
//! - The producer never waits on delivery; `submit` only appends and pokes
//!   the dispatcher.
//! - The dispatcher flushes on a fixed timer plus on demand, one flush at a
//!   time, at most `max_batch_size` events per request.
//! - Failures never drop events: the batch returns to the head of the queue
//!   and is retried on the next tick.
//!
//! ## Usage
//!
//! Point the collector at an ingest server in `~/.config/watchtrail/config.toml`:
//!
//! ```toml
//! [collector]
//! endpoint = "http://localhost:4000"
//! max_batch_size = 50
//! flush_interval_ms = 750
//! ```

mod client;
mod dispatcher;
mod queue;

pub use client::{CollectorClient, IngestRejection, IngestResponse, Transport};
pub use dispatcher::{Dispatcher, FlushOutcome, PublishStats, EVENT_MESSAGE_KIND};
pub use queue::EventQueue;

use crate::types::Event;

/// Fire-and-forget hand-off from an event producer to delivery
pub trait EventSink: Send + Sync {
    fn submit(&self, event: Event);
}
