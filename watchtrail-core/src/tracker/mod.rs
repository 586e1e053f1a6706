//! Watch-session tracking
//!
//! Turns noisy page signals into a well-formed event stream:
//!
//! ```text
//! PageSource ──▶ NavigationObserver ──Transition──▶ SessionMachine ──Event──▶ EventSink
//!      │                                                 ▲
//!      └──────── player polls, pushed PlayerSignals ─────┘
//! ```

mod accounting;
mod machine;
mod observer;
mod page;
mod runtime;

pub use accounting::{clamp_delta, flush_delta, periodic_tick_delta};
pub use machine::{MachineParts, SessionMachine, SessionState, StartRequest};
pub use observer::{NavigationObserver, Transition};
pub use page::{video_id_from_url, PageSource, PageView, SharedPage};
pub use runtime::{PlayerSignal, SignalSender, TrackerRuntime};
