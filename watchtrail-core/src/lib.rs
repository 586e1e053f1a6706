//! # watchtrail-core
//!
//! Core library for watchtrail - a watch-session tracker for single-page
//! video sites.
//!
//! This library provides:
//! - Domain types for engagement events
//! - The session state machine and navigation observer
//! - An in-memory event queue with a batched, retrying dispatcher
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Two actors share nothing but the event queue:
//! - **Producer:** [`tracker::SessionMachine`], fed by pushed player signals,
//!   periodic polls and the navigation observer
//! - **Consumer:** [`collector::Dispatcher`], draining the queue to the ingest
//!   collector on its own timer
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use watchtrail_core::collector::{CollectorClient, Dispatcher};
//! use watchtrail_core::context::NoContext;
//! use watchtrail_core::tracker::{MachineParts, SessionMachine, SharedPage};
//! use watchtrail_core::{Config, SystemClock};
//!
//! let config = Config::load().expect("failed to load config");
//! let client = CollectorClient::new(config.collector.clone()).expect("bad collector config");
//! let dispatcher = Arc::new(Dispatcher::new(Arc::new(client), &config.collector));
//!
//! let page = Arc::new(SharedPage::default());
//! let machine = SessionMachine::new(
//!     "client-id",
//!     config.tracker.clone(),
//!     MachineParts {
//!         page,
//!         context: Arc::new(NoContext),
//!         sink: dispatcher,
//!         clock: Arc::new(SystemClock),
//!     },
//! );
//! let _ = machine.on_play();
//! ```

// Re-export commonly used items at the crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod clock;
pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod logging;
pub mod tracker;
pub mod types;
