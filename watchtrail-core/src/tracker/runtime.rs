//! Timer-driven tracker loop
//!
//! One [`TrackerRuntime`] drives one [`SessionMachine`]:
//! - pushed player signals (play, pause, ended, visibility) are handled as
//!   they arrive
//! - the player is polled on `poll_interval_ms` for ticks and self-heal
//! - the navigation observer runs on `observe_interval_ms`
//!
//! Context resolution runs on spawned tasks so a slow page never delays the
//! next poll or signal.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::machine::{SessionMachine, StartRequest};
use super::observer::NavigationObserver;
use super::page::PageSource;

/// Discrete signals pushed by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerSignal {
    Play,
    Pause,
    Ended,
    Visibility(bool),
}

/// Sending half handed to the host
pub type SignalSender = mpsc::UnboundedSender<PlayerSignal>;

pub struct TrackerRuntime {
    machine: Arc<SessionMachine>,
    observer: NavigationObserver,
    signals: mpsc::UnboundedReceiver<PlayerSignal>,
}

impl TrackerRuntime {
    /// Create a runtime observing `page`, returning the signal sender
    pub fn new(machine: Arc<SessionMachine>, page: Arc<dyn PageSource>) -> (Self, SignalSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = Self {
            machine,
            observer: NavigationObserver::new(page),
            signals: rx,
        };
        (runtime, tx)
    }

    pub fn machine(&self) -> &Arc<SessionMachine> {
        &self.machine
    }

    /// Run until `shutdown` fires
    pub async fn run(mut self, shutdown: CancellationToken) {
        let config = self.machine.config().clone();

        let mut poll = tokio::time::interval(config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut observe = tokio::time::interval(config.observe_interval());
        observe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            tab_id = %self.machine.tab_id(),
            poll_ms = config.poll_interval_ms,
            observe_ms = config.observe_interval_ms,
            "Tracker started"
        );

        loop {
            tokio::select! {
                Some(signal) = self.signals.recv() => self.handle_signal(signal),
                _ = poll.tick() => {
                    let request = self.machine.on_poll();
                    self.spawn_start(request);
                }
                _ = observe.tick() => {
                    if let Some(transition) = self.observer.poll_for_change() {
                        tracing::debug!(
                            from = %transition.previous_url,
                            to = %transition.url,
                            "Navigation detected"
                        );
                        let request = self.machine.on_navigation(&transition);
                        self.spawn_start(request);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!(tab_id = %self.machine.tab_id(), "Tracker stopped");
    }

    fn handle_signal(&self, signal: PlayerSignal) {
        match signal {
            PlayerSignal::Play => {
                let request = self.machine.on_play();
                self.spawn_start(request);
            }
            PlayerSignal::Pause => self.machine.on_pause(),
            PlayerSignal::Ended => self.machine.on_ended(),
            PlayerSignal::Visibility(visible) => self.machine.on_visibility_change(visible),
        }
    }

    fn spawn_start(&self, request: Option<StartRequest>) {
        let Some(request) = request else {
            return;
        };
        let machine = Arc::clone(&self.machine);
        tokio::spawn(async move {
            machine.resolve_start(request).await;
        });
    }
}
