//! Watch-session state machine
//!
//! Converts play/pause/ended signals, navigation transitions, periodic polls
//! and visibility changes into session-scoped events.
//!
//! ## States
//!
//! | State | Meaning |
//! |-------|---------|
//! | Idle | no `video_session_id`; nothing is being accounted |
//! | Active | a `video_start` was emitted and its `video_stop` was not |
//!
//! Handlers are synchronous and serialize on one lock that is never held
//! across an await. Starting a session for a new video needs the channel
//! identity, which may take a while to appear, so those handlers return a
//! [`StartRequest`] instead. The caller completes it with
//! [`SessionMachine::resolve_start`], typically on a spawned task. When the
//! resolution finishes the machine re-checks the page: if the viewer moved on
//! or paused in the meantime, the start is dropped.
//!
//! ## Self-heal
//!
//! A poll that sees the player playing with no active session starts one,
//! covering missed play signals. This can also mask a missed pause: the
//! earlier session is never stopped with reason `pause`, and its trailing
//! time is lost rather than double counted.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::collector::EventSink;
use crate::config::TrackerConfig;
use crate::context::{resolve_channel_identity, ContextProvider};
use crate::types::{
    ChannelIdentity, Event, EventPayload, MissingReason, PlayerState, StopReason, WatchMode,
    SCHEMA_VERSION,
};

use super::accounting::{flush_delta, periodic_tick_delta};
use super::observer::Transition;
use super::page::{video_id_from_url, PageSource};

/// `context_type` reported on `context_missing` events
const CONTEXT_TYPE_UNKNOWN: &str = "unknown";

/// Mutable session state owned by one [`SessionMachine`]
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    /// Video the current context belongs to
    pub video_id: Option<String>,
    /// Set while a session is active
    pub video_session_id: Option<String>,
    pub channel: ChannelIdentity,
    /// Accounting baseline; `None` until the next poll establishes one
    pub last_tick_ms: Option<i64>,
    pub player_state: PlayerState,
    pub is_visible: bool,
    pub last_context_missing_ms: Option<i64>,
    /// Video whose channel identity is being resolved
    pub resolving: Option<String>,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        self.video_session_id.is_some()
    }

    fn clear_context(&mut self) {
        self.video_id = None;
        self.video_session_id = None;
        self.channel = ChannelIdentity::default();
        self.resolving = None;
    }
}

/// A session start waiting on channel identity resolution
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a start request does nothing until passed to resolve_start"]
pub struct StartRequest {
    pub video_id: String,
}

/// Collaborators a [`SessionMachine`] reads from and writes to
pub struct MachineParts {
    pub page: Arc<dyn PageSource>,
    pub context: Arc<dyn ContextProvider>,
    pub sink: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
}

/// Watch-session lifecycle and tick accounting for one tab
pub struct SessionMachine {
    config: TrackerConfig,
    client_session_id: String,
    tab_id: String,
    page: Arc<dyn PageSource>,
    context: Arc<dyn ContextProvider>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
}

impl SessionMachine {
    pub fn new(
        client_session_id: impl Into<String>,
        config: TrackerConfig,
        parts: MachineParts,
    ) -> Self {
        let is_visible = parts.page.is_visible();
        Self {
            config,
            client_session_id: client_session_id.into(),
            tab_id: uuid::Uuid::new_v4().to_string(),
            page: parts.page,
            context: parts.context,
            sink: parts.sink,
            clock: parts.clock,
            state: Mutex::new(SessionState {
                is_visible,
                ..Default::default()
            }),
        }
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Copy of the current session state
    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    // ============================================
    // Signal handlers
    // ============================================

    /// The player started playing
    pub fn on_play(&self) -> Option<StartRequest> {
        let now = self.clock.now_ms();
        let mut st = self.state.lock();

        st.is_visible = self.page.is_visible();
        st.player_state = PlayerState::Playing;
        self.emit(
            &st,
            now,
            EventPayload::PlayerStateChange {
                new_state: PlayerState::Playing,
            },
        );

        match video_id_from_url(&self.page.current_url()) {
            Some(video_id) => self.begin(&mut st, video_id, now),
            None => {
                self.maybe_emit_context_missing(&mut st, MissingReason::PlayWithoutVideoId, now);
                None
            }
        }
    }

    /// The player paused
    pub fn on_pause(&self) {
        self.on_player_halt(PlayerState::Paused, StopReason::Pause);
    }

    /// Playback reached the end of the video
    pub fn on_ended(&self) {
        self.on_player_halt(PlayerState::Ended, StopReason::Ended);
    }

    /// The page location changed
    pub fn on_navigation(&self, transition: &Transition) -> Option<StartRequest> {
        let now = self.clock.now_ms();
        let mut st = self.state.lock();

        match (&transition.previous_video_id, &transition.video_id) {
            (Some(previous), Some(next)) if previous != next => {
                self.flush_pending_tick(&mut st, StopReason::Navigate, now);
                self.stop_session(&mut st, StopReason::Navigate, now);
                st.clear_context();
                if self.player_is_playing(&st) {
                    return self.begin(&mut st, next.clone(), now);
                }
                None
            }
            (Some(_), None) => {
                self.flush_pending_tick(&mut st, StopReason::LeaveWatch, now);
                self.stop_session(&mut st, StopReason::LeaveWatch, now);
                st.clear_context();
                st.last_tick_ms = None;
                None
            }
            (None, Some(next)) if self.player_is_playing(&st) => {
                self.begin(&mut st, next.clone(), now)
            }
            _ => None,
        }
    }

    /// Periodic check of the player; emits ticks while playing
    pub fn on_poll(&self) -> Option<StartRequest> {
        let now = self.clock.now_ms();
        let mut st = self.state.lock();

        let player = self.page.player();
        st.is_visible = self.page.is_visible();
        st.player_state = player
            .as_ref()
            .map_or(PlayerState::Unknown, |p| p.state);

        let playing = player.as_ref().is_some_and(|p| p.is_playing());
        if !playing {
            return None;
        }

        let Some(video_id) = video_id_from_url(&self.page.current_url()) else {
            if st.is_active() {
                self.maybe_emit_context_missing(&mut st, MissingReason::NoVideoId, now);
                st.last_tick_ms = None;
            }
            return None;
        };

        if !st.is_active() || st.video_id.as_deref() != Some(video_id.as_str()) {
            if !st.is_active() && st.resolving.is_none() {
                tracing::debug!(video_id = %video_id, "Playing without a session, starting one");
            }
            return self.begin(&mut st, video_id, now);
        }

        let Some(last) = st.last_tick_ms else {
            st.last_tick_ms = Some(now);
            return None;
        };

        if let Some(delta) = periodic_tick_delta(
            now - last,
            self.config.max_tick_delta_ms as i64,
            self.config.tick_interval_ms as i64,
        ) {
            self.emit_tick(&st, now, delta, None);
            st.last_tick_ms = Some(now);
        }
        None
    }

    /// The tab became visible or hidden
    pub fn on_visibility_change(&self, visible: bool) {
        let now = self.clock.now_ms();
        let mut st = self.state.lock();
        st.is_visible = visible;
        self.emit(&st, now, EventPayload::VisibilityChange);
    }

    // ============================================
    // Session start
    // ============================================

    /// Resolve channel identity (bounded wait) and start the session
    pub async fn resolve_start(&self, request: StartRequest) {
        let identity = resolve_channel_identity(
            self.context.as_ref(),
            self.config.context_wait(),
            self.config.context_poll(),
        )
        .await;
        self.complete_start(request, identity);
    }

    /// Start the requested session with an already resolved identity
    ///
    /// Dropped if the request was superseded while resolving.
    pub fn complete_start(&self, request: StartRequest, identity: ChannelIdentity) {
        let now = self.clock.now_ms();
        let mut st = self.state.lock();

        if st.resolving.as_deref() != Some(request.video_id.as_str()) {
            tracing::debug!(video_id = %request.video_id, "Start superseded while resolving context");
            return;
        }
        st.resolving = None;

        if st.video_id.as_deref() != Some(request.video_id.as_str()) {
            return;
        }
        st.channel = identity;

        let on_page = video_id_from_url(&self.page.current_url());
        if on_page.as_deref() != Some(request.video_id.as_str()) {
            tracing::debug!(video_id = %request.video_id, "Page moved on while resolving context");
            return;
        }
        if st.is_active() || !self.player_is_playing(&st) {
            return;
        }

        self.start_session(&mut st, now);
    }

    /// Handle the play signal and finish any start it requests
    pub async fn play(&self) {
        if let Some(request) = self.on_play() {
            self.resolve_start(request).await;
        }
    }

    /// Poll and finish any start it requests
    pub async fn poll(&self) {
        if let Some(request) = self.on_poll() {
            self.resolve_start(request).await;
        }
    }

    /// Handle a navigation and finish any start it requests
    pub async fn navigate(&self, transition: &Transition) {
        if let Some(request) = self.on_navigation(transition) {
            self.resolve_start(request).await;
        }
    }

    // ============================================
    // Internals (state lock held)
    // ============================================

    /// Move towards an active session for `video_id`
    fn begin(&self, st: &mut SessionState, video_id: String, now: i64) -> Option<StartRequest> {
        if st.is_active() {
            if st.video_id.as_deref() == Some(video_id.as_str()) {
                return None;
            }
            self.flush_pending_tick(st, StopReason::Navigate, now);
            self.stop_session(st, StopReason::Navigate, now);
            st.clear_context();
        }

        if st.video_id.as_deref() == Some(video_id.as_str()) {
            // Same video replayed, or its context is still resolving
            if st.resolving.is_none() {
                self.start_session(st, now);
            }
            return None;
        }

        st.clear_context();
        st.video_id = Some(video_id.clone());
        st.resolving = Some(video_id.clone());
        Some(StartRequest { video_id })
    }

    fn on_player_halt(&self, new_state: PlayerState, reason: StopReason) {
        let now = self.clock.now_ms();
        let mut st = self.state.lock();

        self.flush_pending_tick(&mut st, reason, now);
        st.player_state = new_state;
        st.is_visible = self.page.is_visible();
        self.emit(&st, now, EventPayload::PlayerStateChange { new_state });
        self.stop_session(&mut st, reason, now);
        st.last_tick_ms = None;
    }

    fn start_session(&self, st: &mut SessionState, now: i64) {
        let video_session_id = uuid::Uuid::new_v4().to_string();
        st.video_session_id = Some(video_session_id.clone());
        st.last_tick_ms = Some(now);

        tracing::info!(
            video_id = st.video_id.as_deref().unwrap_or_default(),
            video_session_id = %video_session_id,
            channel = st.channel.name.as_deref().unwrap_or_default(),
            "Watch session started"
        );
        self.emit(st, now, EventPayload::VideoStart { video_session_id });
    }

    fn stop_session(&self, st: &mut SessionState, reason: StopReason, now: i64) {
        let Some(video_session_id) = st.video_session_id.clone() else {
            return;
        };
        if st.video_id.is_none() {
            return;
        }

        tracing::info!(
            video_id = st.video_id.as_deref().unwrap_or_default(),
            video_session_id = %video_session_id,
            ?reason,
            "Watch session stopped"
        );
        self.emit(
            st,
            now,
            EventPayload::VideoStop {
                video_session_id,
                reason,
            },
        );
        st.video_session_id = None;
        st.last_tick_ms = None;
    }

    /// Emit the corrective tick covering time since the last baseline
    fn flush_pending_tick(&self, st: &mut SessionState, reason: StopReason, now: i64) {
        if !st.is_active() || st.video_id.is_none() {
            return;
        }
        let Some(player) = self.page.player() else {
            return;
        };
        if !player.is_playing() && st.last_tick_ms.is_none() {
            return;
        }

        let Some(last) = st.last_tick_ms.take() else {
            st.last_tick_ms = Some(now);
            return;
        };

        if let Some(delta) = flush_delta(now - last, self.config.max_tick_delta_ms as i64) {
            self.emit_tick(st, now, delta, Some(reason));
        }
    }

    fn emit_tick(&self, st: &SessionState, now: i64, delta: i64, flush_reason: Option<StopReason>) {
        let Some(video_session_id) = st.video_session_id.clone() else {
            return;
        };
        let player = self.page.player();
        self.emit(
            st,
            now,
            EventPayload::WatchTick {
                video_session_id,
                watch_ms_delta: delta,
                position_s: player.as_ref().and_then(|p| p.position_s),
                playback_rate: player.as_ref().and_then(|p| p.playback_rate),
                flush_reason,
            },
        );
    }

    fn maybe_emit_context_missing(&self, st: &mut SessionState, reason: MissingReason, now: i64) {
        if let Some(last) = st.last_context_missing_ms {
            if now - last < self.config.context_missing_window_ms as i64 {
                return;
            }
        }
        st.last_context_missing_ms = Some(now);
        self.emit(
            st,
            now,
            EventPayload::ContextMissing {
                context_type: CONTEXT_TYPE_UNKNOWN.to_string(),
                reason,
            },
        );
    }

    fn player_is_playing(&self, st: &SessionState) -> bool {
        match self.page.player() {
            Some(player) => player.is_playing(),
            None => st.player_state == PlayerState::Playing,
        }
    }

    fn emit(&self, st: &SessionState, now: i64, payload: EventPayload) {
        let event = Event {
            schema: SCHEMA_VERSION,
            event_id: uuid::Uuid::new_v4().to_string(),
            event_ts: now,
            client_session_id: self.client_session_id.clone(),
            tab_id: self.tab_id.clone(),
            video_id: st.video_id.clone(),
            channel_name: st.channel.name.clone(),
            channel_url: st.channel.url.clone(),
            channel_handle: st.channel.handle.clone(),
            channel_id: st.channel.id.clone(),
            url: self.page.current_url(),
            is_visible: st.is_visible,
            watch_mode: WatchMode::from_visibility(st.is_visible),
            player_state: st.player_state,
            tz_offset_min: self.clock.tz_offset_min(),
            payload,
        };
        tracing::trace!(event_type = %event.event_type(), "Emitting event");
        self.sink.submit(event);
    }
}
