//! Core domain types for watchtrail
//!
//! These types describe the event stream emitted while a viewer watches
//! resources on a single-page playback surface.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Watch session** | Continuous engagement with one video, bounded by `video_start` and `video_stop` |
//! | **Tick** | Periodic `watch_tick` attributing playing time to the active session |
//! | **Flush** | The final corrective tick emitted at a session boundary |
//! | **Context** | Channel identity resolved for the active video |
//! | **Client session** | Per-installation identifier, stable across restarts |
//! | **Tab** | One tracker instance; every instance gets its own `tab_id` |
//!
//! Every event shares one envelope ([`Event`]) and carries a variant-specific
//! payload ([`EventPayload`]). On the wire an event is a single flat JSON object
//! with `event_type` as the discriminator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema tag carried by every event
pub const SCHEMA_VERSION: u32 = 1;

/// Largest `watch_ms_delta` the collector accepts
pub const MAX_WATCH_MS_DELTA: i64 = 60_000;

// ============================================
// Enumerations
// ============================================

/// Event discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    VideoStart,
    VideoStop,
    WatchTick,
    PlayerStateChange,
    VisibilityChange,
    ContextMissing,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::VideoStart => "video_start",
            EventType::VideoStop => "video_stop",
            EventType::WatchTick => "watch_tick",
            EventType::PlayerStateChange => "player_state_change",
            EventType::VisibilityChange => "visibility_change",
            EventType::ContextMissing => "context_missing",
        }
    }

    /// Whether events of this type belong to a watch session
    pub fn is_session_event(&self) -> bool {
        matches!(
            self,
            EventType::VideoStart | EventType::VideoStop | EventType::WatchTick
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playback state reported by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Playing,
    Paused,
    Ended,
    #[default]
    Unknown,
}

impl PlayerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Ended => "ended",
            PlayerState::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for PlayerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playing" => Ok(PlayerState::Playing),
            "paused" => Ok(PlayerState::Paused),
            "ended" => Ok(PlayerState::Ended),
            "unknown" => Ok(PlayerState::Unknown),
            _ => Err(format!("unknown player state: {}", s)),
        }
    }
}

/// Whether the tab was in the foreground when the event was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    Foreground,
    Background,
}

impl WatchMode {
    pub fn from_visibility(is_visible: bool) -> Self {
        if is_visible {
            WatchMode::Foreground
        } else {
            WatchMode::Background
        }
    }
}

/// Why a session boundary happened
///
/// Used as `reason` on `video_stop` and as `flush_reason` on the corrective
/// tick emitted at the same boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Pause,
    Ended,
    Navigate,
    LeaveWatch,
    Unknown,
}

/// Why a `context_missing` event was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// Playback observed while the page URL carries no watchable id
    NoVideoId,
    /// Play signal received on a page without a watchable id
    PlayWithoutVideoId,
}

// ============================================
// Page and Context
// ============================================

/// Channel identity for the video being watched
///
/// Any field may be missing; an all-`None` identity is valid and means
/// resolution did not find anything before its deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub name: Option<String>,
    pub url: Option<String>,
    pub handle: Option<String>,
    pub id: Option<String>,
}

impl ChannelIdentity {
    /// True when at least one identity field is known
    pub fn is_resolved(&self) -> bool {
        self.name.is_some() || self.url.is_some() || self.handle.is_some() || self.id.is_some()
    }
}

/// Point-in-time view of the media player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub state: PlayerState,
    #[serde(default)]
    pub position_s: Option<f64>,
    #[serde(default)]
    pub playback_rate: Option<f64>,
}

impl PlayerSnapshot {
    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }
}

// ============================================
// Events
// ============================================

/// Variant-specific event fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    VideoStart {
        video_session_id: String,
    },
    VideoStop {
        video_session_id: String,
        reason: StopReason,
    },
    WatchTick {
        video_session_id: String,
        watch_ms_delta: i64,
        position_s: Option<f64>,
        playback_rate: Option<f64>,
        /// Set only on the corrective tick emitted at a session boundary
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flush_reason: Option<StopReason>,
    },
    PlayerStateChange {
        new_state: PlayerState,
    },
    VisibilityChange,
    ContextMissing {
        context_type: String,
        reason: MissingReason,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::VideoStart { .. } => EventType::VideoStart,
            EventPayload::VideoStop { .. } => EventType::VideoStop,
            EventPayload::WatchTick { .. } => EventType::WatchTick,
            EventPayload::PlayerStateChange { .. } => EventType::PlayerStateChange,
            EventPayload::VisibilityChange => EventType::VisibilityChange,
            EventPayload::ContextMissing { .. } => EventType::ContextMissing,
        }
    }

    /// Session id for start, stop and tick events
    pub fn video_session_id(&self) -> Option<&str> {
        match self {
            EventPayload::VideoStart { video_session_id }
            | EventPayload::VideoStop {
                video_session_id, ..
            }
            | EventPayload::WatchTick {
                video_session_id, ..
            } => Some(video_session_id),
            _ => None,
        }
    }
}

/// A single engagement event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub schema: u32,
    pub event_id: String,
    /// Wall-clock milliseconds since the Unix epoch
    pub event_ts: i64,
    pub client_session_id: String,
    pub tab_id: String,
    pub video_id: Option<String>,
    pub channel_name: Option<String>,
    pub channel_url: Option<String>,
    pub channel_handle: Option<String>,
    pub channel_id: Option<String>,
    pub url: String,
    pub is_visible: bool,
    pub watch_mode: WatchMode,
    pub player_state: PlayerState,
    /// Minutes to add to local time to get UTC (positive west of Greenwich)
    pub tz_offset_min: i32,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn video_session_id(&self) -> Option<&str> {
        self.payload.video_session_id()
    }

    /// `watch_ms_delta` for tick events
    pub fn watch_ms_delta(&self) -> Option<i64> {
        match &self.payload {
            EventPayload::WatchTick { watch_ms_delta, .. } => Some(*watch_ms_delta),
            _ => None,
        }
    }

    /// Check the event against the collector's acceptance rules
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema != SCHEMA_VERSION {
            return Err(ValidationError::UnsupportedSchema(self.schema));
        }
        if is_blank(&self.event_id) {
            return Err(ValidationError::Blank("event_id"));
        }
        if is_blank(&self.client_session_id) {
            return Err(ValidationError::Blank("client_session_id"));
        }
        if is_blank(&self.tab_id) {
            return Err(ValidationError::Blank("tab_id"));
        }

        if self.event_type().is_session_event() {
            if self.video_id.as_deref().map_or(true, is_blank) {
                return Err(ValidationError::Blank("video_id"));
            }
            if self.video_session_id().map_or(true, is_blank) {
                return Err(ValidationError::Blank("video_session_id"));
            }
        }

        if let Some(delta) = self.watch_ms_delta() {
            if !(0..=MAX_WATCH_MS_DELTA).contains(&delta) {
                return Err(ValidationError::DeltaOutOfRange(delta));
            }
        }

        Ok(())
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Reasons an event is rejected before it enters the queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported schema {0}")]
    UnsupportedSchema(u32),

    #[error("{0} must be a non-empty string")]
    Blank(&'static str),

    #[error("watch_ms_delta must be within 0..={MAX_WATCH_MS_DELTA}, got {0}")]
    DeltaOutOfRange(i64),
}
