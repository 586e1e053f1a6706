//! Scripted replay of page and player signals
//!
//! A script is JSON lines, one step per line:
//!
//! ```text
//! {"at_ms": 0, "url": "https://www.youtube.com/watch?v=abc", "player": "playing", "signal": "play"}
//! {"at_ms": 10000, "signal": "poll"}
//! {"at_ms": 12500, "player": "paused", "signal": "pause"}
//! ```
//!
//! Page fields on a step (`url`, `visible`, `player`, `position_s`, `channel`)
//! update the simulated page before its signal is delivered. Blank lines and
//! lines starting with `#` are ignored.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use watchtrail_core::collector::EventSink;
use watchtrail_core::config::TrackerConfig;
use watchtrail_core::context::{ContextProvider, SharedContext};
use watchtrail_core::tracker::{
    MachineParts, NavigationObserver, PageView, SessionMachine, SharedPage, StartRequest,
};
use watchtrail_core::{ChannelIdentity, Event, ManualClock, PlayerSnapshot, PlayerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptSignal {
    Play,
    Pause,
    Ended,
    Poll,
    Observe,
    Visibility,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptStep {
    /// Milliseconds since the start of the script
    pub at_ms: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub player: Option<PlayerState>,
    #[serde(default)]
    pub position_s: Option<f64>,
    #[serde(default)]
    pub channel: Option<ChannelIdentity>,
    pub signal: ScriptSignal,
}

/// Parse a script, rejecting malformed lines and time going backwards
pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>> {
    let mut steps: Vec<ScriptStep> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step: ScriptStep =
            serde_json::from_str(line).with_context(|| format!("line {}: invalid step", idx + 1))?;

        if let Some(prev) = steps.last() {
            if step.at_ms < prev.at_ms {
                bail!(
                    "line {}: at_ms {} is earlier than previous step ({})",
                    idx + 1,
                    step.at_ms,
                    prev.at_ms
                );
            }
        }
        steps.push(step);
    }

    Ok(steps)
}

/// Drives one [`SessionMachine`] through a script with a manual clock
pub struct Replayer {
    page: SharedPage,
    context: SharedContext,
    clock: Arc<ManualClock>,
    observer: NavigationObserver,
    machine: SessionMachine,
    start_ms: i64,
}

impl Replayer {
    pub fn new(
        client_session_id: &str,
        config: TrackerConfig,
        sink: Arc<dyn EventSink>,
        start_ms: i64,
    ) -> Self {
        let page = SharedPage::new(PageView {
            url: String::new(),
            visible: true,
            player: None,
        });
        let context = SharedContext::default();
        let clock = Arc::new(ManualClock::new(start_ms));

        let machine = SessionMachine::new(
            client_session_id,
            config,
            MachineParts {
                page: Arc::new(page.clone()),
                context: Arc::new(context.clone()),
                sink,
                clock: clock.clone(),
            },
        );

        Self {
            observer: NavigationObserver::new(Arc::new(page.clone())),
            page,
            context,
            clock,
            machine,
            start_ms,
        }
    }

    /// Apply one step
    ///
    /// Channel identity comes from the script, so starts complete at once
    /// instead of waiting for the context deadline.
    pub fn apply(&mut self, step: &ScriptStep) {
        self.clock.set(self.start_ms + step.at_ms);

        if let Some(url) = &step.url {
            self.page.set_url(url.clone());
        }
        if let Some(visible) = step.visible {
            self.page.set_visible(visible);
        }
        if let Some(state) = step.player {
            self.page.set_player_state(state);
        }
        if let Some(position_s) = step.position_s {
            let mut player = self.page.view().player.unwrap_or(PlayerSnapshot {
                state: PlayerState::Unknown,
                position_s: None,
                playback_rate: Some(1.0),
            });
            player.position_s = Some(position_s);
            self.page.set_player(Some(player));
        }
        if let Some(channel) = &step.channel {
            self.context.set(channel.clone());
        }

        let request = match step.signal {
            ScriptSignal::Play => self.machine.on_play(),
            ScriptSignal::Pause => {
                self.machine.on_pause();
                None
            }
            ScriptSignal::Ended => {
                self.machine.on_ended();
                None
            }
            ScriptSignal::Poll => self.machine.on_poll(),
            ScriptSignal::Observe => self
                .observer
                .poll_for_change()
                .and_then(|transition| self.machine.on_navigation(&transition)),
            ScriptSignal::Visibility => {
                self.machine.on_visibility_change(self.page.view().visible);
                None
            }
        };
        self.complete(request);
    }

    #[cfg(test)]
    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    fn complete(&self, request: Option<StartRequest>) {
        if let Some(request) = request {
            self.machine
                .complete_start(request, self.context.channel_identity());
        }
    }
}

/// Prints every event as one JSON line on stdout
#[derive(Debug, Default)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn submit(&self, event: Event) {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl EventSink for Recorder {
        fn submit(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    const SCRIPT: &str = r#"
# open a video and watch for 12.5s
{"at_ms": 0, "url": "https://www.youtube.com/watch?v=abc", "player": "playing", "channel": {"name": "Chan"}, "signal": "play"}
{"at_ms": 10000, "signal": "poll"}
{"at_ms": 12500, "player": "paused", "signal": "pause"}
"#;

    #[test]
    fn test_parse_script_skips_comments_and_blanks() {
        let steps = parse_script(SCRIPT).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].signal, ScriptSignal::Play);
        assert_eq!(steps[0].player, Some(PlayerState::Playing));
        assert_eq!(steps[2].at_ms, 12_500);
    }

    #[test]
    fn test_parse_script_rejects_time_travel() {
        let script = "{\"at_ms\": 5, \"signal\": \"poll\"}\n{\"at_ms\": 1, \"signal\": \"poll\"}";
        let err = parse_script(script).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_script_rejects_unknown_signal() {
        let err = parse_script("{\"at_ms\": 0, \"signal\": \"rewind\"}").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_replay_produces_session() {
        let sink = Arc::new(Recorder::default());
        let mut replayer = Replayer::new("client", TrackerConfig::default(), sink.clone(), 0);
        for step in parse_script(SCRIPT).unwrap() {
            replayer.apply(&step);
        }

        let events = sink.0.lock().unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type().as_str()).collect();
        assert_eq!(
            types,
            vec![
                "player_state_change",
                "video_start",
                "watch_tick",
                "watch_tick",
                "player_state_change",
                "video_stop"
            ]
        );
        assert_eq!(events[1].channel_name.as_deref(), Some("Chan"));
        assert_eq!(events[2].watch_ms_delta(), Some(10_000));
        assert_eq!(events[3].watch_ms_delta(), Some(2_500));
        assert!(!replayer.machine().snapshot().is_active());
    }

    #[test]
    fn test_observe_step_detects_navigation() {
        let sink = Arc::new(Recorder::default());
        let mut replayer = Replayer::new("client", TrackerConfig::default(), sink.clone(), 0);
        let script = r#"
{"at_ms": 0, "url": "https://www.youtube.com/watch?v=abc", "player": "playing", "signal": "observe"}
{"at_ms": 3000, "url": "https://www.youtube.com/", "signal": "observe"}
"#;
        for step in parse_script(script).unwrap() {
            replayer.apply(&step);
        }

        let events = sink.0.lock().unwrap();
        assert_eq!(events[0].event_type().as_str(), "video_start");
        let stop = events.last().unwrap();
        assert_eq!(stop.event_type().as_str(), "video_stop");
        assert_eq!(stop.video_id.as_deref(), Some("abc"));
    }
}
