//! Narrow view of the playback surface
//!
//! The tracker never touches a UI toolkit directly. Hosts implement
//! [`PageSource`] (or feed a [`SharedPage`]) with the current URL, tab
//! visibility and player state.

use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::types::{PlayerSnapshot, PlayerState};

/// Read-only access to the page being tracked
pub trait PageSource: Send + Sync {
    /// Current location of the page
    fn current_url(&self) -> String;

    /// Whether the tab is currently visible
    fn is_visible(&self) -> bool;

    /// The media player, if the page has one
    fn player(&self) -> Option<PlayerSnapshot>;
}

/// Extract the watchable id from a page URL
///
/// The id is the non-empty `v` query parameter; anything else (including an
/// unparseable URL) has no id.
pub fn video_id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Plain snapshot of everything a [`PageSource`] reports
#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub url: String,
    pub visible: bool,
    pub player: Option<PlayerSnapshot>,
}

impl Default for PageView {
    fn default() -> Self {
        Self {
            url: String::new(),
            visible: true,
            player: None,
        }
    }
}

/// A [`PageSource`] whose contents the host updates as the page changes
///
/// Cloning shares the same underlying view.
#[derive(Debug, Default, Clone)]
pub struct SharedPage {
    view: Arc<Mutex<PageView>>,
}

impl SharedPage {
    pub fn new(view: PageView) -> Self {
        Self {
            view: Arc::new(Mutex::new(view)),
        }
    }

    pub fn set_url(&self, url: impl Into<String>) {
        self.view.lock().url = url.into();
    }

    pub fn set_visible(&self, visible: bool) {
        self.view.lock().visible = visible;
    }

    pub fn set_player(&self, player: Option<PlayerSnapshot>) {
        self.view.lock().player = player;
    }

    /// Update only the player state, creating a player if there was none
    pub fn set_player_state(&self, state: PlayerState) {
        let mut view = self.view.lock();
        match view.player.as_mut() {
            Some(player) => player.state = state,
            None => {
                view.player = Some(PlayerSnapshot {
                    state,
                    position_s: None,
                    playback_rate: None,
                })
            }
        }
    }

    pub fn view(&self) -> PageView {
        self.view.lock().clone()
    }
}

impl PageSource for SharedPage {
    fn current_url(&self) -> String {
        self.view.lock().url.clone()
    }

    fn is_visible(&self) -> bool {
        self.view.lock().visible
    }

    fn player(&self) -> Option<PlayerSnapshot> {
        self.view.lock().player.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_from_watch_url() {
        assert_eq!(
            video_id_from_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            video_id_from_url("https://www.youtube.com/watch?list=PL1&v=abc"),
            Some("abc".to_string())
        );
    }

    #[test]
    fn test_video_id_missing_or_empty() {
        assert_eq!(video_id_from_url("https://www.youtube.com/"), None);
        assert_eq!(video_id_from_url("https://www.youtube.com/watch?v="), None);
        assert_eq!(video_id_from_url("https://www.youtube.com/@channel"), None);
        assert_eq!(video_id_from_url("not a url"), None);
        assert_eq!(video_id_from_url(""), None);
    }

    #[test]
    fn test_shared_page_updates_are_visible_to_clones() {
        let page = SharedPage::default();
        let reader = page.clone();

        page.set_url("https://www.youtube.com/watch?v=x");
        page.set_visible(false);
        page.set_player_state(PlayerState::Paused);

        assert_eq!(reader.current_url(), "https://www.youtube.com/watch?v=x");
        assert!(!reader.is_visible());
        assert_eq!(reader.player().map(|p| p.state), Some(PlayerState::Paused));
    }
}
