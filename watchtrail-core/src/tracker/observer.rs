//! Navigation observer
//!
//! Single-page apps change the URL without reloading, so the observer polls
//! the page location and reports each change exactly once.

use std::sync::Arc;

use super::page::{video_id_from_url, PageSource};

/// A detected change of page location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub previous_url: String,
    pub url: String,
    pub previous_video_id: Option<String>,
    pub video_id: Option<String>,
}

impl Transition {
    pub fn new(previous_url: impl Into<String>, url: impl Into<String>) -> Self {
        let previous_url = previous_url.into();
        let url = url.into();
        Self {
            previous_video_id: video_id_from_url(&previous_url),
            video_id: video_id_from_url(&url),
            previous_url,
            url,
        }
    }

    /// Whether the watchable id differs between the two locations
    pub fn changes_video(&self) -> bool {
        self.previous_video_id != self.video_id
    }
}

/// Polls a [`PageSource`] for location changes
pub struct NavigationObserver {
    page: Arc<dyn PageSource>,
    last_url: String,
}

impl NavigationObserver {
    /// Start observing from the page's current location
    pub fn new(page: Arc<dyn PageSource>) -> Self {
        let last_url = page.current_url();
        Self { page, last_url }
    }

    pub fn last_url(&self) -> &str {
        &self.last_url
    }

    /// Report the change since the previous poll, if any
    pub fn poll_for_change(&mut self) -> Option<Transition> {
        let url = self.page.current_url();
        if url == self.last_url {
            return None;
        }
        let previous_url = std::mem::replace(&mut self.last_url, url.clone());
        Some(Transition::new(previous_url, url))
    }
}
