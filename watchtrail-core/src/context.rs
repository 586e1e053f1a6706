//! Channel identity resolution
//!
//! Page metadata shows up some time after navigation, so the session machine
//! re-queries its [`ContextProvider`] until something is found or the wait
//! deadline passes. A timeout is not an error: the session starts with an
//! all-`None` identity.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::types::ChannelIdentity;

/// Looks up the channel identity for whatever the page currently shows
///
/// Implementations must return quickly; waiting is handled by
/// [`resolve_channel_identity`].
pub trait ContextProvider: Send + Sync {
    fn channel_identity(&self) -> ChannelIdentity;
}

/// Provider that never finds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

impl ContextProvider for NoContext {
    fn channel_identity(&self) -> ChannelIdentity {
        ChannelIdentity::default()
    }
}

/// Provider backed by a value the caller can swap at any time
#[derive(Debug, Default, Clone)]
pub struct SharedContext {
    inner: Arc<Mutex<ChannelIdentity>>,
}

impl SharedContext {
    pub fn new(identity: ChannelIdentity) -> Self {
        Self {
            inner: Arc::new(Mutex::new(identity)),
        }
    }

    pub fn set(&self, identity: ChannelIdentity) {
        *self.inner.lock() = identity;
    }
}

impl ContextProvider for SharedContext {
    fn channel_identity(&self) -> ChannelIdentity {
        self.inner.lock().clone()
    }
}

/// Poll `provider` every `interval` until it yields a resolved identity or
/// `max_wait` elapses, then return the last answer.
pub async fn resolve_channel_identity(
    provider: &dyn ContextProvider,
    max_wait: Duration,
    interval: Duration,
) -> ChannelIdentity {
    let deadline = Instant::now() + max_wait;

    while Instant::now() < deadline {
        let identity = provider.channel_identity();
        if identity.is_resolved() {
            return identity;
        }
        tokio::time::sleep(interval).await;
    }

    let identity = provider.channel_identity();
    if !identity.is_resolved() {
        tracing::debug!(
            waited_ms = max_wait.as_millis() as u64,
            "Channel identity unresolved, continuing without it"
        );
    }
    identity
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolves only after a fixed number of lookups
    struct SlowProvider {
        calls: AtomicUsize,
        ready_after: usize,
    }

    impl ContextProvider for SlowProvider {
        fn channel_identity(&self) -> ChannelIdentity {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_after {
                ChannelIdentity {
                    name: Some("Late Channel".to_string()),
                    ..Default::default()
                }
            } else {
                ChannelIdentity::default()
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_once_metadata_appears() {
        let provider = SlowProvider {
            calls: AtomicUsize::new(0),
            ready_after: 4,
        };

        let started = Instant::now();
        let identity = resolve_channel_identity(
            &provider,
            Duration::from_millis(2_500),
            Duration::from_millis(120),
        )
        .await;

        assert_eq!(identity.name.as_deref(), Some("Late Channel"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(360));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_deadline() {
        let started = Instant::now();
        let identity = resolve_channel_identity(
            &NoContext,
            Duration::from_millis(2_500),
            Duration::from_millis(120),
        )
        .await;

        assert!(!identity.is_resolved());
        assert!(started.elapsed() >= Duration::from_millis(2_500));
        assert!(started.elapsed() < Duration::from_millis(2_700));
    }

    #[tokio::test]
    async fn test_shared_context_resolves_immediately() {
        let provider = SharedContext::new(ChannelIdentity {
            handle: Some("@now".to_string()),
            ..Default::default()
        });
        let identity = resolve_channel_identity(
            &provider,
            Duration::from_secs(5),
            Duration::from_millis(120),
        )
        .await;
        assert_eq!(identity.handle.as_deref(), Some("@now"));
    }
}
