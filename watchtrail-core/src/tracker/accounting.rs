//! Watch-time accounting
//!
//! Time between two baselines is an approximation: every interval is clamped
//! independently so a suspended machine (laptop sleep, throttled background
//! tab) cannot attribute minutes of phantom playback to a session.

/// Clamp elapsed milliseconds into `[0, bound_ms]`
pub fn clamp_delta(elapsed_ms: i64, bound_ms: i64) -> i64 {
    elapsed_ms.clamp(0, bound_ms.max(0))
}

/// Delta for a periodic tick, if one is due
///
/// The elapsed time is clamped to `max_delta_ms`; no tick is due until it
/// reaches `interval_ms`, and the emitted delta never exceeds `interval_ms`.
pub fn periodic_tick_delta(elapsed_ms: i64, max_delta_ms: i64, interval_ms: i64) -> Option<i64> {
    let delta = clamp_delta(elapsed_ms, max_delta_ms);
    if delta <= 0 || delta < interval_ms {
        return None;
    }
    Some(delta.min(interval_ms))
}

/// Delta for the corrective tick at a session boundary
///
/// `None` when nothing positive is left to account.
pub fn flush_delta(elapsed_ms: i64, max_delta_ms: i64) -> Option<i64> {
    let delta = clamp_delta(elapsed_ms, max_delta_ms);
    (delta > 0).then_some(delta)
}
