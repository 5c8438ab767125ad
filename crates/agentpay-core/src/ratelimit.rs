//! Generic sliding-window rate limiting (SPEC_FULL.md §C.3), grounded on the original
//! `sardis_protocol/rate_limiter.py` multi-window counter. Shared by the mandate verifier
//! (spec.md §4.1 check 10), the trust framework's velocity governor (§4.2), and treasury
//! ACH ingestion (§4.8).

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// A single window's bound: at most `limit` events within `window`.
#[derive(Debug, Clone, Copy)]
pub struct WindowLimit {
    pub window: Duration,
    pub limit: usize,
}

impl WindowLimit {
    pub fn new(window: Duration, limit: usize) -> Self {
        Self { window, limit }
    }
}

/// Named windows matching spec.md's minute/hour/day vocabulary, used both for per-agent
/// mandate rate limiting and for the velocity governor's independent limits.
#[derive(Debug, Clone, Copy)]
pub struct WindowSet {
    pub minute: WindowLimit,
    pub hour: WindowLimit,
    pub day: WindowLimit,
}

impl WindowSet {
    /// Velocity governor defaults from spec.md §4.2: 10/minute, 100/hour, 500/day.
    pub fn velocity_defaults() -> Self {
        Self {
            minute: WindowLimit::new(Duration::minutes(1), 10),
            hour: WindowLimit::new(Duration::hours(1), 100),
            day: WindowLimit::new(Duration::days(1), 500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    pub fn reason_code(&self) -> &'static str {
        match self {
            WindowKind::Minute => "rate_limit_minute",
            WindowKind::Hour => "rate_limit_hour",
            WindowKind::Day => "rate_limit_day",
        }
    }
}

/// A sliding-window counter per key (agent id, org id, webhook source, ...). Each window
/// keeps a deque of event timestamps and trims entries older than the window on every call,
/// giving true sliding-window semantics rather than fixed buckets.
#[derive(Default)]
pub struct SlidingWindowLimiter {
    state: Mutex<HashMap<String, PerKeyState>>,
}

#[derive(Default)]
struct PerKeyState {
    minute: VecDeque<DateTime<Utc>>,
    hour: VecDeque<DateTime<Utc>>,
    day: VecDeque<DateTime<Utc>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one event for `key` at `now` and checks all three windows. Returns the first
    /// window that would be exceeded (minute checked first, matching the "sliding windows of
    /// 1 minute / 1 hour / 1 day" ordering in spec.md §4.1 check 10), or `None` if the
    /// request is within all limits. The event is only recorded if no window is exceeded —
    /// a rejected request must not consume quota (spec.md §5: rejected before signature work).
    pub fn check_and_record(&self, key: &str, windows: &WindowSet, now: DateTime<Utc>) -> Option<WindowKind> {
        let mut guard = self.state.lock().expect("rate limiter mutex poisoned");
        let entry = guard.entry(key.to_string()).or_default();

        trim(&mut entry.minute, now - windows.minute.window);
        trim(&mut entry.hour, now - windows.hour.window);
        trim(&mut entry.day, now - windows.day.window);

        if entry.minute.len() >= windows.minute.limit {
            return Some(WindowKind::Minute);
        }
        if entry.hour.len() >= windows.hour.limit {
            return Some(WindowKind::Hour);
        }
        if entry.day.len() >= windows.day.limit {
            return Some(WindowKind::Day);
        }

        entry.minute.push_back(now);
        entry.hour.push_back(now);
        entry.day.push_back(now);
        None
    }

    pub fn current_counts(&self, key: &str) -> (usize, usize, usize) {
        let guard = self.state.lock().expect("rate limiter mutex poisoned");
        match guard.get(key) {
            Some(entry) => (entry.minute.len(), entry.hour.len(), entry.day.len()),
            None => (0, 0, 0),
        }
    }
}

fn trim(deque: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while let Some(front) = deque.front() {
        if *front < cutoff {
            deque.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = SlidingWindowLimiter::new();
        let windows = WindowSet {
            minute: WindowLimit::new(Duration::minutes(1), 2),
            hour: WindowLimit::new(Duration::hours(1), 100),
            day: WindowLimit::new(Duration::days(1), 500),
        };
        let now = Utc::now();
        assert!(limiter.check_and_record("agent_1", &windows, now).is_none());
        assert!(limiter.check_and_record("agent_1", &windows, now).is_none());
        assert_eq!(limiter.check_and_record("agent_1", &windows, now), Some(WindowKind::Minute));
    }

    #[test]
    fn sliding_window_forgets_old_events() {
        let limiter = SlidingWindowLimiter::new();
        let windows = WindowSet {
            minute: WindowLimit::new(Duration::minutes(1), 1),
            hour: WindowLimit::new(Duration::hours(1), 100),
            day: WindowLimit::new(Duration::days(1), 500),
        };
        let t0 = Utc::now();
        assert!(limiter.check_and_record("agent_2", &windows, t0).is_none());
        assert!(limiter.check_and_record("agent_2", &windows, t0 + Duration::seconds(10)).is_some());
        let later = t0 + Duration::minutes(2);
        assert!(limiter.check_and_record("agent_2", &windows, later).is_none());
    }
}
