use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Key of one sliding window: a user in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    user_id: String,
    channel_id: String,
}

impl WindowKey {
    fn new(user_id: &str, channel_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Seen {
    at: DateTime<Utc>,
    text: String,
}

/// Recent messages per user and channel for the rate based triggers.
///
/// Each window keeps at most `limit` messages, none older than `retention`.
/// Windows of users who went quiet are swept once per retention period.
#[derive(Debug)]
pub struct MessageWindow {
    history: DashMap<WindowKey, VecDeque<Seen>>,
    limit: usize,
    retention: chrono::Duration,
    last_sweep: AtomicI64,
}

impl MessageWindow {
    pub fn new(limit: usize, retention: Duration) -> Self {
        Self {
            history: DashMap::new(),
            limit: limit.max(1),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
            last_sweep: AtomicI64::new(0),
        }
    }

    pub fn record(&self, user_id: &str, channel_id: &str, at: DateTime<Utc>, content: &str) {
        self.sweep(at);

        let mut seen = self
            .history
            .entry(WindowKey::new(user_id, channel_id))
            .or_default();
        self.prune(&mut seen, at);
        seen.push_back(Seen {
            at,
            text: normalize(content),
        });
        while seen.len() > self.limit {
            seen.pop_front();
        }
    }

    fn prune(&self, seen: &mut VecDeque<Seen>, now: DateTime<Utc>) {
        while seen.front().is_some_and(|s| now - s.at > self.retention) {
            seen.pop_front();
        }
    }

    /// Must not run while an entry of `history` is held.
    fn sweep(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < self.retention.num_milliseconds() {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.history.retain(|_, seen| {
            self.prune(seen, now);
            !seen.is_empty()
        });
    }

    /// Messages sent within `window` before `now`, inclusive.
    pub fn count_within(&self, user_id: &str, channel_id: &str, now: DateTime<Utc>, window: Duration) -> usize {
        self.matching(user_id, channel_id, now, window, |_| true)
    }

    /// Messages within `window` whose normalized text equals `content`'s.
    pub fn duplicates_within(
        &self,
        user_id: &str,
        channel_id: &str,
        now: DateTime<Utc>,
        window: Duration,
        content: &str,
    ) -> usize {
        let text = normalize(content);
        self.matching(user_id, channel_id, now, window, |seen| seen.text == text)
    }

    fn matching<F>(&self, user_id: &str, channel_id: &str, now: DateTime<Utc>, window: Duration, f: F) -> usize
    where
        F: Fn(&Seen) -> bool,
    {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        self.history
            .get(&WindowKey::new(user_id, channel_id))
            .map(|seen| {
                seen.iter()
                    .filter(|s| s.at <= now && now - s.at <= window)
                    .filter(|s| f(s))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&self) {
        self.history.clear();
    }
}

/// Trimmed and lowercased. Inner whitespace is kept as sent.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HOUR: Duration = Duration::from_secs(3600);

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_count_within_window() {
        let window = MessageWindow::new(50, HOUR);
        for secs in [0, 5, 10, 15, 20] {
            window.record("9", "7", at(secs), "hi");
        }
        assert_eq!(window.count_within("9", "7", at(20), Duration::from_secs(10)), 3);
        assert_eq!(window.count_within("9", "8", at(20), Duration::from_secs(10)), 0);
    }

    #[test]
    fn test_history_limit() {
        let window = MessageWindow::new(2, HOUR);
        for secs in 0..5 {
            window.record("9", "7", at(secs), "hi");
        }
        assert_eq!(window.count_within("9", "7", at(5), Duration::from_secs(60)), 2);
    }

    #[test]
    fn test_duplicates_use_normalized_text() {
        let window = MessageWindow::new(50, HOUR);
        window.record("9", "7", at(0), "Buy NOW");
        window.record("9", "7", at(1), "  buy now\n");
        window.record("9", "7", at(2), "buy  now");
        window.record("9", "7", at(3), "something else");
        assert_eq!(
            window.duplicates_within("9", "7", at(3), Duration::from_secs(60), "BUY now"),
            2
        );
    }

    #[test]
    fn test_quiet_windows_are_swept() {
        let window = MessageWindow::new(50, Duration::from_secs(60));
        for user in 0..1000 {
            window.record(&user.to_string(), "7", at(0), "hi");
        }
        assert_eq!(window.len(), 1000);
        window.record("late", "7", at(100_000), "hi");
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_old_messages_leave_the_window() {
        let window = MessageWindow::new(50, Duration::from_secs(10));
        window.record("9", "7", at(0), "hi");
        window.record("9", "7", at(5), "hi");
        window.record("9", "7", at(30), "hi");
        assert_eq!(window.count_within("9", "7", at(30), Duration::from_secs(3600)), 1);
    }
}
