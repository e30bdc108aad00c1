//! Sub-agent parent inference.
//!
//! Each session keeps a short history of recent activity instants. A
//! sub-agent that shows up without an explicit parent is attached to the
//! non-sub-agent session most recently active inside the recency window.
//! Nothing outside the window is ever considered.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use overseer_protocol::SessionKey;
use overseer_settings::TieBreak;

/// Bounded per-session activity history.
#[derive(Clone, Debug, Default)]
pub struct ActivityLog {
    capacity: usize,
    entries: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl ActivityLog {
    /// Keep at most `capacity` instants per session.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    /// Record activity on `key` at `at`. Repeating the latest instant is a no-op.
    pub fn record(&mut self, key: &str, at: DateTime<Utc>) {
        let history = self.entries.entry(key.to_string()).or_default();
        if history.back() == Some(&at) {
            return;
        }
        history.push_back(at);
        while history.len() > self.capacity {
            let _ = history.pop_front();
        }
    }

    /// Recorded instants for `key`, oldest first.
    pub fn history(&self, key: &str) -> Vec<DateTime<Utc>> {
        self.entries
            .get(key)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Pick a parent for the sub-agent `child` first seen at `now`.
    ///
    /// Candidates are non-sub-agent sessions with an activity instant in
    /// `[now - window, now]`. The latest instant wins; equal instants are
    /// resolved by `tie_break` on the session key. A window reaching past
    /// the representable range yields no candidate.
    pub fn infer_parent(
        &self,
        child: &str,
        now: DateTime<Utc>,
        window: Duration,
        tie_break: TieBreak,
    ) -> Option<String> {
        let earliest = now.checked_sub_signed(window)?;
        let mut best: Option<(DateTime<Utc>, &str)> = None;

        for (key, history) in &self.entries {
            if key == child || SessionKey::parse(key).is_subagent() {
                continue;
            }
            let Some(latest) = history
                .iter()
                .copied()
                .filter(|t| *t >= earliest && *t <= now)
                .max()
            else {
                continue;
            };
            best = match best {
                Some((t, k)) if latest < t || (latest == t && !prefer(key, k, tie_break)) => {
                    Some((t, k))
                }
                _ => Some((latest, key.as_str())),
            };
        }

        best.map(|(_, key)| key.to_string())
    }
}

fn prefer(candidate: &str, current: &str, tie_break: TieBreak) -> bool {
    match tie_break {
        TieBreak::LowestKey => candidate < current,
        TieBreak::HighestKey => candidate > current,
    }
}
