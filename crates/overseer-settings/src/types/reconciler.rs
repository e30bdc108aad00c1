//! Reconciler and output-retention settings.

use serde::{Deserialize, Serialize};

/// Which candidate wins when two sessions were last active at the same instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TieBreak {
    /// Lexicographically smallest session key.
    #[default]
    LowestKey,
    /// Lexicographically largest session key.
    HighestKey,
}

/// State reconciler tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerSettings {
    /// Recency window for subagent parent inference.
    pub subagent_window_ms: u64,
    /// Activity timestamps kept per session.
    pub activity_history: usize,
    /// Tie-break rule for parent inference.
    pub tie_break: TieBreak,
    /// Listing rows updated more recently than this can be `working`.
    pub working_threshold_ms: u64,
    /// Listing rows updated more recently than this are at least `idle`.
    pub idle_threshold_ms: u64,
    /// Capacity of the change-notification channel.
    pub change_capacity: usize,
    /// Actions kept before the oldest is evicted.
    pub max_actions: usize,
    /// Processes kept before the oldest is evicted.
    pub max_processes: usize,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            subagent_window_ms: 10_000,
            activity_history: 10,
            tie_break: TieBreak::LowestKey,
            working_threshold_ms: 60_000,
            idle_threshold_ms: 300_000,
            change_capacity: 1024,
            max_actions: 5_000,
            max_processes: 500,
        }
    }
}

/// Per-process output retention limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputSettings {
    /// Characters kept per chunk; the tail beyond is cut.
    pub max_chunk_chars: usize,
    /// Chunks kept per process; the oldest are dropped.
    pub max_chunks: usize,
    /// Characters kept per process across all chunks.
    pub max_total_chars: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            max_chunk_chars: 4_000,
            max_chunks: 200,
            max_total_chars: 200_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_break_wire_names() {
        let parsed: TieBreak = serde_json::from_str(r#""highestKey""#).unwrap();
        assert_eq!(parsed, TieBreak::HighestKey);
        assert_eq!(serde_json::to_string(&TieBreak::LowestKey).unwrap(), r#""lowestKey""#);
    }
}
