//! Bounded process output retention.
//!
//! Three limits apply to every process, in this order on each push:
//! 1. per-chunk characters: the tail is cut and the chunk is marked
//! 2. chunk count: the oldest chunks are dropped
//! 3. aggregate characters: the oldest chunks are dropped until under budget
//!
//! Every cut or drop is counted so readers can tell the output is partial.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use overseer_settings::OutputSettings;
use serde::{Deserialize, Serialize};

/// Retention limits for one process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputLimits {
    /// Characters kept per chunk.
    pub max_chunk_chars: usize,
    /// Chunks kept per process.
    pub max_chunks: usize,
    /// Characters kept per process.
    pub max_total_chars: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self::from(&OutputSettings::default())
    }
}

impl From<&OutputSettings> for OutputLimits {
    fn from(settings: &OutputSettings) -> Self {
        Self {
            max_chunk_chars: settings.max_chunk_chars,
            max_chunks: settings.max_chunks,
            max_total_chars: settings.max_total_chars,
        }
    }
}

/// One retained chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputChunk {
    /// `stdout`, `stderr`, ...
    pub stream: Option<String>,
    /// Retained text.
    pub text: String,
    /// Whether the tail of this chunk was cut.
    pub truncated: bool,
    /// Arrival time.
    pub at: DateTime<Utc>,
}

/// Retained output of one process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    chunks: VecDeque<OutputChunk>,
    total_chars: usize,
    /// Chunks dropped from the front.
    pub dropped_chunks: u64,
    /// Chunks whose tail was cut.
    pub truncated_chunks: u64,
}

impl ProcessOutput {
    /// Append a chunk under `limits`.
    pub fn push(
        &mut self,
        stream: Option<String>,
        text: &str,
        at: DateTime<Utc>,
        limits: OutputLimits,
    ) {
        let (text, truncated) = match text.char_indices().nth(limits.max_chunk_chars) {
            Some((cut, _)) => (text[..cut].to_string(), true),
            None => (text.to_string(), false),
        };
        if truncated {
            self.truncated_chunks += 1;
        }
        self.total_chars += text.chars().count();
        self.chunks.push_back(OutputChunk {
            stream,
            text,
            truncated,
            at,
        });

        while self.chunks.len() > limits.max_chunks {
            self.drop_oldest();
        }
        while self.total_chars > limits.max_total_chars && !self.chunks.is_empty() {
            self.drop_oldest();
        }
    }

    fn drop_oldest(&mut self) {
        if let Some(chunk) = self.chunks.pop_front() {
            self.total_chars -= chunk.text.chars().count();
            self.dropped_chunks += 1;
        }
    }

    /// Retained chunks, oldest first.
    pub fn chunks(&self) -> impl Iterator<Item = &OutputChunk> {
        self.chunks.iter()
    }

    /// Number of retained chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Retained characters across all chunks.
    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    /// Whether anything was cut or dropped.
    pub fn is_lossy(&self) -> bool {
        self.dropped_chunks > 0 || self.truncated_chunks > 0
    }

    /// Retained text concatenated in order.
    pub fn text(&self) -> String {
        self.chunks.iter().map(|c| c.text.as_str()).collect()
    }
}
