//! Cold-start status derivation for bulk session listings.

use chrono::{DateTime, Utc};
use overseer_protocol::SessionRow;
use overseer_settings::ReconcilerSettings;

use crate::model::SessionStatus;

/// Recency thresholds used by [`derive_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusThresholds {
    /// Rows younger than this whose output advanced are `working`.
    pub working_ms: u64,
    /// Rows younger than this are `idle`; older rows are `stopped`.
    pub idle_ms: u64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self::from(&ReconcilerSettings::default())
    }
}

impl From<&ReconcilerSettings> for StatusThresholds {
    fn from(settings: &ReconcilerSettings) -> Self {
        Self {
            working_ms: settings.working_threshold_ms,
            idle_ms: settings.idle_threshold_ms,
        }
    }
}

/// Derive a session's status from a listing row.
///
/// `previous_output` is the output-token count seen at the previous
/// observation of the same session; an unseen session counts as zero.
/// An aborted last run forces `error` regardless of recency. A row without
/// `updatedAt` is `stopped`. Timestamps in the future count as age zero.
pub fn derive_status(
    row: &SessionRow,
    previous_output: Option<u64>,
    now: DateTime<Utc>,
    thresholds: StatusThresholds,
) -> SessionStatus {
    if row.aborted_last_run {
        return SessionStatus::Error;
    }
    let Some(updated_at) = row.updated_at else {
        return SessionStatus::Stopped;
    };
    let age_ms = u64::try_from(now.timestamp_millis().saturating_sub(updated_at)).unwrap_or(0);
    let advanced = row.output_tokens.unwrap_or(0) > previous_output.unwrap_or(0);

    if age_ms < thresholds.working_ms && advanced {
        SessionStatus::Working
    } else if age_ms < thresholds.idle_ms {
        SessionStatus::Idle
    } else {
        SessionStatus::Stopped
    }
}
