//! # overseer-state
//!
//! Event-derived state for the overseer gateway client.
//!
//! - [`normalize()`]: pure mapping from a raw event frame to an optional
//!   [`NormalizedUpdate`]
//! - [`Reconciler`]: the session/action/process store the updates are
//!   folded into, with snapshot reads and change notifications
//! - [`derive_status`]: cold-start status from a bulk listing row
//! - [`ActivityLog`]: bounded activity history and sub-agent parent inference
//! - [`ProcessOutput`]: bounded per-process output retention

#![deny(unsafe_code)]

pub mod lineage;
pub mod model;
pub mod normalize;
pub mod reconciler;
pub mod retention;
pub mod status;

pub use lineage::ActivityLog;
pub use model::{Action, ActionKind, Process, Session, SessionStatus, StateChange};
pub use normalize::{
    ActionUpdate, NormalizedUpdate, ProcessEvent, ProcessUpdate, SessionDelta, normalize,
};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use retention::{OutputChunk, OutputLimits, ProcessOutput};
pub use status::{StatusThresholds, derive_status};
