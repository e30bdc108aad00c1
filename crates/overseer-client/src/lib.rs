//! # overseer-client
//!
//! WebSocket client for the agent gateway.
//!
//! - [`GatewayClient`]: connection lifecycle, challenge/connect handshake,
//!   single-shot reconnect after an abnormal close, typed RPC helpers
//! - [`Correlator`]: request ids, pending table, per-request deadlines
//! - [`EventDispatcher`]: raw event fan-out and system/domain routing
//!
//! Domain events are normalized and folded into an
//! [`overseer_state::Reconciler`] owned by the client; system events keep
//! the [`GatewaySnapshot`] current.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
mod listeners;
pub mod snapshot;

pub use client::GatewayClient;
pub use config::ClientConfig;
pub use correlator::Correlator;
pub use dispatcher::{EventDispatcher, Route};
pub use error::GatewayError;
pub use listeners::ListenerHandle;
pub use snapshot::{ConnectionStatus, GatewaySnapshot};
