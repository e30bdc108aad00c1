//! # overseer-protocol
//!
//! Wire-level vocabulary shared by the gateway client and the state
//! reconciler:
//!
//! - **Frames**: [`Frame`] union of request/response/event frames
//! - **Handshake**: [`ConnectParams`], [`ConnectChallenge`], [`HelloOk`]
//! - **Events**: [`GatewayEvent`] typed push payloads with schema validation
//! - **Session keys**: [`SessionKey`] total parser for
//!   `agent:<agentId>:<platform>:<relationKind>:<recipient>`
//! - **Content**: [`extract_text`] text-block extraction rule
//! - **Methods**: RPC names and result shapes

#![deny(unsafe_code)]

pub mod content;
pub mod events;
pub mod frames;
pub mod handshake;
pub mod methods;
pub mod session_key;

pub use content::{extract_message_text, extract_text};
pub use events::{
    AgentEvent, ChatEvent, ChatState, ExecCompleted, ExecOutput, ExecStarted, GatewayEvent,
    PayloadError, Usage, is_system_event,
};
pub use frames::{ErrorShape, EventFrame, Frame, RequestFrame, ResponseFrame, StateVersion};
pub use handshake::{
    ClientInfo, ConnectAuth, ConnectChallenge, ConnectParams, Features, HELLO_OK, HelloOk,
    PROTOCOL_VERSION, ServerInfo, Snapshot,
};
pub use methods::{ChatHistory, ChatHistoryParams, ChatMessage, SessionRow, SessionsList};
pub use session_key::{RelationKind, SessionKey};
