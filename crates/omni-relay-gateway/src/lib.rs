//! WebSocket gateway bridging browser clients to Gemini Live sessions.
//!
//! Each client connection gets one [`SessionBridge`], which opens an upstream
//! session with the client's setup overrides and then runs two forwarders
//! until either side ends. Failures are classified into a close code the
//! client can act on.

pub mod bridge;
pub mod client;
pub mod forward;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod resumption;
pub mod server;
pub mod settings;
pub mod state;

pub use bridge::{BridgeOutcome, BridgeState, SessionBridge, TerminationReason};
pub use client::{ClientConnection, ClientFrame};
pub use server::{router, start_gateway};
pub use settings::{ParticipantSettings, SettingsStore};
pub use state::GatewayState;
