//! Upstream realtime session abstraction.
//!
//! A connector opens one [`UpstreamSession`] per client connection. The
//! session is handed out already split: the [`UpstreamSink`] half is driven
//! only by the upstream forwarder and the [`UpstreamEvents`] half only by the
//! downstream forwarder, so neither needs a lock.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use omni_relay_core::error::{ConnectError, TransportError};
use omni_relay_core::message::{UpstreamEvent, UpstreamInput};
use omni_relay_core::session::SessionConfig;

pub mod gemini_live;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

pub use gemini_live::GeminiLiveConnector;

/// Inbound event sequence of an upstream session. Ends when upstream closes.
pub type UpstreamEvents =
    Pin<Box<dyn Stream<Item = Result<UpstreamEvent, TransportError>> + Send>>;

/// Outbound half of an upstream session.
#[async_trait]
pub trait UpstreamSink: Send {
    async fn send(&mut self, input: UpstreamInput) -> Result<(), TransportError>;

    /// Close the session. Called once by the owner of the session.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An open upstream session.
pub struct UpstreamSession {
    pub sink: Box<dyn UpstreamSink>,
    pub events: UpstreamEvents,
}

impl UpstreamSession {
    pub fn new(sink: Box<dyn UpstreamSink>, events: UpstreamEvents) -> Self {
        Self { sink, events }
    }

    pub fn split(self) -> (Box<dyn UpstreamSink>, UpstreamEvents) {
        (self.sink, self.events)
    }
}

impl std::fmt::Debug for UpstreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSession").finish_non_exhaustive()
    }
}

/// Opens upstream sessions.
///
/// Implementations must release any transport they opened before returning
/// an error; a returned session is closed by the caller.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Connector identifier (e.g., "gemini-live").
    fn id(&self) -> &str;

    async fn connect(&self, config: &SessionConfig) -> Result<UpstreamSession, ConnectError>;
}
