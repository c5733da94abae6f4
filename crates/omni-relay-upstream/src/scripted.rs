//! In-process connector driven from a test.
//!
//! Every successful `connect` produces a [`ScriptedHandle`] on the channel
//! returned by [`ScriptedConnector::new`]. The test pushes upstream events
//! through the handle and reads back what the relay sent.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use omni_relay_core::error::{ConnectError, TransportError};
use omni_relay_core::message::{UpstreamEvent, UpstreamInput};
use omni_relay_core::session::SessionConfig;

use crate::{UpstreamConnector, UpstreamSession, UpstreamSink};

/// How the connector answers `connect`.
#[derive(Debug, Clone)]
pub enum ScriptedBehavior {
    Accept,
    Reject(ConnectError),
    /// Never answer (exercises the connect timeout).
    Hang,
}

pub struct ScriptedConnector {
    behavior: ScriptedBehavior,
    attempts: Arc<AtomicUsize>,
    handles: mpsc::UnboundedSender<ScriptedHandle>,
}

/// Test-side view of one scripted upstream session.
pub struct ScriptedHandle {
    pub config: SessionConfig,
    pub events: mpsc::UnboundedSender<Result<UpstreamEvent, TransportError>>,
    pub inputs: mpsc::UnboundedReceiver<UpstreamInput>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedHandle {
    /// Queue an upstream event.
    pub fn emit(&self, event: UpstreamEvent) {
        let _ = self.events.send(Ok(event));
    }

    /// End the upstream event stream, as if upstream hung up.
    pub fn end_events(&mut self) {
        let (closed, _) = mpsc::unbounded_channel();
        self.events = closed;
    }

    /// Number of times the relay closed this session.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Wait until the relay has closed the session, or the timeout elapses.
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.close_count() == 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl ScriptedConnector {
    pub fn new(behavior: ScriptedBehavior) -> (Self, mpsc::UnboundedReceiver<ScriptedHandle>) {
        let (handles, rx) = mpsc::unbounded_channel();
        (
            Self {
                behavior,
                attempts: Arc::new(AtomicUsize::new(0)),
                handles,
            },
            rx,
        )
    }

    /// Number of `connect` calls so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

struct ScriptedSink {
    inputs: mpsc::UnboundedSender<UpstreamInput>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl UpstreamSink for ScriptedSink {
    async fn send(&mut self, input: UpstreamInput) -> Result<(), TransportError> {
        if self.closes.load(Ordering::SeqCst) > 0 {
            return Err(TransportError::UpstreamClosed {
                code: None,
                reason: "session already closed".into(),
            });
        }
        self.inputs
            .send(input)
            .map_err(|_| TransportError::upstream_eof())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl UpstreamConnector for ScriptedConnector {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn connect(&self, config: &SessionConfig) -> Result<UpstreamSession, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ScriptedBehavior::Accept => {}
            ScriptedBehavior::Reject(err) => return Err(err.clone()),
            ScriptedBehavior::Hang => std::future::pending::<()>().await,
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));

        let handle = ScriptedHandle {
            config: config.clone(),
            events: events_tx,
            inputs: inputs_rx,
            closes: closes.clone(),
        };
        self.handles
            .send(handle)
            .map_err(|_| ConnectError::UpstreamInternal("scripted driver dropped".into()))?;

        Ok(UpstreamSession::new(
            Box::new(ScriptedSink {
                inputs: inputs_tx,
                closes,
            }),
            Box::pin(UnboundedReceiverStream::new(events_rx)),
        ))
    }
}
