//! The two forwarding loops of a bridged connection.
//!
//! Each loop borrows its halves from the bridge, so the bridge closes both
//! sides exactly once after the loops return. Every await, sends included,
//! is raced against the shared token. A loop that ends on its own cancels
//! the token; a loop that observes the token ends with no reason.

use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use omni_relay_core::error::TransportError;
use omni_relay_core::message::{RelayMessage, UpstreamEvent};
use omni_relay_core::translate::{decode_inbound, encode_outbound};
use omni_relay_upstream::{UpstreamEvents, UpstreamSink};

use crate::bridge::TerminationReason;
use crate::client::{ClientFrame, ClientRx, ClientTx};
use crate::resumption::ResumptionState;

/// How a forwarding loop ended.
#[derive(Debug, Default)]
pub struct ForwardEnd {
    /// `None` when the loop was cancelled.
    pub reason: Option<TerminationReason>,
    pub frames: u64,
}

/// Translate one upstream event into the frames the client sees.
pub(crate) fn downstream_messages(
    event: UpstreamEvent,
    resumption: &mut ResumptionState,
) -> Vec<RelayMessage> {
    match event {
        UpstreamEvent::Content { parts } => {
            let parts: Vec<_> = parts.into_iter().filter(|p| !p.is_empty()).collect();
            if parts.is_empty() {
                Vec::new()
            } else {
                vec![RelayMessage::ModelTurn { parts }]
            }
        }
        UpstreamEvent::ResumptionUpdate {
            handle: Some(handle),
            resumable: true,
        } => {
            if resumption.observe(handle.clone()) {
                vec![RelayMessage::ResumptionToken { handle }]
            } else {
                Vec::new()
            }
        }
        UpstreamEvent::ResumptionUpdate { .. } => Vec::new(),
        UpstreamEvent::TurnComplete => vec![RelayMessage::TurnComplete],
        UpstreamEvent::Interrupted => vec![RelayMessage::Interrupted],
        UpstreamEvent::Transcription { source, text } if !text.is_empty() => {
            vec![RelayMessage::Transcription { source, text }]
        }
        UpstreamEvent::Transcription { .. } => Vec::new(),
        UpstreamEvent::GoAway { time_left } => vec![RelayMessage::GoAway { time_left }],
        // Already consumed during connect.
        UpstreamEvent::SetupComplete => Vec::new(),
    }
}

/// Upstream events -> client, until upstream ends or the client stops accepting.
pub async fn run_downstream(
    conn_id: &str,
    events: &mut UpstreamEvents,
    tx: &mut ClientTx,
    resumption: &mut ResumptionState,
    cancel: &CancellationToken,
) -> ForwardEnd {
    let mut frames = 0u64;

    let reason = 'outer: loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break None,
            event = events.next() => event,
        };

        let event = match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => break Some(TerminationReason::Transport(e)),
            None => break Some(TerminationReason::Transport(TransportError::upstream_eof())),
        };
        trace!(conn_id = %conn_id, ?event, "Upstream event");

        for msg in downstream_messages(event, resumption) {
            if let RelayMessage::ResumptionToken { .. } = &msg {
                debug!(conn_id = %conn_id, updates = resumption.updates(), "Resumption token updated");
            }
            let sent = tokio::select! {
                _ = cancel.cancelled() => break 'outer None,
                sent = tx.send(ClientFrame::Text(encode_outbound(&msg))) => sent,
            };
            if sent.is_err() {
                break 'outer Some(TerminationReason::Transport(TransportError::ClientClosed));
            }
            frames += 1;
            #[cfg(feature = "metrics")]
            crate::metrics::record_frame("downstream");
        }
    };

    if reason.is_some() {
        cancel.cancel();
    }
    ForwardEnd { reason, frames }
}

/// Client frames -> upstream, until the client goes away or a send fails.
///
/// `held` holds content decoded from the first frame, sent before anything
/// else.
pub async fn run_upstream(
    conn_id: &str,
    rx: &mut ClientRx,
    sink: &mut dyn UpstreamSink,
    held: Vec<RelayMessage>,
    cancel: &CancellationToken,
) -> ForwardEnd {
    let mut frames = 0u64;

    let reason = 'outer: {
        for msg in held {
            if let Some(input) = msg.to_upstream_input() {
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break 'outer None,
                    sent = sink.send(input) => sent,
                };
                if let Err(e) = sent {
                    break 'outer Some(TerminationReason::Transport(e));
                }
                frames += 1;
            }
        }

        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => break 'outer None,
                raw = rx.next() => raw,
            };

            let raw = match raw {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => break 'outer Some(TerminationReason::Transport(e)),
                None => break 'outer Some(TerminationReason::Transport(TransportError::ClientClosed)),
            };

            let messages = match decode_inbound(&raw) {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(conn_id = %conn_id, error = %e, "Dropping undecodable client frame");
                    continue;
                }
            };

            for msg in messages {
                if let RelayMessage::Setup(_) = msg {
                    debug!(conn_id = %conn_id, "Ignoring setup frame after bridging");
                    continue;
                }
                let Some(input) = msg.to_upstream_input() else {
                    trace!(conn_id = %conn_id, "Ignoring client frame with no upstream form");
                    continue;
                };
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break 'outer None,
                    sent = sink.send(input) => sent,
                };
                if let Err(e) = sent {
                    break 'outer Some(TerminationReason::Transport(e));
                }
                frames += 1;
                #[cfg(feature = "metrics")]
                crate::metrics::record_frame("upstream");
            }
        }
    };

    if reason.is_some() {
        cancel.cancel();
    }
    ForwardEnd { reason, frames }
}
