//! Client connection halves and the axum WebSocket adapter.

use std::pin::Pin;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::debug;

use omni_relay_core::classify::CloseNotice;
use omni_relay_core::error::TransportError;

/// A frame sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Close { code: u16, reason: String },
}

impl From<&CloseNotice> for ClientFrame {
    fn from(notice: &CloseNotice) -> Self {
        ClientFrame::Close {
            code: notice.code,
            reason: notice.reason.clone(),
        }
    }
}

pub type ClientTx = Pin<Box<dyn Sink<ClientFrame, Error = TransportError> + Send>>;

/// Inbound text frames. Ends when the client closes.
pub type ClientRx = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One accepted client connection, split into its two halves.
pub struct ClientConnection {
    pub id: String,
    pub tx: ClientTx,
    pub rx: ClientRx,
}

impl ClientConnection {
    pub fn new(id: impl Into<String>, tx: ClientTx, rx: ClientRx) -> Self {
        Self {
            id: id.into(),
            tx,
            rx,
        }
    }

    pub fn from_websocket(id: impl Into<String>, ws: WebSocket) -> Self {
        let (sink, stream) = ws.split();

        let tx = sink
            .sink_map_err(|_| TransportError::ClientClosed)
            .with(|frame: ClientFrame| async move { Ok::<_, TransportError>(to_ws_message(frame)) });

        Self::new(id, Box::pin(tx), inbound(stream))
    }
}

fn to_ws_message(frame: ClientFrame) -> Message {
    match frame {
        ClientFrame::Text(text) => Message::Text(text.into()),
        ClientFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

fn inbound(stream: futures::stream::SplitStream<WebSocket>) -> ClientRx {
    Box::pin(futures::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some((Ok(text.to_string()), Some(stream))),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some((Ok(text), Some(stream))),
                    Err(_) => debug!("Ignoring non-UTF-8 binary client frame"),
                },
                Some(Ok(Message::Close(_))) | None => return None,
                // Axum answers pings itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Client socket error");
                    return Some((Err(TransportError::ClientClosed), None));
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_relay_core::classify::ErrorKind;

    #[test]
    fn test_close_notice_to_frame() {
        let notice = CloseNotice::new(ErrorKind::RegionUnsupported, "User location is not supported");
        let frame = ClientFrame::from(&notice);
        assert_eq!(
            frame,
            ClientFrame::Close {
                code: 4003,
                reason: notice.reason.clone()
            }
        );
    }

    #[test]
    fn test_ws_message_mapping() {
        assert_eq!(
            to_ws_message(ClientFrame::Text("hi".into())),
            Message::Text("hi".into())
        );
        let Message::Close(Some(frame)) = to_ws_message(ClientFrame::Close {
            code: 1011,
            reason: "boom".into(),
        }) else {
            panic!("expected a close frame");
        };
        assert_eq!(frame.code, 1011);
        assert_eq!(frame.reason.as_str(), "boom");
    }
}
