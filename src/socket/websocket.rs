//! WebSocket transport.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::frame::{encode_frame, FrameBuffer};
use super::{
    ConnectRequest, Connector, Outbound, TransportEvent, TransportHandle, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
    NO_STATUS_RECEIVED,
};
use crate::error::ConnectionError;

/// Opens WebSocket connections to the protocol endpoint.
///
/// Each open connection runs two pump tasks: one writes length-prefixed
/// frames from the outgoing channel, the other splits incoming messages
/// back into frames. Dropping the outgoing sender closes the socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, request: ConnectRequest) -> BoxFuture<'static, Result<TransportHandle, ConnectionError>> {
        Box::pin(open(request))
    }
}

/// The event for a close frame received from the peer.
fn close_event(frame: Option<CloseFrame<'_>>) -> TransportEvent {
    match frame {
        Some(f) => TransportEvent::Closed {
            code: u16::from(f.code),
            reason: f.reason.into_owned(),
        },
        None => TransportEvent::Closed {
            code: NO_STATUS_RECEIVED,
            reason: String::new(),
        },
    }
}

fn header(value: &str) -> Result<HeaderValue, ConnectionError> {
    HeaderValue::from_str(value).map_err(|e| ConnectionError::Transport(format!("invalid header {value:?}: {e}")))
}

async fn open(request: ConnectRequest) -> Result<TransportHandle, ConnectionError> {
    let mut http = request
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectionError::Refused(e.to_string()))?;
    http.headers_mut().insert("Origin", header(&request.origin)?);
    http.headers_mut().insert("User-Agent", header(&request.user_agent)?);

    let (ws, _response) = connect_async(http)
        .await
        .map_err(|e| ConnectionError::Refused(e.to_string()))?;
    debug!("websocket open to {}", request.endpoint);

    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

    tokio::spawn(async move {
        let mut close_code = NORMAL_CLOSURE;
        while let Some(outbound) = out_rx.recv().await {
            match outbound {
                Outbound::Frame(payload) => {
                    let frame = match encode_frame(&payload) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("dropping outbound frame: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Binary(frame)).await {
                        warn!("websocket send failed: {e}");
                        return;
                    }
                }
                Outbound::Close(code) => {
                    close_code = code;
                    break;
                }
            }
        }
        let frame = CloseFrame {
            code: CloseCode::from(close_code),
            reason: "".into(),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            debug!("websocket close failed: {e}");
        }
    });

    tokio::spawn(async move {
        let mut buffer = FrameBuffer::new();
        let closed = loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    buffer.push(&data);
                    while let Some(frame) = buffer.next_frame() {
                        if in_tx.send(TransportEvent::Frame(frame)).is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => break close_event(frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    break TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                    }
                }
                None => {
                    break TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".into(),
                    }
                }
            }
        };
        let _ = in_tx.send(closed);
    });

    Ok(TransportHandle {
        outgoing: out_tx,
        incoming: in_rx,
    })
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn test_close_event_codes() {
        assert_eq!(
            close_event(None),
            TransportEvent::Closed {
                code: NO_STATUS_RECEIVED,
                reason: String::new(),
            }
        );
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "bye".into(),
        };
        assert_eq!(
            close_event(Some(frame)),
            TransportEvent::Closed {
                code: 1001,
                reason: "bye".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_statusless_close_is_not_normal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            // Drain until the client answers the close.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut handle = WebSocketConnector::new()
            .connect(ConnectRequest {
                endpoint: format!("ws://{addr}"),
                origin: "https://web.whatsapp.com".into(),
                user_agent: "test-agent".into(),
            })
            .await
            .unwrap();

        match handle.incoming.recv().await {
            Some(TransportEvent::Closed { code, .. }) => {
                assert_eq!(code, NO_STATUS_RECEIVED);
                assert_ne!(code, NORMAL_CLOSURE);
            }
            other => panic!("expected a close, got {other:?}"),
        }
        drop(handle);
        server.await.unwrap();
    }
}
