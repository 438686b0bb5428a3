//! Client-side WebSocket transport, used to dial sibling servers

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{CloseReason, Frame, FrameSink, FrameSource, Transport, TransportError};
use crate::peer::TransportKind;

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `User-Agent` sent when dialing a sibling
pub const CLIENT_AGENT: &str = concat!("polyhub/", env!("CARGO_PKG_VERSION"));

/// An outgoing WebSocket connection
pub struct WsClientTransport {
    stream: ClientStream,
}

impl WsClientTransport {
    /// Dial `ws://{addr}/ws`, giving up after `handshake_timeout`
    pub async fn dial(addr: SocketAddr, handshake_timeout: Duration) -> Result<Self, TransportError> {
        let url = format!("ws://{}/ws", addr);
        Self::dial_url(&url, handshake_timeout).await
    }

    pub async fn dial_url(url: &str, handshake_timeout: Duration) -> Result<Self, TransportError> {
        debug!("Connecting to {}", url);
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(CLIENT_AGENT));

        let (stream, _response) =
            tokio::time::timeout(handshake_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| TransportError::HandshakeTimeout)?
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(Self { stream })
    }
}

impl Transport for WsClientTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocketClient
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSource>, Box<dyn FrameSink>) {
        let (sink, stream) = self.stream.split();
        (
            Box::new(ClientSource { stream }),
            Box::new(ClientSink { sink, closed: false }),
        )
    }
}

struct ClientSource {
    stream: SplitStream<ClientStream>,
}

#[async_trait]
impl FrameSource for ClientSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Protocol(e.to_string()))),
            };

            let frame = match message {
                Message::Text(text) => Frame::Payload(Bytes::from(text)),
                Message::Binary(data) => Frame::Payload(Bytes::from(data)),
                Message::Ping(data) => Frame::Ping(Bytes::from(data)),
                Message::Pong(data) => Frame::Pong(Bytes::from(data)),
                Message::Close(close) => Frame::Close(close.map(|cf| CloseReason {
                    code: u16::from(cf.code),
                    reason: cf.reason.into_owned(),
                })),
                // raw frames only surface when writing, never on read
                Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}

struct ClientSink {
    sink: SplitSink<ClientStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for ClientSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let message = match frame {
            Frame::Payload(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            },
            Frame::Ping(data) => Message::Ping(data.to_vec()),
            Frame::Pong(data) => Message::Pong(data.to_vec()),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: CloseCode::from(r.code),
                reason: Cow::Owned(r.reason),
            })),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}
