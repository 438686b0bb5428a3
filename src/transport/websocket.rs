//! Server-side WebSocket transport (axum upgrade)

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;

use super::{CloseReason, Frame, FrameSink, FrameSource, Transport, TransportError};
use crate::peer::TransportKind;

/// An upgraded WebSocket accepted by the HTTP listener
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSource>, Box<dyn FrameSink>) {
        let (sink, stream) = self.socket.split();
        (
            Box::new(WsSource { stream }),
            Box::new(WsSink { sink, closed: false }),
        )
    }
}

struct WsSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        let message = match self.stream.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(TransportError::Protocol(e.to_string()))),
        };

        Some(Ok(match message {
            Message::Text(text) => Frame::Payload(Bytes::from(text)),
            Message::Binary(data) => Frame::Payload(Bytes::from(data)),
            Message::Ping(data) => Frame::Ping(Bytes::from(data)),
            Message::Pong(data) => Frame::Pong(Bytes::from(data)),
            Message::Close(close) => Frame::Close(close.map(|cf| CloseReason {
                code: cf.code,
                reason: cf.reason.into_owned(),
            })),
        }))
    }
}

struct WsSink {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Payload(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        },
        Frame::Ping(data) => Message::Ping(data.to_vec()),
        Frame::Pong(data) => Message::Pong(data.to_vec()),
        Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: r.code,
            reason: Cow::Owned(r.reason),
        })),
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sink
            .send(to_message(frame))
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
