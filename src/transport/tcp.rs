//! Framed TCP transport for sibling links
//!
//! Each frame is length-delimited; the first byte of the body is the frame
//! kind. Close frames carry a big-endian `u16` code followed by a UTF-8 reason.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::{CloseReason, Frame, FrameSink, FrameSource, Transport, TransportError};
use crate::peer::TransportKind;

const KIND_PAYLOAD: u8 = 0;
const KIND_PING: u8 = 1;
const KIND_PONG: u8 = 2;
const KIND_CLOSE: u8 = 3;

type FramedTcp = Framed<TcpStream, LengthDelimitedCodec>;

pub struct TcpTransport {
    framed: FramedTcp,
    max_message_size: usize,
}

impl TcpTransport {
    /// Wrap an accepted stream. Bodies larger than `max_message_size`
    /// (plus the kind byte) are rejected by the codec.
    pub fn new(stream: TcpStream, max_message_size: usize) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(max_message_size + 1)
            .new_codec();
        Self {
            framed: Framed::new(stream, codec),
            max_message_size,
        }
    }

    pub async fn connect(addr: SocketAddr, max_message_size: usize) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, max_message_size))
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSource>, Box<dyn FrameSink>) {
        let (sink, stream) = self.framed.split();
        (
            Box::new(TcpSource { stream }),
            Box::new(TcpSink { sink, closed: false }),
        )
    }
}

/// Serialize a frame body (without the length prefix)
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::new();
    match frame {
        Frame::Payload(data) => {
            buf.put_u8(KIND_PAYLOAD);
            buf.put_slice(data);
        }
        Frame::Ping(data) => {
            buf.put_u8(KIND_PING);
            buf.put_slice(data);
        }
        Frame::Pong(data) => {
            buf.put_u8(KIND_PONG);
            buf.put_slice(data);
        }
        Frame::Close(reason) => {
            buf.put_u8(KIND_CLOSE);
            if let Some(reason) = reason {
                buf.put_u16(reason.code);
                buf.put_slice(reason.reason.as_bytes());
            }
        }
    }
    buf.freeze()
}

/// Parse a frame body produced by [`encode_frame`]
pub fn decode_frame(mut body: Bytes) -> Result<Frame, TransportError> {
    if body.is_empty() {
        return Err(TransportError::Protocol("empty frame".to_string()));
    }

    let kind = body.get_u8();
    match kind {
        KIND_PAYLOAD => Ok(Frame::Payload(body)),
        KIND_PING => Ok(Frame::Ping(body)),
        KIND_PONG => Ok(Frame::Pong(body)),
        KIND_CLOSE if body.is_empty() => Ok(Frame::Close(None)),
        KIND_CLOSE if body.len() >= 2 => {
            let code = body.get_u16();
            let reason = String::from_utf8(body.to_vec())
                .map_err(|_| TransportError::Protocol("close reason is not UTF-8".to_string()))?;
            Ok(Frame::Close(Some(CloseReason { code, reason })))
        }
        KIND_CLOSE => Err(TransportError::Protocol("truncated close frame".to_string())),
        other => Err(TransportError::Protocol(format!("unknown frame kind {}", other))),
    }
}

struct TcpSource {
    stream: SplitStream<FramedTcp>,
}

#[async_trait]
impl FrameSource for TcpSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        let next = self.stream.next().await?;
        Some(next.map_err(TransportError::from).and_then(|body| decode_frame(body.freeze())))
    }
}

struct TcpSink {
    sink: SplitSink<FramedTcp, Bytes>,
    closed: bool,
}

#[async_trait]
impl FrameSink for TcpSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sink.send(encode_frame(&frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await?;
        Ok(())
    }
}
