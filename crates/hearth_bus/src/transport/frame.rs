//! Wire framing between a [`TcpBroker`](super::TcpBroker) and its clients
//!
//! Every frame is `[len: u32 BE][kind: u8][body]`, where `len` counts the
//! kind byte plus the body. A publish body is
//! `[topic_len: u16 BE][topic utf-8][payload]`; a subscribe body is the
//! UTF-8 topic pattern.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{BusError, BusResult};

/// Upper bound on a single frame
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Subscribe = 1,
    Publish = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = BusError;

    fn try_from(value: u8) -> BusResult<Self> {
        match value {
            1 => Ok(FrameKind::Subscribe),
            2 => Ok(FrameKind::Publish),
            _ => Err(BusError::Frame(format!("unknown frame kind: {value}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Subscribe(String),
    Publish { topic: String, payload: Bytes },
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Subscribe(_) => FrameKind::Subscribe,
            Frame::Publish { .. } => FrameKind::Publish,
        }
    }

    fn encode_body(&self) -> BusResult<Bytes> {
        match self {
            Frame::Subscribe(pattern) => Ok(Bytes::copy_from_slice(pattern.as_bytes())),
            Frame::Publish { topic, payload } => {
                let topic_len = u16::try_from(topic.len())
                    .map_err(|_| BusError::Frame(format!("topic too long: {}", topic.len())))?;
                let mut body = BytesMut::with_capacity(2 + topic.len() + payload.len());
                body.put_u16(topic_len);
                body.put_slice(topic.as_bytes());
                body.put_slice(payload);
                Ok(body.freeze())
            }
        }
    }

    fn decode(kind: FrameKind, mut body: Bytes) -> BusResult<Self> {
        match kind {
            FrameKind::Subscribe => Ok(Frame::Subscribe(utf8(body)?)),
            FrameKind::Publish => {
                if body.len() < 2 {
                    return Err(BusError::Frame("publish frame missing topic length".into()));
                }
                let topic_len = body.get_u16() as usize;
                if body.len() < topic_len {
                    return Err(BusError::Frame("publish frame truncated".into()));
                }
                let topic = utf8(body.split_to(topic_len))?;
                Ok(Frame::Publish {
                    topic,
                    payload: body,
                })
            }
        }
    }
}

fn utf8(bytes: Bytes) -> BusResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| BusError::Frame(format!("topic is not utf-8: {e}")))
}

/// Writes frames to a byte stream
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, frame: &Frame) -> BusResult<()> {
        let body = frame.encode_body()?;
        let len = 1 + body.len();
        if len > MAX_FRAME_LEN {
            return Err(BusError::Frame(format!("frame too large: {len} bytes")));
        }
        let len = len as u32;
        self.inner.write_all(&len.to_be_bytes()).await?;
        self.inner.write_all(&[frame.kind() as u8]).await?;
        self.inner.write_all(&body).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

/// Reads frames from a byte stream
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Next frame, or `None` on a clean end of stream
    pub async fn recv(&mut self) -> BusResult<Option<Frame>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;

        if len == 0 {
            return Err(BusError::Frame("empty frame".into()));
        }
        if len > MAX_FRAME_LEN {
            return Err(BusError::Frame(format!("frame too large: {len} bytes")));
        }

        let mut kind_buf = [0u8; 1];
        self.inner.read_exact(&mut kind_buf).await?;
        let kind = FrameKind::try_from(kind_buf[0])?;

        let mut body = vec![0u8; len - 1];
        if !body.is_empty() {
            self.inner.read_exact(&mut body).await?;
        }

        Frame::decode(kind, Bytes::from(body)).map(Some)
    }
}
