//! Framed channel
//!
//! Length-prefixed UTF-8 text frames over any async byte stream. Each frame
//! is a 2-byte big-endian length followed by that many bytes of UTF-8, so a
//! message is only ever delivered whole.

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::ChannelError;

/// Largest payload a single frame can carry, in bytes.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Length of the frame header, in bytes.
const LENGTH_FIELD_LEN: usize = 2;

/// A tokio codec turning length-delimited frames into `String`s.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        let inner = LengthDelimitedCodec::builder()
            .length_field_length(LENGTH_FIELD_LEN)
            .max_frame_length(MAX_FRAME_LEN)
            .big_endian()
            .new_codec();
        Self { inner }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(payload) => String::from_utf8(payload.to_vec())
                .map(Some)
                .map_err(|_| ChannelError::InvalidUtf8),
            None => Ok(None),
        }
    }
}

impl Encoder<String> for FrameCodec {
    type Error = ChannelError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_LEN {
            return Err(ChannelError::FrameTooLarge(item.len()));
        }
        self.inner.encode(Bytes::from(item.into_bytes()), dst)?;
        Ok(())
    }
}

/// Receiving half of a framed channel
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: FramedRead<R, FrameCodec>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, FrameCodec::new()),
        }
    }

    /// Wait for the next complete frame
    ///
    /// Returns `ConnectionClosed` once the peer has ended the stream.
    pub async fn receive(&mut self) -> Result<String, ChannelError> {
        match self.inner.next().await {
            Some(frame) => frame,
            None => Err(ChannelError::ConnectionClosed),
        }
    }
}

/// Sending half of a framed channel
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: FramedWrite<W, FrameCodec>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, FrameCodec::new()),
        }
    }

    /// Write and flush one complete frame
    pub async fn send(&mut self, text: impl Into<String>) -> Result<(), ChannelError> {
        self.inner.send(text.into()).await
    }

    /// Flush pending frames and shut down the write side
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        self.inner.close().await
    }
}

/// Split a bidirectional stream into an independent reader and writer
pub fn split<S>(stream: S) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    (FrameReader::new(reader), FrameWriter::new(writer))
}
