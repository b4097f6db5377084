//! Envelope framing on top of an async byte stream.
//!
//! A [`FramedChannel`] turns a stream without message boundaries into a
//! sequence of whole envelopes. It can be split into a [`FramedReader`] and
//! a [`FramedWriter`] so reading and writing run in separate tasks.

use crate::error::LinkError;
use bytes::BytesMut;
use link_wire::{Envelope, EnvelopeDecoder, DEFAULT_MAX_FRAME_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::trace;

const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// Read side of a framed stream
#[derive(Debug)]
pub struct FramedReader<R> {
    inner: R,
    decoder: EnvelopeDecoder,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// Wrap a reader with the given frame size limit
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            decoder: EnvelopeDecoder::with_max_frame_size(max_frame_size),
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        }
    }

    /// Read exactly one envelope.
    ///
    /// Bytes belonging to later frames stay buffered for the next call. If
    /// the stream ends before a frame is complete the partial frame is
    /// discarded and `ChannelClosed` is returned.
    pub async fn read_message(&mut self) -> Result<Envelope, LinkError> {
        loop {
            if let Some(envelope) = self.decoder.decode(&mut self.buffer)? {
                return Ok(envelope);
            }

            let bytes_read = self.inner.read_buf(&mut self.buffer).await?;
            if bytes_read == 0 {
                if !self.buffer.is_empty() {
                    trace!("Discarding {} bytes of partial frame", self.buffer.len());
                    self.buffer.clear();
                }
                return Err(LinkError::ChannelClosed);
            }

            trace!(
                "Read {} bytes, buffer now has {} bytes",
                bytes_read,
                self.buffer.len()
            );
        }
    }
}

/// Write side of a framed stream
#[derive(Debug)]
pub struct FramedWriter<W> {
    inner: W,
    max_frame_size: usize,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    /// Wrap a writer with the given frame size limit
    pub fn new(inner: W, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// Write one envelope as a single contiguous frame
    pub async fn write_message(&mut self, envelope: &Envelope) -> Result<(), LinkError> {
        let frame = envelope.encode(self.max_frame_size)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        trace!(
            "Wrote {:?} {} ({} bytes)",
            envelope.kind(),
            envelope.id(),
            frame.len()
        );
        Ok(())
    }

    /// Shut down the write direction of the stream
    pub async fn shutdown(&mut self) -> Result<(), LinkError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Bidirectional framed stream
#[derive(Debug)]
pub struct FramedChannel<S> {
    reader: FramedReader<ReadHalf<S>>,
    writer: FramedWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> FramedChannel<S> {
    /// Wrap a stream with the default frame size limit
    pub fn new(stream: S) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Wrap a stream with a custom frame size limit
    pub fn with_max_frame_size(stream: S, max_frame_size: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FramedReader::new(read_half, max_frame_size),
            writer: FramedWriter::new(write_half, max_frame_size),
        }
    }

    /// Write one envelope
    pub async fn write_message(&mut self, envelope: &Envelope) -> Result<(), LinkError> {
        self.writer.write_message(envelope).await
    }

    /// Read one envelope
    pub async fn read_message(&mut self) -> Result<Envelope, LinkError> {
        self.reader.read_message().await
    }

    /// Separate the halves for use by independent tasks
    pub fn into_split(self) -> (FramedReader<ReadHalf<S>>, FramedWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use link_wire::{EnvelopeHeader, EnvelopeKind, WireError};
    use std::time::Duration;

    #[tokio::test]
    async fn test_roundtrip_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = FramedChannel::new(a);
        let mut right = FramedChannel::new(b);

        let payloads: Vec<Bytes> = vec![
            Bytes::new(),
            Bytes::from_static(b"hello"),
            Bytes::from("ünïcødé ✓".as_bytes().to_vec()),
            Bytes::from(vec![0xAB; 10_000]),
        ];

        for (i, payload) in payloads.iter().enumerate() {
            left.write_message(&Envelope::data(i as u64 + 1, payload.clone()))
                .await
                .unwrap();
        }

        for (i, payload) in payloads.iter().enumerate() {
            let envelope = right.read_message().await.unwrap();
            assert_eq!(envelope.kind(), EnvelopeKind::Data);
            assert_eq!(envelope.id(), i as u64 + 1);
            assert_eq!(envelope.payload(), payload);
        }
    }

    #[tokio::test]
    async fn test_reassembles_tiny_chunks() {
        let envelope = Envelope::data(77, Bytes::from_static(b"split across many reads"));
        let frame = envelope.encode(DEFAULT_MAX_FRAME_SIZE).unwrap();

        // Small pipe capacity forces fragmented reads
        let (mut raw, b) = tokio::io::duplex(3);
        let mut reader = FramedChannel::new(b);

        let writer = tokio::spawn(async move {
            for chunk in frame.chunks(2) {
                raw.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            raw
        });

        let decoded = reader.read_message().await.unwrap();
        assert_eq!(decoded, envelope);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_splits_coalesced_frames() {
        let first = Envelope::data(1, Bytes::from_static(b"first"));
        let second = Envelope::ack(1);
        let mut joined = BytesMut::new();
        joined.extend_from_slice(&first.encode(DEFAULT_MAX_FRAME_SIZE).unwrap());
        joined.extend_from_slice(&second.encode(DEFAULT_MAX_FRAME_SIZE).unwrap());

        let (mut raw, b) = tokio::io::duplex(4096);
        raw.write_all(&joined).await.unwrap();

        let mut reader = FramedChannel::new(b);
        assert_eq!(reader.read_message().await.unwrap(), first);
        assert_eq!(reader.read_message().await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_channel_closed() {
        let frame = Envelope::data(5, Bytes::from_static(b"truncated payload"))
            .encode(DEFAULT_MAX_FRAME_SIZE)
            .unwrap();

        let (mut raw, b) = tokio::io::duplex(4096);
        raw.write_all(&frame[..frame.len() - 4]).await.unwrap();
        drop(raw);

        let mut reader = FramedChannel::new(b);
        assert!(matches!(
            reader.read_message().await,
            Err(LinkError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_malformed_length() {
        let header = EnvelopeHeader {
            kind: EnvelopeKind::Data,
            id: 1,
            sent_at: 0,
            payload_len: 1_000_000,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let (mut raw, b) = tokio::io::duplex(4096);
        raw.write_all(&buf).await.unwrap();

        let mut reader = FramedChannel::with_max_frame_size(b, 1024);
        assert!(matches!(
            reader.read_message().await,
            Err(LinkError::MalformedFrame(WireError::Size(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_malformed() {
        let mut buf = BytesMut::from(&Envelope::ack(3).encode(1024).unwrap()[..]);
        buf[0] = 0xEE;

        let (mut raw, b) = tokio::io::duplex(4096);
        raw.write_all(&buf).await.unwrap();

        let mut reader = FramedChannel::new(b);
        assert!(matches!(
            reader.read_message().await,
            Err(LinkError::MalformedFrame(WireError::Kind(0xEE)))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_interleave() {
        let (a, b) = tokio::io::duplex(256);
        let (_reader, writer) = FramedChannel::new(a).into_split();
        let writer = std::sync::Arc::new(tokio::sync::Mutex::new(writer));

        let mut tasks = Vec::new();
        for task in 0..4u64 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25u64 {
                    let id = task * 100 + i;
                    let payload = vec![task as u8; 300];
                    writer
                        .lock()
                        .await
                        .write_message(&Envelope::data(id, payload))
                        .await
                        .unwrap();
                }
            }));
        }

        let mut reader = FramedChannel::new(b);
        for _ in 0..100 {
            let envelope = reader.read_message().await.unwrap();
            let expected = (envelope.id() / 100) as u8;
            assert!(envelope.payload().iter().all(|&byte| byte == expected));
        }

        for task in tasks {
            task.await.unwrap();
        }
    }
}
