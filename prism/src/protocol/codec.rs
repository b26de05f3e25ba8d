//! Length-delimited JSON framing for control streams

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::Result;

/// Upper bound on a single control frame
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec()
}

/// A framed control stream over any byte transport
///
/// Frames are JSON documents behind a length prefix. [`ControlStream::split`]
/// separates the send and receive halves so a connection can run one task
/// per direction.
pub struct ControlStream<T> {
    inner: Framed<T, LengthDelimitedCodec>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> ControlStream<T> {
    pub fn new(io: T) -> Self {
        Self {
            inner: Framed::new(io, codec()),
        }
    }

    /// Send one frame
    pub async fn send<F: Serialize>(&mut self, frame: &F) -> Result<()> {
        let bytes = serde_json::to_vec(frame)?;
        self.inner.send(Bytes::from(bytes)).await?;
        Ok(())
    }

    /// Receive one frame; `None` on a clean EOF
    pub async fn recv<F: DeserializeOwned>(&mut self) -> Result<Option<F>> {
        match self.inner.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(buf)) => Ok(Some(serde_json::from_slice(&buf)?)),
        }
    }

    /// Split into independent send and receive halves
    pub fn split(self) -> (FrameSink<T>, FrameSource<T>) {
        let (sink, source) = self.inner.split();
        (FrameSink { inner: sink }, FrameSource { inner: source })
    }
}

/// Send half of a split control stream
pub struct FrameSink<T> {
    inner: SplitSink<Framed<T, LengthDelimitedCodec>, Bytes>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> FrameSink<T> {
    /// Send one frame
    pub async fn send<F: Serialize>(&mut self, frame: &F) -> Result<()> {
        let bytes = serde_json::to_vec(frame)?;
        self.inner.send(Bytes::from(bytes)).await?;
        Ok(())
    }
}

/// Receive half of a split control stream
pub struct FrameSource<T> {
    inner: SplitStream<Framed<T, LengthDelimitedCodec>>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> FrameSource<T> {
    /// Receive one frame; `None` on a clean EOF
    pub async fn recv<F: DeserializeOwned>(&mut self) -> Result<Option<F>> {
        match self.inner.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(buf)) => Ok(Some(serde_json::from_slice(&buf)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{Heartbeat, LifecycleState, PatternToProxy};
    use chrono::Utc;

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut client = ControlStream::new(client);
        let mut server = ControlStream::new(server);

        let frame = PatternToProxy::Heartbeat(Heartbeat {
            state: LifecycleState::Running,
            timestamp: Utc::now(),
        });
        client.send(&frame).await.unwrap();

        let received: PatternToProxy = server.recv().await.unwrap().unwrap();
        assert_eq!(frame, received);
    }

    #[tokio::test]
    async fn test_clean_eof_yields_none() {
        let (client, server) = tokio::io::duplex(1024);
        let mut server = ControlStream::new(server);
        drop(client);
        let received: Option<PatternToProxy> = server.recv().await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_an_error() {
        let (client, server) = tokio::io::duplex(1024);
        let mut raw = Framed::new(client, codec());
        let mut server = ControlStream::new(server);

        raw.send(Bytes::from_static(b"not json")).await.unwrap();
        let result: Result<Option<PatternToProxy>> = server.recv().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_split_halves_work_independently() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let client = ControlStream::new(client);
        let (mut sink, _source) = client.split();
        let mut server = ControlStream::new(server);

        let frame = PatternToProxy::Heartbeat(Heartbeat {
            state: LifecycleState::Registered,
            timestamp: Utc::now(),
        });
        sink.send(&frame).await.unwrap();
        let received: PatternToProxy = server.recv().await.unwrap().unwrap();
        assert_eq!(frame, received);
    }
}
