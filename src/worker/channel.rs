//! Duplex message channel between a controller and a worker.
//!
//! Two flavours share one [`Endpoint`] type:
//!
//! - [`duplex`] connects two endpoints in memory (shared-process workers).
//! - [`Endpoint::over_stream`] frames messages as NDJSON over a byte stream,
//!   such as a child's stdin/stdout pipes (isolated-process workers).
//!
//! In both cases a vanished peer shows up as `recv` returning `None`.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::{WorkerError, WorkerResult};
use super::protocol::{decode_frame, encode_frame, Message};

/// What the receiving half yields: a message, or a frame that failed to decode.
pub type Inbound = WorkerResult<Message>;

/// Outcome of a bounded wait on the receiving half.
#[derive(Debug)]
pub enum Polled {
    /// Something arrived.
    Ready(Inbound),
    /// Nothing arrived within the timeout.
    Idle,
    /// The peer is gone and nothing is buffered.
    Disconnected,
}

enum Outgoing {
    /// Deliver straight into the peer's inbox.
    Local(mpsc::UnboundedSender<Inbound>),
    /// Hand encoded frames to the writer task.
    Stream(mpsc::UnboundedSender<String>),
}

/// One side of a duplex, order-preserving message channel.
pub struct Endpoint {
    outgoing: Option<Outgoing>,
    incoming: mpsc::UnboundedReceiver<Inbound>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

/// Create a connected pair of in-memory endpoints.
pub fn duplex() -> (Endpoint, Endpoint) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();

    let left = Endpoint {
        outgoing: Some(Outgoing::Local(right_tx)),
        incoming: left_rx,
        reader_task: None,
        writer_task: None,
    };
    let right = Endpoint {
        outgoing: Some(Outgoing::Local(left_tx)),
        incoming: right_rx,
        reader_task: None,
        writer_task: None,
    };
    (left, right)
}

impl Endpoint {
    /// Frame messages as NDJSON over a byte stream.
    ///
    /// Spawns a reader task that decodes lines from `reader` and a writer task
    /// that writes encoded frames to `writer`. Must be called inside a Tokio
    /// runtime.
    pub fn over_stream<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        Self {
            outgoing: Some(Outgoing::Stream(frame_tx)),
            incoming: inbox_rx,
            reader_task: Some(Self::spawn_reader_task(reader, inbox_tx)),
            writer_task: Some(Self::spawn_writer_task(writer, frame_rx)),
        }
    }

    /// Spawn the background task that decodes frames from the stream.
    fn spawn_reader_task<R>(reader: R, inbox: mpsc::UnboundedSender<Inbound>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        // EOF - peer closed its end
                        break;
                    }
                    Ok(_) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let inbound = decode_frame(&line).map_err(|e| {
                            WorkerError::Protocol(format!("malformed frame: {}", e))
                        });
                        let malformed = inbound.is_err();
                        if inbox.send(inbound).is_err() || malformed {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        // A line that is not UTF-8 is a bad frame, not a hang-up
                        let _ = inbox.send(Err(WorkerError::Protocol(format!(
                            "malformed frame: {}",
                            e
                        ))));
                        break;
                    }
                    Err(e) => {
                        // Reset or broken pipe surfaces as a disconnect
                        debug!(error = %e, "channel read failed");
                        break;
                    }
                }
            }
        })
    }

    /// Spawn the background task that writes frames to the stream.
    fn spawn_writer_task<W>(writer: W, mut frames: mpsc::UnboundedReceiver<String>) -> JoinHandle<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut writer = BufWriter::new(writer);

            while let Some(frame) = frames.recv().await {
                if let Err(e) = writer.write_all(frame.as_bytes()).await {
                    debug!(error = %e, "channel write failed");
                    return;
                }
                if let Err(e) = writer.flush().await {
                    debug!(error = %e, "channel flush failed");
                    return;
                }
            }

            let _ = writer.shutdown().await;
        })
    }

    /// Send one message to the peer.
    ///
    /// Never blocks. Fails with [`WorkerError::Closed`] after [`close`](Self::close)
    /// and with [`WorkerError::ChannelClosed`] when the peer is gone.
    pub fn send(&self, message: Message) -> WorkerResult<()> {
        match &self.outgoing {
            None => Err(WorkerError::Closed),
            Some(Outgoing::Local(tx)) => tx
                .send(Ok(message))
                .map_err(|_| WorkerError::ChannelClosed),
            Some(Outgoing::Stream(tx)) => {
                let frame = encode_frame(&message).map_err(WorkerError::SerializeFailed)?;
                tx.send(frame).map_err(|_| WorkerError::ChannelClosed)
            }
        }
    }

    /// Wait for the next message. `None` means the peer is gone.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.incoming.recv().await
    }

    /// Wait for the next message for at most `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Polled {
        match tokio::time::timeout(timeout, self.incoming.recv()).await {
            Ok(Some(inbound)) => Polled::Ready(inbound),
            Ok(None) => Polled::Disconnected,
            Err(_) => Polled::Idle,
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.outgoing.is_none()
    }

    /// Close this endpoint.
    ///
    /// Frames already handed to the writer are flushed before this returns.
    /// Calling it again is a no-op.
    pub async fn close(&mut self) {
        self.outgoing = None;
        self.incoming.close();

        if let Some(writer) = self.writer_task.take() {
            if let Err(e) = writer.await {
                warn!(error = %e, "channel writer task failed");
            }
        }
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_duplex_preserves_order() {
        let (left, mut right) = duplex();
        for i in 0..5 {
            left.send(Message::Result(json!(i))).unwrap();
        }
        for i in 0..5 {
            match right.recv().await {
                Some(Ok(Message::Result(value))) => assert_eq!(value, json!(i)),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_duplex_drop_disconnects_after_drain() {
        let (left, mut right) = duplex();
        left.send(Message::Close).unwrap();
        drop(left);
        assert!(matches!(right.recv().await, Some(Ok(Message::Close))));
        assert!(right.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (mut left, right) = duplex();
        left.close().await;
        left.close().await;
        assert!(left.is_closed());
        assert!(matches!(left.send(Message::Close), Err(WorkerError::Closed)));
        drop(right);
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer() {
        let (left, right) = duplex();
        drop(right);
        assert!(matches!(
            left.send(Message::Close),
            Err(WorkerError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_recv_timeout_idle() {
        let (_left, mut right) = duplex();
        assert!(matches!(
            right.recv_timeout(Duration::from_millis(10)).await,
            Polled::Idle
        ));
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (a, b) = tokio::io::duplex(1024);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let mut controller = Endpoint::over_stream(a_read, a_write);
        let mut worker = Endpoint::over_stream(b_read, b_write);

        controller.send(Message::Access("action_space".into())).unwrap();
        assert_eq!(
            worker.recv().await.unwrap().unwrap(),
            Message::Access("action_space".into())
        );

        worker.send(Message::Result(json!({"n": 4}))).unwrap();
        assert_eq!(
            controller.recv().await.unwrap().unwrap(),
            Message::Result(json!({"n": 4}))
        );

        worker.close().await;
        assert!(controller.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_malformed_frame_is_protocol_error() {
        let (mut raw, b) = tokio::io::duplex(1024);
        let (b_read, b_write) = tokio::io::split(b);
        let mut worker = Endpoint::over_stream(b_read, b_write);

        raw.write_all(b"{\"kind\":\"bogus\"}\n").await.unwrap();
        match worker.recv().await {
            Some(Err(WorkerError::Protocol(message))) => assert!(message.contains("malformed")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(worker.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_invalid_utf8_is_protocol_error() {
        let (mut raw, b) = tokio::io::duplex(1024);
        let (b_read, b_write) = tokio::io::split(b);
        let mut worker = Endpoint::over_stream(b_read, b_write);

        raw.write_all(b"{\"kind\":\"access\",\"payload\":\"\xff\xfe\"}\n")
            .await
            .unwrap();
        match worker.recv().await {
            Some(Err(WorkerError::Protocol(message))) => assert!(message.contains("malformed")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(worker.recv().await.is_none());
    }
}
