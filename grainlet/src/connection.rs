//! TCP channel to the orchestrator.
//!
//! One outbound connection, split once at startup: the read half feeds the
//! single dispatcher loop, the write half sits behind a mutex so response
//! and log frames from concurrent workers never interleave on the wire.

use std::io;
use std::sync::Arc;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::frame::{Frame, FrameCodec};

/// Read side of the connection; driven only by the dispatcher loop.
pub type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;

/// Cloneable write handle, safe to use from any worker task.
#[derive(Clone)]
pub struct FrameSink {
    writer: Arc<tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, FrameCodec>>>,
}

impl FrameSink {
    /// Write one frame. Serialized against every other sender by the
    /// internal mutex; a partial frame on the wire would corrupt the
    /// stream for the peer.
    pub async fn send(&self, frame: Frame) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(frame).await
    }
}

/// Split an established stream into the reader half and the shared sink.
pub fn split(stream: TcpStream) -> (FrameReader, FrameSink) {
    let (read_half, write_half) = stream.into_split();
    let reader = FramedRead::new(read_half, FrameCodec::new());
    let sink = FrameSink {
        writer: Arc::new(tokio::sync::Mutex::new(FramedWrite::new(
            write_half,
            FrameCodec::new(),
        ))),
    };
    (reader, sink)
}

/// Open the connection to the orchestrator.
pub async fn connect(host: &str, port: u16) -> io::Result<(FrameReader, FrameSink)> {
    let stream = TcpStream::connect((host, port)).await?;
    tracing::info!(host, port, "Connected to orchestrator");
    Ok(split(stream))
}
