//! Line channel between the harness and its parent test process.
//!
//! Provides newline-delimited JSON framing over any async byte stream:
//! [`listen`] turns a reader into a cancelable stream of decoded messages,
//! and [`Sender`] writes one message per line.

pub mod lines;
pub mod protocol;
pub mod stdio_pipe;
pub mod tagged;

pub use lines::JsonLinesCodec;
pub use protocol::{InMessage, OutMessage};
pub use stdio_pipe::TestServerProcess;
pub use tagged::{DecodeError, TaggedUnion};

use std::io;

use futures::stream::{self, FusedStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maximum line length (64 MB). Safety valve against runaway input.
pub const MAX_LINE_LENGTH: usize = 64 * 1024 * 1024;

/// Failure on the line channel. All variants are fatal to the channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("line exceeds max length of {max} bytes")]
    LineTooLong { max: usize },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("line is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to serialize message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ChannelError {
    pub(crate) fn from_lines(err: LinesCodecError, max: usize) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Self::LineTooLong { max },
            LinesCodecError::Io(e) if e.kind() == io::ErrorKind::InvalidData => Self::InvalidUtf8,
            LinesCodecError::Io(e) => Self::Io(e),
        }
    }
}

/// Read tagged JSON messages from `reader`, one per line.
///
/// The stream ends cleanly at end-of-input or once `cancel` fires. The first
/// line that fails to decode is yielded as an error and ends the stream, so
/// nothing after a bad line is ever observed. Polling after the end keeps
/// returning `None`.
pub fn listen<T, R>(
    reader: R,
    max_line_length: usize,
    cancel: CancellationToken,
) -> impl FusedStream<Item = Result<T, ChannelError>>
where
    T: TaggedUnion,
    R: AsyncRead + Unpin,
{
    let frames = FramedRead::new(reader, JsonLinesCodec::<T>::new(max_line_length));

    stream::unfold(Some((frames, cancel)), |state| async move {
        let (mut frames, cancel) = state?;

        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Inbound channel cancelled");
                None
            }
            next = frames.next() => next,
        };

        let item = next?;
        let rest = item.is_ok().then_some((frames, cancel));
        Some((item, rest))
    })
    .fuse()
}

/// Writes tagged JSON messages, one per line, flushing after each.
///
/// Mutex-guarded so concurrent senders never interleave partial lines.
pub struct Sender<T, W> {
    sink: Mutex<FramedWrite<W, JsonLinesCodec<T>>>,
}

impl<T, W> Sender<T, W>
where
    T: TaggedUnion,
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            sink: Mutex::new(FramedWrite::new(writer, JsonLinesCodec::new(MAX_LINE_LENGTH))),
        }
    }

    /// Serialize `message`, write it as one line and flush.
    pub async fn send(&self, message: T) -> Result<(), ChannelError> {
        let mut sink = self.sink.lock().await;
        sink.send(message).await
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.sink.into_inner().into_inner()
    }
}
