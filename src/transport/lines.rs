//! Newline-delimited framing for tagged JSON messages.
//!
//! Wraps `LinesCodec` for framing and [`TaggedUnion`] for (de)serialization.
//! Works over any `AsyncRead`/`AsyncWrite` via `FramedRead`/`FramedWrite`.

use std::marker::PhantomData;

use serde_json::Value;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec};

use super::tagged::TaggedUnion;
use super::ChannelError;

/// Codec that frames one tagged JSON message per line.
///
/// Blank lines are skipped. A line that is not JSON, or that fails
/// [`TaggedUnion::decode`], is returned as an error.
pub struct JsonLinesCodec<T> {
    lines: LinesCodec,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> JsonLinesCodec<T> {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_length),
            _phantom: PhantomData,
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.lines.max_length()
    }
}

impl<T: TaggedUnion> JsonLinesCodec<T> {
    fn parse(line: &str) -> Result<T, ChannelError> {
        let value: Value = serde_json::from_str(line).map_err(ChannelError::Json)?;
        Ok(T::decode(value)?)
    }
}

impl<T: TaggedUnion> Decoder for JsonLinesCodec<T> {
    type Item = T;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let max = self.max_line_length();
        loop {
            match self.lines.decode(src).map_err(|e| ChannelError::from_lines(e, max))? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => return Self::parse(&line).map(Some),
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let max = self.max_line_length();
        loop {
            match self.lines.decode_eof(src).map_err(|e| ChannelError::from_lines(e, max))? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => return Self::parse(&line).map(Some),
                None => return Ok(None),
            }
        }
    }
}

impl<T: TaggedUnion> Encoder<T> for JsonLinesCodec<T> {
    type Error = ChannelError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(ChannelError::Encode)?;
        tracing::trace!(variant = item.variant(), json_size_bytes = json.len(), "Encoding line");
        dst.reserve(json.len() + 1);
        dst.extend_from_slice(&json);
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}
