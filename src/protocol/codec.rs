//! Frame codec for plugin RPC streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum frame length so a
//! misbehaving plugin cannot make the host buffer an unterminated line
//! forever. One `\n`-terminated UTF-8 line is one JSON frame.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum frame length accepted by [`FrameCodec`]: 1 MiB.
pub const MAX_FRAME_BYTES: usize = 1_048_576;

/// Newline-delimited frame codec used in both directions of a plugin stream.
///
/// Inbound lines longer than [`MAX_FRAME_BYTES`] return
/// [`AppError::Stream`]`("frame too long: …")`. I/O errors map to
/// [`AppError::Io`]. The length limit is a decoder-side concern only.
#[derive(Debug)]
pub struct FrameCodec(LinesCodec);

impl FrameCodec {
    /// Create a codec with the default [`MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_FRAME_BYTES))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Stream(format!("frame too long: exceeded {MAX_FRAME_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
