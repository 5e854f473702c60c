//! NDJSON codec for the backend socket.
//!
//! Wraps [`LinesCodec`] with a maximum line length so a misbehaving
//! backend cannot make the client buffer an unterminated line forever.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted line length: 10 MiB.
///
/// Streaming replies and embeddings are much larger than ordinary control
/// messages, hence the generous bound.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Line-framed JSON codec used for both directions of the backend socket.
///
/// Inbound lines longer than [`MAX_LINE_BYTES`] decode to
/// `AppError::Protocol("line too long: ...")`; I/O failures map to
/// `AppError::Transport`.
#[derive(Debug)]
pub struct RpcCodec(LinesCodec);

impl RpcCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RpcCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for RpcCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Transport(io_err.to_string()),
    }
}
