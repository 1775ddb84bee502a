//! Frame body compression, signalled by the `type_flags` compressed bit.
//!
//! This is independent of `nexuskit-middleware`'s `CompressionMiddleware`:
//! that one runs on the framed byte stream, this one runs on a single
//! frame's body and is what sets/reads the `FLAG_COMPRESSED` header bit.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::ProtoError;

/// Compress `body` with DEFLATE at the default level.
pub fn compress(body: &[u8]) -> Result<Vec<u8>, ProtoError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(body)
        .map_err(|e| ProtoError::CompressionFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| ProtoError::CompressionFailed(e.to_string()))
}

/// Inflate a DEFLATE-compressed body.
pub fn decompress(body: &[u8]) -> Result<Vec<u8>, ProtoError> {
    let mut decoder = DeflateDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ProtoError::DecompressionFailed(e.to_string()))?;
    Ok(out)
}
