//! Stream-level compression middleware: independent of the
//! framer's per-frame `FLAG_COMPRESSED` bit in `nexuskit-proto`, this layer
//! compresses whatever bytes flow through the pipeline regardless of how
//! the frame itself is encoded.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;

use crate::error::MiddlewareError;
use crate::pipeline::{FlowContext, Middleware, MiddlewareOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionProfile {
    HighSpeed,
    Balanced,
    HighRatio,
}

impl CompressionProfile {
    fn level(self) -> Compression {
        match self {
            CompressionProfile::HighSpeed => Compression::fast(),
            CompressionProfile::Balanced => Compression::default(),
            CompressionProfile::HighRatio => Compression::best(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    Deflate,
    Gzip,
    Identity,
}

pub struct CompressionMiddleware {
    name: String,
    priority: u16,
    profile: CompressionProfile,
    algorithm: CompressionAlgorithm,
}

impl CompressionMiddleware {
    pub fn new(
        name: impl Into<String>,
        priority: u16,
        profile: CompressionProfile,
        algorithm: CompressionAlgorithm,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            profile,
            algorithm,
        }
    }

    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, MiddlewareError> {
        match self.algorithm {
            CompressionAlgorithm::Identity => Ok(bytes.to_vec()),
            CompressionAlgorithm::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), self.profile.level());
                encoder
                    .write_all(bytes)
                    .map_err(|e| MiddlewareError::failed(&self.name, e))?;
                encoder
                    .finish()
                    .map_err(|e| MiddlewareError::failed(&self.name, e))
            }
            CompressionAlgorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), self.profile.level());
                encoder
                    .write_all(bytes)
                    .map_err(|e| MiddlewareError::failed(&self.name, e))?;
                encoder
                    .finish()
                    .map_err(|e| MiddlewareError::failed(&self.name, e))
            }
        }
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, MiddlewareError> {
        match self.algorithm {
            CompressionAlgorithm::Identity => Ok(bytes.to_vec()),
            CompressionAlgorithm::Deflate => {
                let mut decoder = DeflateDecoder::new(bytes);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| MiddlewareError::failed(&self.name, e))?;
                Ok(out)
            }
            CompressionAlgorithm::Gzip => {
                let mut decoder = GzDecoder::new(bytes);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| MiddlewareError::failed(&self.name, e))?;
                Ok(out)
            }
        }
    }
}

#[async_trait::async_trait]
impl Middleware for CompressionMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u16 {
        self.priority
    }

    async fn handle_outgoing(
        &self,
        bytes: Bytes,
        _ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        let compressed = self.compress(&bytes)?;
        Ok(MiddlewareOutcome::Continue(Bytes::from(compressed)))
    }

    async fn handle_incoming(
        &self,
        bytes: Bytes,
        _ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        let decompressed = self.decompress(&bytes)?;
        Ok(MiddlewareOutcome::Continue(Bytes::from(decompressed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Direction;

    #[tokio::test]
    async fn deflate_round_trips() {
        let mw = CompressionMiddleware::new(
            "compress",
            1,
            CompressionProfile::Balanced,
            CompressionAlgorithm::Deflate,
        );
        let ctx = FlowContext::new(1, Direction::Outgoing);
        let original = Bytes::from_static(b"hello hello hello hello hello");

        let MiddlewareOutcome::Continue(compressed) =
            mw.handle_outgoing(original.clone(), &ctx).await.unwrap()
        else {
            panic!("expected Continue");
        };
        assert!(compressed.len() < original.len());

        let MiddlewareOutcome::Continue(restored) =
            mw.handle_incoming(compressed, &ctx).await.unwrap()
        else {
            panic!("expected Continue");
        };
        assert_eq!(restored, original);
    }

    #[tokio::test]
    async fn identity_algorithm_leaves_bytes_unchanged() {
        let mw = CompressionMiddleware::new(
            "noop",
            1,
            CompressionProfile::HighSpeed,
            CompressionAlgorithm::Identity,
        );
        let ctx = FlowContext::new(1, Direction::Outgoing);
        let original = Bytes::from_static(b"plain");
        let MiddlewareOutcome::Continue(out) =
            mw.handle_outgoing(original.clone(), &ctx).await.unwrap()
        else {
            panic!("expected Continue");
        };
        assert_eq!(out, original);
    }
}
