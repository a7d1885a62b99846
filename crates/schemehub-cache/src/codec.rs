//! Payload codec for the distributed tier.
//!
//! Entries are stored as a text envelope so they survive text-oriented
//! stores:
//!
//! ```text
//! v1:{raw|gz}:{checksum}:{base64 body}
//! ```
//!
//! `checksum` is the first 8 bytes of the SHA-256 of the stored body (after
//! compression, before base64), hex encoded. The body is gzip-compressed only
//! when the JSON reaches the threshold and compression makes it smaller.

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::error::CacheError;

const VERSION: &str = "v1";
const RAW: &str = "raw";
const GZIP: &str = "gz";
const CHECKSUM_LEN: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct PayloadCodec {
    compression_threshold: usize,
}

impl PayloadCodec {
    pub fn new(compression_threshold: usize) -> Self {
        Self {
            compression_threshold,
        }
    }

    pub fn compression_threshold(&self) -> usize {
        self.compression_threshold
    }

    /// Serializes `value` into envelope bytes.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError> {
        let json = serde_json::to_vec(value)?;

        let (scheme, body) = if json.len() >= self.compression_threshold {
            match gzip(&json) {
                Ok(compressed) if compressed.len() < json.len() => (GZIP, compressed),
                Ok(_) => (RAW, json),
                Err(e) => {
                    tracing::warn!(error = %e, "gzip failed, storing payload uncompressed");
                    (RAW, json)
                }
            }
        } else {
            (RAW, json)
        };

        let checksum = checksum(&body);
        let encoded = STANDARD.encode(&body);
        Ok(format!("{VERSION}:{scheme}:{checksum}:{encoded}").into_bytes())
    }

    /// Decodes envelope bytes. Every failure is [`CacheError::CorruptPayload`].
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| CacheError::corrupt("envelope is not UTF-8"))?;
        let mut parts = text.splitn(4, ':');
        let (Some(version), Some(scheme), Some(expected), Some(encoded)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CacheError::corrupt("truncated envelope"));
        };

        if version != VERSION {
            return Err(CacheError::corrupt(format!("unsupported version {version:?}")));
        }
        if expected.len() != CHECKSUM_LEN {
            return Err(CacheError::corrupt("malformed checksum"));
        }

        let body = STANDARD
            .decode(encoded)
            .map_err(|e| CacheError::corrupt(format!("base64: {e}")))?;
        if checksum(&body) != expected {
            return Err(CacheError::corrupt("checksum mismatch"));
        }
        let json = match scheme {
            RAW => body,
            GZIP => gunzip(&body).map_err(|e| CacheError::corrupt(format!("gzip: {e}")))?,
            other => return Err(CacheError::corrupt(format!("unknown scheme {other:?}"))),
        };
        serde_json::from_slice(&json).map_err(|e| CacheError::corrupt(format!("json: {e}")))
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn checksum(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(&digest[..CHECKSUM_LEN / 2])
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
