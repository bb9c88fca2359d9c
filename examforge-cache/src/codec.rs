//! Value encoding shared by both tiers.
//!
//! Values are serialized to JSON; payloads over the compression threshold
//! are gzipped. The edge tier stores an [`Envelope`] so the creation time
//! and compression flag survive the round trip.

use crate::error::{CacheError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use examforge_core::{from_epoch_millis, to_epoch_millis};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;

/// Serialized bytes, possibly gzip-compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    pub bytes: Arc<[u8]>,
    pub compressed: bool,
}

impl EncodedValue {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub fn encode<T: Serialize + ?Sized>(value: &T, compression_threshold: usize) -> Result<EncodedValue> {
    let json = serde_json::to_vec(value)?;
    if json.len() <= compression_threshold {
        return Ok(EncodedValue {
            bytes: json.into(),
            compressed: false,
        });
    }

    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::fast());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(EncodedValue {
        bytes: compressed.into(),
        compressed: true,
    })
}

pub fn decode<T: DeserializeOwned>(encoded: &EncodedValue) -> Result<T> {
    if !encoded.compressed {
        return Ok(serde_json::from_slice(&encoded.bytes)?);
    }

    let mut json = Vec::new();
    GzDecoder::new(&encoded.bytes[..]).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Edge-tier representation of an [`EncodedValue`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Raw JSON text, or base64 of the gzip stream when `compressed`.
    pub payload: String,
    pub compressed: bool,
    pub created_at_ms: i64,
}

impl Envelope {
    pub fn wrap(value: &EncodedValue, created_at: DateTime<Utc>) -> Result<String> {
        let payload = if value.compressed {
            STANDARD.encode(&value.bytes)
        } else {
            String::from_utf8(value.bytes.to_vec())
                .map_err(|e| CacheError::Serialization(e.to_string()))?
        };
        let envelope = Envelope {
            payload,
            compressed: value.compressed,
            created_at_ms: to_epoch_millis(created_at),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    pub fn unwrap(raw: &str) -> Result<(EncodedValue, DateTime<Utc>)> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        let bytes: Vec<u8> = if envelope.compressed {
            STANDARD
                .decode(envelope.payload.as_bytes())
                .map_err(|e| CacheError::Serialization(e.to_string()))?
        } else {
            envelope.payload.into_bytes()
        };
        Ok((
            EncodedValue {
                bytes: bytes.into(),
                compressed: envelope.compressed,
            },
            from_epoch_millis(envelope.created_at_ms),
        ))
    }
}
