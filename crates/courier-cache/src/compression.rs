//! Tier-2 value compression: JSON bytes → gzip → base64 text.

use std::io::{Read, Write};

use base64::{Engine, engine::general_purpose::STANDARD};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;

use crate::{CacheError, CacheResult};

pub fn compress(json: &[u8]) -> CacheResult<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(json)
        .map_err(|e| CacheError::compression(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| CacheError::compression(e.to_string()))?;
    Ok(STANDARD.encode(compressed))
}

pub fn decompress(encoded: &str) -> CacheResult<Value> {
    let compressed = STANDARD
        .decode(encoded)
        .map_err(|e| CacheError::compression(e.to_string()))?;

    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| CacheError::compression(e.to_string()))?;

    Ok(serde_json::from_slice(&json)?)
}
