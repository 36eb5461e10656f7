//! Chunk codec: one subject's `predicate\tobject` lines as a gzip stream of
//! UTF-16LE code units.
//!
//! Chunks carry no header. Offsets and lengths live in the index tables, and
//! a split subject is several independent streams, never one.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, StoreError};

/// Gzip the UTF-16LE encoding of `text`.
pub fn compress(text: &str) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        raw.extend_from_slice(&unit.to_le_bytes());
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress`]. `subject` only labels the error.
pub fn decompress(subject: &str, bytes: &[u8]) -> Result<String> {
    let mut raw = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut raw)
        .map_err(|e| StoreError::malformed(subject, e))?;
    if raw.len() % 2 != 0 {
        return Err(StoreError::malformed(
            subject,
            format!("odd UTF-16 byte count {}", raw.len()),
        ));
    }
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| StoreError::malformed(subject, e))
}

/// Split decoded chunk text into `(predicate, object)` pairs.
///
/// Lines without exactly one tab, or with an empty predicate, are dropped.
pub fn parse_pairs(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let (predicate, object) = line.split_once('\t')?;
            if predicate.is_empty() || object.contains('\t') {
                return None;
            }
            Some((predicate.to_string(), object.to_string()))
        })
        .collect()
}

/// Append one `predicate\tobject` line to a chunk buffer.
pub(crate) fn push_line(buffer: &mut String, predicate: &str, object: &str) -> usize {
    buffer.push_str(predicate);
    buffer.push('\t');
    buffer.push_str(object);
    buffer.push('\n');
    predicate.encode_utf16().count() + object.encode_utf16().count() + 2
}
