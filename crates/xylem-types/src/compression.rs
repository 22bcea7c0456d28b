//! Deflate helpers for text-node values.
//!
//! Values longer than [`COMPRESSION_THRESHOLD`] bytes are deflated when the
//! resource enables compression. Shorter values are stored verbatim; the
//! `compressed` flag on the value delegate records which form is stored.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::node::ValueDelegate;

/// Values at or below this length are never compressed.
pub const COMPRESSION_THRESHOLD: usize = 10;

/// Build a value delegate from UTF-8 text, deflating when worthwhile.
pub fn encode_value(text: &str, compression_enabled: bool) -> std::io::Result<ValueDelegate> {
    let raw = text.as_bytes();
    if compression_enabled && raw.len() > COMPRESSION_THRESHOLD {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(raw)?;
        Ok(ValueDelegate {
            value: encoder.finish()?,
            compressed: true,
        })
    } else {
        Ok(ValueDelegate {
            value: raw.to_vec(),
            compressed: false,
        })
    }
}

/// Recover the UTF-8 text of a value delegate, inflating when needed.
pub fn decode_value(value: &ValueDelegate) -> std::io::Result<String> {
    let bytes = if value.compressed {
        let mut decoder = DeflateDecoder::new(value.value.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        out
    } else {
        value.value.clone()
    };
    String::from_utf8(bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
