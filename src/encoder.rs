//! PlantUML text encoding.
//!
//! Diagram source is UTF-8 encoded, compressed with raw DEFLATE and written
//! in PlantUML's 64-character alphabet (`0-9A-Za-z-_`). The result is both
//! the URL path component understood by PlantUML servers and the cache key.
//!
//! Compression is deterministic for a fixed level, so keys are stable across
//! process restarts.

use std::io::{Read, Write};

use base64::Engine as _;
use base64::alphabet::Alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::types::DiagramKey;

const ALPHABET_CHARS: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

const ALPHABET: Alphabet = match Alphabet::new(ALPHABET_CHARS) {
    Ok(alphabet) => alphabet,
    Err(_) => panic!("PlantUML alphabet must be 64 unique printable ASCII characters"),
};

/// PlantUML's base64 variant.
///
/// Output is unpadded here; [`encode`] fills the last group with the
/// alphabet's zero digit instead of `=`. Decoding accepts both forms.
const PLANTUML: GeneralPurpose = GeneralPurpose::new(
    &ALPHABET,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Errors from [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not valid text in the PlantUML alphabet.
    #[error("invalid diagram encoding: {0}")]
    Alphabet(#[from] base64::DecodeError),

    /// The decompressed stream was corrupt or truncated.
    #[error("corrupt diagram encoding: {0}")]
    Inflate(#[source] std::io::Error),

    /// The decompressed bytes were not UTF-8.
    #[error("decoded diagram is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encodes diagram source into its [`DiagramKey`].
pub fn encode(source: &str) -> DiagramKey {
    let mut encoded = PLANTUML.encode(deflate(source.as_bytes()));
    // PlantUML always emits whole four-character groups.
    while encoded.len() % 4 != 0 {
        encoded.push('0');
    }
    DiagramKey::from_encoded(encoded)
}

/// Recovers the diagram source from an encoded key.
///
/// # Errors
///
/// Returns [`DecodeError`] if `encoded` is not a valid PlantUML encoding.
pub fn decode(encoded: &str) -> Result<String, DecodeError> {
    let compressed = PLANTUML.decode(encoded.trim())?;
    let mut out = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .read_to_end(&mut out)
        .map_err(DecodeError::Inflate)?;
    Ok(String::from_utf8(out)?)
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::best());
    // Writes into a Vec cannot fail.
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}
