//! Embedding and image payload codecs.
//!
//! Embeddings are stored as little-endian IEEE-754 `f32` arrays. The current
//! layout prefixes a 3-byte tag:
//!
//! ```text
//! [version: u8 = 1][dimension: u16 LE][dimension × f32 LE]
//! ```
//!
//! so a tagged blob always has `len % 4 == 3`. Untagged blobs (`len % 4 == 0`,
//! the historical layout) are still accepted on decode.

use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;

use crate::frame::PixelArray;
use crate::types::FaceVector;

pub const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 3;
const ELEMENT_WIDTH: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid image payload: {0}")]
    InvalidImagePayload(String),
    #[error("corrupt embedding encoding: {0}")]
    CorruptEncoding(String),
}

/// Encode a vector in the tagged format.
pub fn encode(vector: &FaceVector) -> Vec<u8> {
    // FaceVector caps dimensionality at u16::MAX.
    let dim = vector.dimension() as u16;
    let mut bytes = Vec::with_capacity(HEADER_LEN + vector.dimension() * ELEMENT_WIDTH);
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&dim.to_le_bytes());
    append_values(&mut bytes, vector.values());
    bytes
}

/// Encode a vector as a bare little-endian `f32` array with no header.
pub fn encode_raw(vector: &FaceVector) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.dimension() * ELEMENT_WIDTH);
    append_values(&mut bytes, vector.values());
    bytes
}

fn append_values(bytes: &mut Vec<u8>, values: &[f32]) {
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
}

/// Decode either a tagged or a raw blob.
pub fn decode(bytes: &[u8]) -> Result<FaceVector, CodecError> {
    match bytes.len() % ELEMENT_WIDTH {
        0 => decode_raw(bytes),
        3 => decode_tagged(bytes),
        _ => Err(CodecError::CorruptEncoding(format!(
            "{} bytes is neither a raw nor a tagged embedding",
            bytes.len()
        ))),
    }
}

fn decode_tagged(bytes: &[u8]) -> Result<FaceVector, CodecError> {
    let (header, payload) = bytes.split_at(HEADER_LEN);
    if header[0] != FORMAT_VERSION {
        return Err(CodecError::CorruptEncoding(format!(
            "unknown format version {}",
            header[0]
        )));
    }
    let dim = u16::from_le_bytes([header[1], header[2]]) as usize;
    if payload.len() != dim * ELEMENT_WIDTH {
        return Err(CodecError::CorruptEncoding(format!(
            "header declares {dim} dimensions but payload holds {} bytes",
            payload.len()
        )));
    }
    decode_raw(payload)
}

/// Decode a bare little-endian `f32` array.
pub fn decode_raw(bytes: &[u8]) -> Result<FaceVector, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::CorruptEncoding("empty embedding".into()));
    }
    if bytes.len() % ELEMENT_WIDTH != 0 {
        return Err(CodecError::CorruptEncoding(format!(
            "{} bytes is not a multiple of {ELEMENT_WIDTH}",
            bytes.len()
        )));
    }

    let values = bytes
        .chunks_exact(ELEMENT_WIDTH)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    FaceVector::new(values).map_err(|e| CodecError::CorruptEncoding(e.to_string()))
}

/// Decode a textual image payload into an RGB pixel array.
///
/// Accepts plain base64 or a data URL (`data:image/png;base64,...`); the
/// media-type prefix is discarded.
pub fn decode_image(payload: &str) -> Result<PixelArray, CodecError> {
    let data = strip_media_type(payload).trim();
    if data.is_empty() {
        return Err(CodecError::InvalidImagePayload("empty payload".into()));
    }

    let bytes = general_purpose::STANDARD
        .decode(data)
        .map_err(|e| CodecError::InvalidImagePayload(format!("malformed base64: {e}")))?;

    let image = image::load_from_memory(&bytes)
        .map_err(|e| CodecError::InvalidImagePayload(format!("undecodable image: {e}")))?;

    let rgb = image.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(CodecError::InvalidImagePayload("image has no pixels".into()));
    }

    tracing::trace!(width = rgb.width(), height = rgb.height(), "decoded image payload");
    Ok(rgb)
}

/// Base64-encode raw image file bytes into a payload `decode_image` accepts.
pub fn encode_image_payload(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

fn strip_media_type(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    }
}
