//! 🧬 PayloadCodec: unwrapping the payloads hiding inside the payloads.
//!
//! 🎬 COLD OPEN. A build finishes. Its output properties hold one innocent-looking
//! string. Inside the string: base64. Inside the base64: zlib. Inside the zlib: protobuf.
//! Inside the protobuf: the only thing we actually wanted, a lifecycle enum. 🪆
//!
//! Two shapes get decoded here:
//! - **structured** values (input properties) become typed requests, after every
//!   kindless entry gets an explicit null so the re-serializer stops complaining;
//! - **compressed** strings (output properties) become typed protobuf results.
//!
//! Every failure comes back as [`FlowError::Decode`].

pub mod structured;

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::de::DeserializeOwned;

use crate::error::FlowError;
use structured::{Kind, Struct, StructValue, fill_null_kinds};

/// 🔄 Reinterpret a structured container as a strongly typed payload.
///
/// The value is cloned, kindless entries are filled with explicit nulls, the tree is
/// lowered to JSON and deserialized as `T`.
///
/// # Errors
/// 💀 [`FlowError::Decode`] when `value` is not a structured container, or when the
/// container doesn't fit `T`.
pub fn decode_structured<T: DeserializeOwned>(value: &StructValue) -> Result<T, FlowError> {
    if !matches!(value.kind, Some(Kind::Struct(_))) {
        return Err(FlowError::decode(
            "expected a structured container, got something else",
        ));
    }
    let mut filled = value.clone();
    fill_null_kinds(&mut filled);
    let json = filled.to_json().map_err(FlowError::decode)?;
    serde_json::from_value(json).map_err(|e| FlowError::decode(format!("typed decode: {e}")))
}

/// 📦 Unwrap a structured container into its fields.
pub fn map_from_structured(value: &StructValue) -> Result<Struct, FlowError> {
    match &value.kind {
        Some(Kind::Struct(fields)) => Ok(fields.clone()),
        other => Err(FlowError::decode(format!(
            "expected a structured container, got {}",
            kind_name(other.as_ref())
        ))),
    }
}

/// 🪆 base64 → zlib → protobuf. Empty text decodes to `M::default()`.
pub fn decode_compressed<M: prost::Message + Default>(text: &str) -> Result<M, FlowError> {
    if text.is_empty() {
        return Ok(M::default());
    }
    let squished = STANDARD
        .decode(text)
        .map_err(|e| FlowError::decode(format!("base64: {e}")))?;
    let mut raw = Vec::with_capacity(squished.len() * 4);
    ZlibDecoder::new(squished.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| FlowError::decode(format!("zlib: {e}")))?;
    M::decode(raw.as_slice()).map_err(|e| FlowError::decode(format!("protobuf: {e}")))
}

/// 🪆 The inverse of [`decode_compressed`]: protobuf → zlib → base64.
pub fn encode_compressed<M: prost::Message>(message: &M) -> Result<String, FlowError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&message.encode_to_vec())
        .and_then(|_| encoder.finish())
        .map(|squished| STANDARD.encode(squished))
        .map_err(|e| FlowError::decode(format!("zlib: {e}")))
}

fn kind_name(kind: Option<&Kind>) -> &'static str {
    match kind {
        None => "a value with no kind",
        Some(Kind::Null) => "null",
        Some(Kind::Number(_)) => "a number",
        Some(Kind::String(_)) => "a string",
        Some(Kind::Bool(_)) => "a bool",
        Some(Kind::Struct(_)) => "a struct",
        Some(Kind::List(_)) => "a list",
    }
}
